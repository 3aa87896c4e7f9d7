//! Receiver endpoint: reconstructs frames from data packets, paces playback
//! on its own clock, and feeds loss and buffer-level signals back to the
//! streamer.

mod loss;
mod tracker;

pub use loss::LossDetector;
pub use tracker::{ConsumeOutcome, FrameTracker, PlaybackBuffer, PlaybackStats};

use crate::addressing::FrameAddress;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stream_lab_abstract::{
    ClientConfig, ConfigError, Feedback, Header, ProtocolError, StreamPeer, SystemContext,
};
use tracing::debug;

/// Timer ids owned by the client.
const CONSUME_TIMER: u32 = 1;
const ADMIT_TIMER: u32 = 2;

/// Mirror of what the client believes the streamer's transmit state to be,
/// used to edge-trigger pause and boost-off signals. The resume signal is
/// deliberately not edge-triggered: it repeats every sweep while the buffer
/// is starved, so a lost resume datagram cannot deadlock a paused stream.
#[derive(Default)]
struct FlowSignal {
    paused: bool,
    boosted: bool,
}

impl FlowSignal {
    /// At most one signal per sweep, branches in priority order.
    fn evaluate(&mut self, frame_count: i64, config: &ClientConfig) -> Option<Feedback> {
        if frame_count >= i64::from(config.pause_threshold) {
            if !self.paused {
                self.paused = true;
                self.boosted = false;
                return Some(Feedback::Pause);
            }
            None
        } else if frame_count <= i64::from(config.resume_threshold) {
            let boost = frame_count < i64::from(config.target_level);
            self.paused = false;
            self.boosted = boost;
            Some(if boost {
                Feedback::ResumeBoost
            } else {
                Feedback::Resume
            })
        } else if frame_count >= i64::from(config.target_level) {
            if self.boosted {
                self.boosted = false;
                return Some(Feedback::BoostOff);
            }
            None
        } else {
            None
        }
    }
}

pub struct StreamingClient {
    config: ClientConfig,
    loss: LossDetector,
    tracker: FrameTracker,
    playback: PlaybackBuffer,
    signal: FlowSignal,
    rng: StdRng,
    stopped: bool,
}

impl StreamingClient {
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let loss = LossDetector::new(config.frame_packet_count);
        let tracker = FrameTracker::new(config.frame_packet_count, config.buffer_capacity);
        let rng = StdRng::seed_from_u64(config.loss_injection.seed);
        Ok(Self {
            config,
            loss,
            tracker,
            playback: PlaybackBuffer::new(),
            signal: FlowSignal::default(),
            rng,
            stopped: false,
        })
    }

    pub fn playback_stats(&self) -> PlaybackStats {
        self.playback.stats()
    }

    pub fn hit_ratio(&self) -> f64 {
        self.playback.hit_ratio()
    }

    fn send_feedback(&self, ctx: &mut dyn SystemContext, feedback: Feedback) {
        let header = Header::new(feedback.encode(), ctx.now());
        ctx.send_datagram(header.encode(self.config.packet_size as usize));
    }

    fn on_data(&mut self, ctx: &mut dyn SystemContext, header: Header) {
        let nacks = self.loss.on_arrival(header.seq, self.playback.cursor());
        if !nacks.is_empty() {
            ctx.log(&format!(
                "requesting retransmission of {} sequence(s) starting at {}",
                nacks.len(),
                nacks[0]
            ));
        }
        for seq in nacks {
            self.send_feedback(ctx, Feedback::Nack(seq));
        }
        if let Some(addr) = FrameAddress::from_wire(header.seq, self.config.frame_packet_count) {
            self.tracker.mark(addr);
        }
    }

    fn consume_tick(&mut self, ctx: &mut dyn SystemContext) -> Result<(), ProtocolError> {
        match self.playback.consume()? {
            ConsumeOutcome::NotStarted => {}
            ConsumeOutcome::Hit(index) => ctx.deliver_frame(index),
            ConsumeOutcome::Miss(index) => {
                debug!(frame = index, "frame missed its playback slot");
            }
        }
        ctx.record_metric("client.frame_count", self.playback.frame_count() as f64);
        ctx.record_metric("client.hit_ratio", self.playback.hit_ratio());
        ctx.start_timer(self.config.consume_period_ms(), CONSUME_TIMER);
        Ok(())
    }

    fn admit_tick(&mut self, ctx: &mut dyn SystemContext) {
        let budget = i64::from(self.config.buffer_capacity) - self.playback.frame_count();
        let promoted = self
            .tracker
            .sweep(self.playback.cursor(), budget.max(0) as usize);
        for index in promoted {
            self.playback.promote(index);
        }
        if !self.playback.started()
            && self.playback.frame_count() >= i64::from(self.config.start_threshold)
        {
            self.playback.start();
            ctx.log("playback primed, consuming from here on");
        }
        if let Some(feedback) = self.signal.evaluate(self.playback.frame_count(), &self.config) {
            self.send_feedback(ctx, feedback);
        }
        ctx.start_timer(self.config.admit_interval_ms, ADMIT_TIMER);
    }
}

impl StreamPeer for StreamingClient {
    fn init(&mut self, ctx: &mut dyn SystemContext) -> Result<(), ProtocolError> {
        ctx.start_timer(self.config.consume_start_ms, CONSUME_TIMER);
        ctx.start_timer(self.config.admit_interval_ms, ADMIT_TIMER);
        Ok(())
    }

    fn on_datagram(
        &mut self,
        ctx: &mut dyn SystemContext,
        datagram: Bytes,
    ) -> Result<(), ProtocolError> {
        if self.stopped {
            return Ok(());
        }
        if self.config.loss_injection.enabled
            && self.rng.random::<f64>() <= self.config.loss_injection.error_rate
        {
            return Ok(());
        }
        match Header::decode(&datagram) {
            Ok(header) => self.on_data(ctx, header),
            Err(err) => debug!(%err, "dropping malformed datagram"),
        }
        Ok(())
    }

    fn on_timer(
        &mut self,
        ctx: &mut dyn SystemContext,
        timer_id: u32,
    ) -> Result<(), ProtocolError> {
        if self.stopped {
            return Ok(());
        }
        match timer_id {
            CONSUME_TIMER => self.consume_tick(ctx)?,
            ADMIT_TIMER => self.admit_tick(ctx),
            _ => {}
        }
        Ok(())
    }

    fn shutdown(&mut self, ctx: &mut dyn SystemContext) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        ctx.cancel_timer(CONSUME_TIMER);
        ctx.cancel_timer(ADMIT_TIMER);
        ctx.log("client stopped");
    }
}
