//! Sender endpoint: generates frame-ready units on a buffering clock and
//! transmits data packets on a faster send clock, reacting to pause, boost,
//! and retransmission feedback from the client.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashSet, VecDeque};
use stream_lab_abstract::{
    ConfigError, Feedback, Header, ProtocolError, StreamPeer, StreamerConfig, SystemContext,
};
use tracing::debug;

/// Timer ids owned by the streamer.
const SEND_TIMER: u32 = 1;
const GENERATE_TIMER: u32 = 2;

pub struct StreamingStreamer {
    config: StreamerConfig,
    /// Last assigned data sequence; pre-incremented, so the first packet on
    /// the wire carries sequence 1.
    next_seq: u32,
    paused: bool,
    boosted: bool,
    /// Latched once the generation backlog first reaches the priming
    /// threshold; transmission of new data never starts before that.
    started: bool,
    /// Frame-ready units generated but not yet dispatched.
    backlog: u32,
    /// Sequences awaiting retransmission, in request order.
    retransmit: VecDeque<u32>,
    /// Mirror of `retransmit` for deduplicating repeated requests.
    queued: HashSet<u32>,
    sent: u64,
    rng: StdRng,
    stopped: bool,
}

impl StreamingStreamer {
    pub fn new(config: StreamerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.loss_injection.seed);
        Ok(Self {
            config,
            next_seq: 0,
            paused: false,
            boosted: false,
            started: false,
            backlog: 0,
            retransmit: VecDeque::new(),
            queued: HashSet::new(),
            sent: 0,
            rng,
            stopped: false,
        })
    }

    pub fn sent_packets(&self) -> u64 {
        self.sent
    }

    fn send_data(&mut self, ctx: &mut dyn SystemContext, seq: u32) {
        let header = Header::new(seq, ctx.now());
        ctx.send_datagram(header.encode(self.config.packet_size as usize));
        self.sent += 1;
    }

    /// Consume one backlog unit and transmit one frame's worth of packets
    /// with consecutive fresh sequence numbers.
    fn send_batch(&mut self, ctx: &mut dyn SystemContext) {
        self.backlog -= 1;
        for _ in 0..self.config.frame_packet_count {
            self.next_seq += 1;
            self.send_data(ctx, self.next_seq);
        }
    }

    fn send_tick(&mut self, ctx: &mut dyn SystemContext) {
        let period = self.config.send_period_ms();
        if self.paused {
            ctx.start_timer(period, SEND_TIMER);
            return;
        }

        // Requested retransmissions always go out first, all of them.
        let retransmitted = self.retransmit.len();
        while let Some(seq) = self.retransmit.pop_front() {
            self.queued.remove(&seq);
            self.send_data(ctx, seq);
        }

        if self.started && self.backlog > 0 {
            self.send_batch(ctx);
        }

        // Catch-up: a boosted tick that spent nothing on retransmissions may
        // dispatch a second frame if backlog remains.
        if self.boosted && retransmitted == 0 && self.started && self.backlog > 0 {
            self.send_batch(ctx);
        }

        ctx.record_metric("streamer.backlog", f64::from(self.backlog));
        ctx.start_timer(period, SEND_TIMER);
    }

    fn generate_tick(&mut self, ctx: &mut dyn SystemContext) {
        if !self.paused && self.backlog < self.config.generation_capacity {
            self.backlog += 1;
        }
        if !self.started && self.backlog >= self.config.priming_threshold {
            self.started = true;
            ctx.log("generation buffer primed, transmission starts");
        }
        ctx.start_timer(self.config.generation_period_ms(self.boosted), GENERATE_TIMER);
    }

    fn on_feedback(&mut self, ctx: &mut dyn SystemContext, feedback: Feedback) {
        match feedback {
            Feedback::Pause => {
                self.paused = true;
                self.boosted = false;
                ctx.log("paused by receiver");
            }
            Feedback::Resume => {
                self.paused = false;
            }
            Feedback::ResumeBoost => {
                self.paused = false;
                self.boosted = true;
            }
            Feedback::BoostOff => {
                self.boosted = false;
            }
            Feedback::Nack(seq) => {
                if self.queued.insert(seq) {
                    self.retransmit.push_back(seq);
                }
            }
        }
    }
}

impl StreamPeer for StreamingStreamer {
    fn init(&mut self, ctx: &mut dyn SystemContext) -> Result<(), ProtocolError> {
        ctx.start_timer(0, SEND_TIMER);
        ctx.start_timer(0, GENERATE_TIMER);
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
        match Header::decode(&datagram).and_then(|header| Feedback::decode(header.seq)) {
            Ok(feedback) => self.on_feedback(ctx, feedback),
            Err(err) => debug!(%err, "dropping malformed feedback"),
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
            SEND_TIMER => self.send_tick(ctx),
            GENERATE_TIMER => self.generate_tick(ctx),
            _ => {}
        }
        Ok(())
    }

    fn shutdown(&mut self, ctx: &mut dyn SystemContext) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        ctx.cancel_timer(SEND_TIMER);
        ctx.cancel_timer(GENERATE_TIMER);
        ctx.log("streamer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestContext;

    fn test_config() -> StreamerConfig {
        StreamerConfig {
            packet_size: 10,
            frame_packet_count: 4,
            stream_fps: 50,
            priming_threshold: 2,
            generation_capacity: 4,
            ..Default::default()
        }
    }

    fn streamer() -> StreamingStreamer {
        StreamingStreamer::new(test_config()).unwrap()
    }

    fn feedback(fb: Feedback, now: u64) -> Bytes {
        Header::new(fb.encode(), now).encode(10)
    }

    fn prime(streamer: &mut StreamingStreamer, ctx: &mut TestContext) {
        while !streamer.started {
            streamer.on_timer(ctx, GENERATE_TIMER).unwrap();
        }
    }

    #[test]
    fn no_data_flows_before_priming() {
        let mut ctx = TestContext::default();
        let mut streamer = streamer();
        streamer.on_timer(&mut ctx, GENERATE_TIMER).unwrap();
        streamer.on_timer(&mut ctx, SEND_TIMER).unwrap();
        assert!(ctx.sent.is_empty());
        assert!(!streamer.started);
    }

    #[test]
    fn primed_tick_sends_one_frame_batch_with_fresh_sequences() {
        let mut ctx = TestContext::default();
        let mut streamer = streamer();
        prime(&mut streamer, &mut ctx);
        let backlog = streamer.backlog;
        streamer.on_timer(&mut ctx, SEND_TIMER).unwrap();
        let headers = ctx.sent_headers();
        assert_eq!(headers.len(), 4);
        let seqs: Vec<u32> = headers.iter().map(|h| h.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert_eq!(streamer.backlog, backlog - 1);
    }

    #[test]
    fn backlog_is_capped_at_generation_capacity() {
        let mut ctx = TestContext::default();
        let mut streamer = streamer();
        for _ in 0..10 {
            streamer.on_timer(&mut ctx, GENERATE_TIMER).unwrap();
        }
        assert_eq!(streamer.backlog, 4);
    }

    #[test]
    fn pause_skips_sending_and_generation() {
        let mut ctx = TestContext::default();
        let mut streamer = streamer();
        prime(&mut streamer, &mut ctx);
        streamer
            .on_datagram(&mut ctx, feedback(Feedback::Pause, 0))
            .unwrap();
        let backlog = streamer.backlog;
        streamer.on_timer(&mut ctx, SEND_TIMER).unwrap();
        streamer.on_timer(&mut ctx, GENERATE_TIMER).unwrap();
        assert!(ctx.sent.is_empty());
        assert_eq!(streamer.backlog, backlog);
        // The send clock keeps running while paused.
        assert!(ctx.timers.iter().any(|&(_, id)| id == SEND_TIMER));
    }

    #[test]
    fn retransmissions_go_out_first_and_are_deduplicated() {
        let mut ctx = TestContext::default();
        let mut streamer = streamer();
        prime(&mut streamer, &mut ctx);
        for seq in [7, 7, 9] {
            streamer
                .on_datagram(&mut ctx, feedback(Feedback::Nack(seq), 0))
                .unwrap();
        }
        streamer.on_timer(&mut ctx, SEND_TIMER).unwrap();
        let seqs: Vec<u32> = ctx.sent_headers().iter().map(|h| h.seq).collect();
        // 7 once despite the duplicate request, then 9, then the new batch.
        assert_eq!(seqs, vec![7, 9, 1, 2, 3, 4]);
    }

    #[test]
    fn boost_sends_a_second_batch_when_no_retransmissions() {
        let mut ctx = TestContext::default();
        let mut streamer = streamer();
        prime(&mut streamer, &mut ctx);
        streamer
            .on_datagram(&mut ctx, feedback(Feedback::ResumeBoost, 0))
            .unwrap();
        assert!(streamer.backlog >= 2);
        streamer.on_timer(&mut ctx, SEND_TIMER).unwrap();
        assert_eq!(ctx.sent.len(), 8);

        // With a pending retransmission, the bonus batch is withheld.
        ctx.clear_sent();
        streamer.on_timer(&mut ctx, GENERATE_TIMER).unwrap();
        streamer.on_timer(&mut ctx, GENERATE_TIMER).unwrap();
        streamer
            .on_datagram(&mut ctx, feedback(Feedback::Nack(3), 0))
            .unwrap();
        streamer.on_timer(&mut ctx, SEND_TIMER).unwrap();
        assert_eq!(ctx.sent.len(), 1 + 4);
    }

    #[test]
    fn boost_off_restores_single_batches() {
        let mut ctx = TestContext::default();
        let mut streamer = streamer();
        prime(&mut streamer, &mut ctx);
        streamer
            .on_datagram(&mut ctx, feedback(Feedback::ResumeBoost, 0))
            .unwrap();
        streamer
            .on_datagram(&mut ctx, feedback(Feedback::BoostOff, 0))
            .unwrap();
        streamer.on_timer(&mut ctx, SEND_TIMER).unwrap();
        assert_eq!(ctx.sent.len(), 4);
    }

    #[test]
    fn boosted_generation_runs_faster() {
        let mut ctx = TestContext::default();
        let mut streamer = streamer();
        streamer.on_timer(&mut ctx, GENERATE_TIMER).unwrap();
        let (steady_delay, _) = *ctx.timers.last().unwrap();
        streamer
            .on_datagram(&mut ctx, feedback(Feedback::ResumeBoost, 0))
            .unwrap();
        streamer.on_timer(&mut ctx, GENERATE_TIMER).unwrap();
        let (boosted_delay, _) = *ctx.timers.last().unwrap();
        assert!(boosted_delay < steady_delay);
    }

    #[test]
    fn resume_clears_pause() {
        let mut ctx = TestContext::default();
        let mut streamer = streamer();
        prime(&mut streamer, &mut ctx);
        streamer
            .on_datagram(&mut ctx, feedback(Feedback::Pause, 0))
            .unwrap();
        streamer
            .on_datagram(&mut ctx, feedback(Feedback::Resume, 0))
            .unwrap();
        streamer.on_timer(&mut ctx, SEND_TIMER).unwrap();
        assert_eq!(ctx.sent.len(), 4);
    }

    #[test]
    fn malformed_and_reserved_feedback_is_ignored() {
        let mut ctx = TestContext::default();
        let mut streamer = streamer();
        streamer
            .on_datagram(&mut ctx, Bytes::from_static(&[0xff]))
            .unwrap();
        // Reserved value 4: decodes as neither control nor NACK.
        streamer
            .on_datagram(&mut ctx, Header::new(4, 0).encode(10))
            .unwrap();
        assert!(!streamer.paused);
        assert!(streamer.retransmit.is_empty());
    }

    #[test]
    fn shutdown_cancels_both_clocks_once() {
        let mut ctx = TestContext::default();
        let mut streamer = streamer();
        streamer.init(&mut ctx).unwrap();
        streamer.shutdown(&mut ctx);
        streamer.shutdown(&mut ctx);
        assert_eq!(ctx.cancels, vec![SEND_TIMER, GENERATE_TIMER]);
        let timers_before = ctx.timers.len();
        streamer.on_timer(&mut ctx, SEND_TIMER).unwrap();
        assert_eq!(ctx.timers.len(), timers_before);
    }
}
