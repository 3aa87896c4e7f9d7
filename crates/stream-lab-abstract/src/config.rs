use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on packets per frame; the completeness bitmap is sized from
/// the configured value, so this caps per-frame bookkeeping memory.
pub const MAX_FRAME_PACKET_COUNT: u32 = 1024;

/// The steady generation rate is `stream_fps - GENERATION_RATE_OFFSET`
/// units per second; boost removes the offset.
pub const GENERATION_RATE_OFFSET: u32 = 30;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("frame_packet_count must be in 1..={MAX_FRAME_PACKET_COUNT}, got {0}")]
    BadFramePacketCount(u32),
    #[error(
        "flow-control thresholds must satisfy pause > target > resume, got pause={pause} target={target} resume={resume}"
    )]
    BadThresholds { pause: u32, target: u32, resume: u32 },
    #[error("start_threshold {start} exceeds buffer_capacity {capacity}")]
    BadStartThreshold { start: u32, capacity: u32 },
    #[error("stream_fps must exceed {GENERATION_RATE_OFFSET}, got {0}")]
    BadStreamFps(u32),
    #[error("playback_fps must be at least 1")]
    BadPlaybackFps,
    #[error("generation_capacity must be at least 1")]
    BadGenerationCapacity,
    #[error("error_rate must be within [0, 1], got {0}")]
    BadErrorRate(f64),
}

/// Receive-path loss injector: drops arriving datagrams with the given
/// probability before any parsing. Independent of the channel's own loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossInjection {
    pub enabled: bool,
    pub error_rate: f64,
    pub seed: u64,
}

impl Default for LossInjection {
    fn default() -> Self {
        Self {
            enabled: false,
            error_rate: 0.01,
            seed: 0,
        }
    }
}

impl LossInjection {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.error_rate) {
            return Err(ConfigError::BadErrorRate(self.error_rate));
        }
        Ok(())
    }
}

/// Receiver-side configuration. `frame_packet_count` and `packet_size` must
/// match the streamer's values; both peers derive addressing from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Padding bytes after the header in every emitted feedback packet.
    pub packet_size: u32,
    /// Packets per frame; shared with the streamer out of band.
    pub frame_packet_count: u32,
    /// Consumption rate: one frame is played per `1000 / playback_fps` ms.
    pub playback_fps: u32,
    /// Admission stops while this many frames sit in the playback buffer.
    pub buffer_capacity: u32,
    /// Buffered frames at or above this emit a pause signal.
    pub pause_threshold: u32,
    /// Buffered frames at or below this emit a resume signal.
    pub resume_threshold: u32,
    /// Steady-state target; resume below it requests boost, reaching it
    /// from below switches boost off.
    pub target_level: u32,
    /// Playback starts once the buffer first reaches this level.
    pub start_threshold: u32,
    /// Period of the frame-admission sweep.
    pub admit_interval_ms: u64,
    /// Delay before the first consume tick.
    pub consume_start_ms: u64,
    pub loss_injection: LossInjection,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            packet_size: 100,
            frame_packet_count: 100,
            playback_fps: 60,
            buffer_capacity: 40,
            pause_threshold: 30,
            resume_threshold: 5,
            target_level: 25,
            start_threshold: 25,
            admit_interval_ms: 50,
            consume_start_ms: 1100,
            loss_injection: LossInjection::default(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_packet_count == 0 || self.frame_packet_count > MAX_FRAME_PACKET_COUNT {
            return Err(ConfigError::BadFramePacketCount(self.frame_packet_count));
        }
        if self.pause_threshold <= self.target_level || self.target_level <= self.resume_threshold {
            return Err(ConfigError::BadThresholds {
                pause: self.pause_threshold,
                target: self.target_level,
                resume: self.resume_threshold,
            });
        }
        if self.start_threshold > self.buffer_capacity {
            return Err(ConfigError::BadStartThreshold {
                start: self.start_threshold,
                capacity: self.buffer_capacity,
            });
        }
        if self.playback_fps == 0 {
            return Err(ConfigError::BadPlaybackFps);
        }
        self.loss_injection.validate()
    }

    pub fn consume_period_ms(&self) -> u64 {
        (1000 / u64::from(self.playback_fps)).max(1)
    }
}

/// Sender-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamerConfig {
    /// Padding bytes after the header in every data packet.
    pub packet_size: u32,
    /// Packets per frame; shared with the client out of band.
    pub frame_packet_count: u32,
    /// Send clock rate; also the boosted generation rate.
    pub stream_fps: u32,
    /// Transmission starts once the generation backlog first reaches this.
    pub priming_threshold: u32,
    /// Upper bound on the generation backlog.
    pub generation_capacity: u32,
    pub loss_injection: LossInjection,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            packet_size: 100,
            frame_packet_count: 100,
            stream_fps: 90,
            priming_threshold: 15,
            generation_capacity: 30,
            loss_injection: LossInjection::default(),
        }
    }
}

impl StreamerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_packet_count == 0 || self.frame_packet_count > MAX_FRAME_PACKET_COUNT {
            return Err(ConfigError::BadFramePacketCount(self.frame_packet_count));
        }
        if self.stream_fps <= GENERATION_RATE_OFFSET {
            return Err(ConfigError::BadStreamFps(self.stream_fps));
        }
        if self.generation_capacity == 0 {
            return Err(ConfigError::BadGenerationCapacity);
        }
        self.loss_injection.validate()
    }

    pub fn send_period_ms(&self) -> u64 {
        (1000 / u64::from(self.stream_fps)).max(1)
    }

    /// Generation clock period: steady rate normally, full rate when boosted.
    pub fn generation_period_ms(&self, boosted: bool) -> u64 {
        let rate = if boosted {
            self.stream_fps
        } else {
            self.stream_fps - GENERATION_RATE_OFFSET
        };
        (1000 / u64::from(rate)).max(1)
    }
}

/// Channel parameters for the simulated link between the two endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub loss_rate: f64,
    pub corrupt_rate: f64,
    pub min_latency: u64,
    pub max_latency: u64,
    pub seed: u64,
    /// Both peers are shut down at this time and the run drains to an end.
    pub duration_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            min_latency: 10,
            max_latency: 100,
            seed: 0,
            duration_ms: 10_000,
        }
    }
}
