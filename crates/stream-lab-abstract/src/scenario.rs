use crate::config::{ChannelConfig, ClientConfig, StreamerConfig};
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    pub description: String,
    pub config: ChannelConfigOverride,
    #[serde(default)]
    pub client: ClientConfigOverride,
    #[serde(default)]
    pub streamer: StreamerConfigOverride,
    #[serde(default)]
    pub actions: Vec<TestAction>,
    pub assertions: Vec<TestAssertion>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ChannelConfigOverride {
    pub loss_rate: Option<f64>,
    pub corrupt_rate: Option<f64>,
    pub min_latency: Option<u64>,
    pub max_latency: Option<u64>,
    pub seed: Option<u64>,
    pub duration_ms: Option<u64>,
}

impl ChannelConfigOverride {
    pub fn apply_to(&self, config: &mut ChannelConfig) {
        if let Some(v) = self.loss_rate {
            config.loss_rate = v;
        }
        if let Some(v) = self.corrupt_rate {
            config.corrupt_rate = v;
        }
        if let Some(v) = self.min_latency {
            config.min_latency = v;
        }
        if let Some(v) = self.max_latency {
            config.max_latency = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.duration_ms {
            config.duration_ms = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ClientConfigOverride {
    pub packet_size: Option<u32>,
    pub frame_packet_count: Option<u32>,
    pub playback_fps: Option<u32>,
    pub buffer_capacity: Option<u32>,
    pub pause_threshold: Option<u32>,
    pub resume_threshold: Option<u32>,
    pub target_level: Option<u32>,
    pub start_threshold: Option<u32>,
    pub admit_interval_ms: Option<u64>,
    pub consume_start_ms: Option<u64>,
    pub loss_enabled: Option<bool>,
    pub error_rate: Option<f64>,
}

impl ClientConfigOverride {
    pub fn apply_to(&self, config: &mut ClientConfig) {
        if let Some(v) = self.packet_size {
            config.packet_size = v;
        }
        if let Some(v) = self.frame_packet_count {
            config.frame_packet_count = v;
        }
        if let Some(v) = self.playback_fps {
            config.playback_fps = v;
        }
        if let Some(v) = self.buffer_capacity {
            config.buffer_capacity = v;
        }
        if let Some(v) = self.pause_threshold {
            config.pause_threshold = v;
        }
        if let Some(v) = self.resume_threshold {
            config.resume_threshold = v;
        }
        if let Some(v) = self.target_level {
            config.target_level = v;
        }
        if let Some(v) = self.start_threshold {
            config.start_threshold = v;
        }
        if let Some(v) = self.admit_interval_ms {
            config.admit_interval_ms = v;
        }
        if let Some(v) = self.consume_start_ms {
            config.consume_start_ms = v;
        }
        if let Some(v) = self.loss_enabled {
            config.loss_injection.enabled = v;
        }
        if let Some(v) = self.error_rate {
            config.loss_injection.error_rate = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct StreamerConfigOverride {
    pub packet_size: Option<u32>,
    pub frame_packet_count: Option<u32>,
    pub stream_fps: Option<u32>,
    pub priming_threshold: Option<u32>,
    pub generation_capacity: Option<u32>,
    pub loss_enabled: Option<bool>,
    pub error_rate: Option<f64>,
}

impl StreamerConfigOverride {
    pub fn apply_to(&self, config: &mut StreamerConfig) {
        if let Some(v) = self.packet_size {
            config.packet_size = v;
        }
        if let Some(v) = self.frame_packet_count {
            config.frame_packet_count = v;
        }
        if let Some(v) = self.stream_fps {
            config.stream_fps = v;
        }
        if let Some(v) = self.priming_threshold {
            config.priming_threshold = v;
        }
        if let Some(v) = self.generation_capacity {
            config.generation_capacity = v;
        }
        if let Some(v) = self.loss_enabled {
            config.loss_injection.enabled = v;
        }
        if let Some(v) = self.error_rate {
            config.loss_injection.error_rate = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAction {
    /// Deterministically drop the first data packet with the given sequence.
    DropNextDataSeq { seq: u32 },
    /// Deterministically drop the first feedback packet with the given raw value.
    DropNextFeedbackValue { value: u32 },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAssertion {
    /// At least `count` frames were played by the consumer.
    MinFramesPlayed { count: u64 },
    /// A specific frame index was played.
    FramePlayed { index: u64 },
    /// Final hit ratio (played / attempted) is at least `ratio`.
    MinHitRatio { ratio: f64 },
    /// The streamer's total datagram count is within range.
    StreamerPacketCount { min: u64, max: Option<u64> },
}
