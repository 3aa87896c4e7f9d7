use serde::Serialize;
use std::collections::HashMap;
use stream_lab_abstract::ChannelConfig;

use crate::engine::LinkEventSummary;

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: ChannelConfig,
    pub duration_ms: u64,
    pub frames_played: Vec<u64>,
    pub streamer_datagram_count: u64,
    pub client_datagram_count: u64,
    pub metrics: HashMap<String, Vec<(u64, f64)>>,
    pub link_events: Vec<LinkEventSummary>,
}

impl SimulationReport {
    /// Final value of the client's hit-ratio metric, if it was ever sampled.
    pub fn hit_ratio(&self) -> Option<f64> {
        self.metrics
            .get("client.hit_ratio")
            .and_then(|series| series.last())
            .map(|&(_, value)| value)
    }
}
