use bytes::Bytes;
use stream_lab_abstract::{Header, SystemContext};

/// Recording context for unit tests: captures everything a peer does so
/// assertions can inspect it.
#[derive(Default)]
pub(crate) struct TestContext {
    pub now: u64,
    pub sent: Vec<Bytes>,
    pub timers: Vec<(u64, u32)>,
    pub cancels: Vec<u32>,
    pub delivered: Vec<u64>,
    pub logs: Vec<String>,
    pub metrics: Vec<(String, f64)>,
}

impl TestContext {
    /// Decoded headers of every datagram sent so far.
    pub fn sent_headers(&self) -> Vec<Header> {
        self.sent
            .iter()
            .map(|payload| Header::decode(payload).expect("test datagram should decode"))
            .collect()
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }
}

impl SystemContext for TestContext {
    fn send_datagram(&mut self, payload: Bytes) {
        self.sent.push(payload);
    }

    fn start_timer(&mut self, delay_ms: u64, timer_id: u32) {
        self.timers.push((delay_ms, timer_id));
    }

    fn cancel_timer(&mut self, timer_id: u32) {
        self.cancels.push(timer_id);
    }

    fn deliver_frame(&mut self, frame_index: u64) {
        self.delivered.push(frame_index);
    }

    fn log(&mut self, message: &str) {
        self.logs.push(message.to_string());
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn record_metric(&mut self, name: &str, value: f64) {
        self.metrics.push((name.to_string(), value));
    }
}
