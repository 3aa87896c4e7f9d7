use bytes::Bytes;
use thiserror::Error;

/// A protocol-invariant violation. These are fatal: the harness aborts the
/// run rather than retrying, because the peer's internal state is no longer
/// trustworthy.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("playback buffer count went negative ({frame_count}) at play cursor {play_cursor}")]
    NegativeFrameCount { frame_count: i64, play_cursor: u64 },
}

/// The capability handed to a peer while one of its callbacks runs.
/// Everything a peer does to the outside world goes through here.
pub trait SystemContext {
    /// Fire-and-forget: hand an opaque datagram to the channel toward the
    /// peer endpoint. Delivery is asynchronous, unordered, and lossy.
    fn send_datagram(&mut self, payload: Bytes);

    /// Arm a one-shot timer. `timer_id` is peer-chosen; re-arming from the
    /// expiry callback yields a periodic clock.
    fn start_timer(&mut self, delay_ms: u64, timer_id: u32);

    /// Cancel a timer. Every already-queued expiry for this id is
    /// invalidated, so canceling from a callback is race-free.
    fn cancel_timer(&mut self, timer_id: u32);

    /// Report a frame as played to the consumer. Receiver-side only.
    fn deliver_frame(&mut self, frame_index: u64);

    /// Log a message attributed to this peer.
    fn log(&mut self, message: &str);

    /// Current simulation time in milliseconds. Monotonic.
    fn now(&self) -> u64;

    /// Record a named sample for observability / grading.
    fn record_metric(&mut self, _name: &str, _value: f64) {
        // Default no-op so bare harnesses don't need to care.
    }
}

/// One endpoint of the streaming protocol. The harness guarantees callbacks
/// run to completion one at a time, in increasing time order, so
/// implementations hold plain mutable state.
pub trait StreamPeer {
    /// Called once when the run starts. Arm initial timers here.
    fn init(&mut self, _ctx: &mut dyn SystemContext) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// Called for each datagram the channel delivers to this endpoint.
    fn on_datagram(
        &mut self,
        ctx: &mut dyn SystemContext,
        datagram: Bytes,
    ) -> Result<(), ProtocolError>;

    /// Called when a timer armed by this peer expires.
    fn on_timer(&mut self, ctx: &mut dyn SystemContext, timer_id: u32)
    -> Result<(), ProtocolError>;

    /// Stop all clocks owned by this peer. Must be idempotent; callbacks
    /// arriving after shutdown must be no-ops.
    fn shutdown(&mut self, ctx: &mut dyn SystemContext);
}
