//! The two endpoints of the adaptive streaming transport: a streamer that
//! paces sequence-numbered data packets against receiver feedback, and a
//! client that reconstructs frames, paces playback, and requests
//! retransmission of losses.

pub mod addressing;
pub mod client;
pub mod streamer;

pub use addressing::FrameAddress;
pub use client::StreamingClient;
pub use streamer::StreamingStreamer;

#[cfg(test)]
pub(crate) mod testutil;
