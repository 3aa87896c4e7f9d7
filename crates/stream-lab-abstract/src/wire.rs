use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Fixed header carried by every datagram in both directions: a sequence
/// field and the send time. The body after the header is padding up to the
/// configured packet size; its content carries no protocol meaning.
pub const HEADER_LEN: usize = 12;

/// Feedback values at or above this encode a NACK for sequence `value - NACK_BASE`.
pub const NACK_BASE: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram too short for header ({len} of {HEADER_LEN} bytes)")]
    Truncated { len: usize },
    #[error("reserved feedback value {value}")]
    ReservedFeedback { value: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Data direction: packet sequence number, starting at 1.
    /// Feedback direction: a control code or NACK encoding (see [`Feedback`]).
    pub seq: u32,
    /// Send time in simulation milliseconds. Informational only.
    pub timestamp_ms: u64,
}

impl Header {
    pub fn new(seq: u32, timestamp_ms: u64) -> Self {
        Self { seq, timestamp_ms }
    }

    /// Encode the header followed by `body_len` padding bytes.
    pub fn encode(&self, body_len: usize) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
        buf.put_u32(self.seq);
        buf.put_u64(self.timestamp_ms);
        buf.put_bytes(0, body_len);
        buf.freeze()
    }

    /// Decode a header from the front of a datagram. A short buffer is a
    /// [`WireError::Truncated`]; callers treat that as a lost packet.
    pub fn decode(mut buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::Truncated { len: buf.len() });
        }
        let seq = buf.get_u32();
        let timestamp_ms = buf.get_u64();
        Ok(Self { seq, timestamp_ms })
    }
}

/// A receiver-to-sender message, decoded once at ingress from the overloaded
/// sequence field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    /// Resume transmission at the steady rate.
    Resume,
    /// Resume transmission and enable the boosted generation rate.
    ResumeBoost,
    /// Stop transmitting until a resume arrives.
    Pause,
    /// Keep transmitting but drop back to the steady rate.
    BoostOff,
    /// Request retransmission of the named lost data sequence.
    Nack(u32),
}

impl Feedback {
    pub fn decode(value: u32) -> Result<Self, WireError> {
        match value {
            0 => Ok(Self::Resume),
            1 => Ok(Self::ResumeBoost),
            2 => Ok(Self::Pause),
            3 => Ok(Self::BoostOff),
            v if v >= NACK_BASE => Ok(Self::Nack(v - NACK_BASE)),
            v => Err(WireError::ReservedFeedback { value: v }),
        }
    }

    pub fn encode(&self) -> u32 {
        match self {
            Self::Resume => 0,
            Self::ResumeBoost => 1,
            Self::Pause => 2,
            Self::BoostOff => 3,
            Self::Nack(seq) => seq + NACK_BASE,
        }
    }
}
