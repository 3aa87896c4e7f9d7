/// Logical position of a data packet within the frame stream, derived from
/// the wire sequence number rather than transmitted.
///
/// Wire sequences are 1-based (the streamer pre-increments before sending),
/// so the zero-based index `seq - 1` is what gets split: sequences `1..=N`
/// form frame 0 at offsets `0..N`. Wire sequence 0 is never assigned to
/// data; it only appears as the loss-detector sentinel and has no address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAddress {
    pub frame_index: u64,
    pub offset: u32,
}

impl FrameAddress {
    pub fn from_wire(seq: u32, frame_packet_count: u32) -> Option<Self> {
        if seq == 0 {
            return None;
        }
        let index = u64::from(seq - 1);
        let count = u64::from(frame_packet_count);
        Some(Self {
            frame_index: index / count,
            offset: (index % count) as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_spans_sequences_one_through_count() {
        for (seq, offset) in [(1, 0), (2, 1), (3, 2), (4, 3)] {
            let addr = FrameAddress::from_wire(seq, 4).unwrap();
            assert_eq!(addr.frame_index, 0);
            assert_eq!(addr.offset, offset);
        }
        let addr = FrameAddress::from_wire(5, 4).unwrap();
        assert_eq!(addr.frame_index, 1);
        assert_eq!(addr.offset, 0);
    }

    #[test]
    fn sequence_zero_has_no_address() {
        assert_eq!(FrameAddress::from_wire(0, 4), None);
    }
}
