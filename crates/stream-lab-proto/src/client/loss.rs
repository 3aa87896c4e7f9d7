use crate::addressing::FrameAddress;
use std::collections::VecDeque;

/// Receiver-driven loss detection over the data sequence space.
///
/// Tracks the next expected sequence and the FIFO of sequences believed lost
/// (NACKed but not yet recovered). The detector itself never touches the
/// wire; it returns the sequences that need a NACK and the caller emits them.
pub struct LossDetector {
    expected_seq: u32,
    outstanding: VecDeque<u32>,
    frame_packet_count: u32,
}

impl LossDetector {
    pub fn new(frame_packet_count: u32) -> Self {
        Self {
            expected_seq: 0,
            outstanding: VecDeque::new(),
            frame_packet_count,
        }
    }

    /// Classify an arriving data sequence against the expected window.
    /// Returns the sequences to NACK as a result of this arrival.
    ///
    /// In-order arrivals advance the window. An arrival ahead of the window
    /// declares every skipped sequence lost. An arrival behind the window is
    /// a retransmission: the outstanding FIFO is drained from the front
    /// until the matching entry is removed, re-requesting entries whose
    /// frame has not yet played out and silently dropping the rest. The
    /// drain is bounded to a single rotation so no still-outstanding
    /// sequence is requested twice in one pass. Wire sequence 0 is a
    /// sentinel on the late branch and drains nothing.
    pub fn on_arrival(&mut self, seq: u32, play_cursor: u64) -> Vec<u32> {
        if seq == self.expected_seq {
            self.expected_seq += 1;
            Vec::new()
        } else if seq > self.expected_seq {
            let lost: Vec<u32> = (self.expected_seq..seq).collect();
            self.outstanding.extend(lost.iter().copied());
            self.expected_seq = seq + 1;
            lost
        } else {
            let mut nacks = Vec::new();
            if seq == 0 {
                return nacks;
            }
            for _ in 0..self.outstanding.len() {
                let Some(front) = self.outstanding.pop_front() else {
                    break;
                };
                if front == seq {
                    break;
                }
                if self.still_relevant(front, play_cursor) {
                    nacks.push(front);
                    self.outstanding.push_back(front);
                }
            }
            nacks
        }
    }

    /// A lost sequence is worth re-requesting only while its frame is still
    /// at or ahead of the play cursor. Sequence 0 has no frame and is never
    /// worth re-requesting.
    fn still_relevant(&self, seq: u32, play_cursor: u64) -> bool {
        FrameAddress::from_wire(seq, self.frame_packet_count)
            .is_some_and(|addr| addr.frame_index >= play_cursor)
    }

    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn expected_seq(&self) -> u32 {
        self.expected_seq
    }
}
