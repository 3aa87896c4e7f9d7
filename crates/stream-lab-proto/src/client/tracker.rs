use crate::addressing::FrameAddress;
use bitvec::prelude::*;
use std::collections::{BTreeMap, HashSet};
use stream_lab_abstract::ProtocolError;

/// Packet-level completeness bookkeeping for frames still being assembled.
///
/// One presence bitmap per pending frame, sized exactly to the configured
/// packets-per-frame. Records are created on the first packet for a frame
/// and destroyed on promotion or when the play cursor passes them. The
/// number of concurrent records is bounded; packets for frames beyond the
/// bound are dropped and the record is re-created when a retransmission
/// arrives within range.
pub struct FrameTracker {
    pending: BTreeMap<u64, BitVec>,
    frame_packet_count: usize,
    max_pending: usize,
}

impl FrameTracker {
    pub fn new(frame_packet_count: u32, buffer_capacity: u32) -> Self {
        Self {
            pending: BTreeMap::new(),
            frame_packet_count: frame_packet_count as usize,
            max_pending: (buffer_capacity as usize).max(1) * 2,
        }
    }

    /// Mark one packet offset as present for its frame.
    pub fn mark(&mut self, addr: FrameAddress) {
        if let Some(bits) = self.pending.get_mut(&addr.frame_index) {
            bits.set(addr.offset as usize, true);
        } else {
            if self.pending.len() >= self.max_pending {
                return;
            }
            let mut bits = bitvec![0; self.frame_packet_count];
            bits.set(addr.offset as usize, true);
            self.pending.insert(addr.frame_index, bits);
        }
    }

    /// Purge records behind the play cursor, then promote complete frames in
    /// ascending index order, at most `admit_budget` of them. Returns the
    /// promoted frame indices.
    pub fn sweep(&mut self, play_cursor: u64, admit_budget: usize) -> Vec<u64> {
        self.pending.retain(|&index, _| index >= play_cursor);

        let complete: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, bits)| bits.all())
            .map(|(&index, _)| index)
            .take(admit_budget)
            .collect();
        for index in &complete {
            self.pending.remove(index);
        }
        complete
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Outcome of one consume tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Playback has not been primed yet; the cursor did not move.
    NotStarted,
    /// The frame at the cursor was present and was played.
    Hit(u64),
    /// The frame at the cursor never arrived in time; skipped.
    Miss(u64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub hits: u64,
    pub misses: u64,
}

/// Promoted frames awaiting consumption, plus the play cursor.
///
/// The cursor advances exactly once per consume tick once playback has
/// started, whether or not the target frame is present: a real-time player
/// does not wait for late frames.
pub struct PlaybackBuffer {
    ready: HashSet<u64>,
    frame_count: i64,
    cursor: u64,
    stats: PlaybackStats,
    started: bool,
}

impl PlaybackBuffer {
    pub fn new() -> Self {
        Self {
            ready: HashSet::new(),
            frame_count: 0,
            cursor: 0,
            stats: PlaybackStats::default(),
            started: false,
        }
    }

    pub fn promote(&mut self, frame_index: u64) {
        if self.ready.insert(frame_index) {
            self.frame_count += 1;
        }
    }

    /// One-way latch; never re-checked once set.
    pub fn start(&mut self) {
        self.started = true;
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn frame_count(&self) -> i64 {
        self.frame_count
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    pub fn hit_ratio(&self) -> f64 {
        let attempts = self.stats.hits + self.stats.misses;
        if attempts == 0 {
            return 0.0;
        }
        self.stats.hits as f64 / attempts as f64
    }

    pub fn consume(&mut self) -> Result<ConsumeOutcome, ProtocolError> {
        if self.frame_count < 0 {
            return Err(ProtocolError::NegativeFrameCount {
                frame_count: self.frame_count,
                play_cursor: self.cursor,
            });
        }
        if !self.started {
            return Ok(ConsumeOutcome::NotStarted);
        }
        let index = self.cursor;
        self.cursor += 1;
        if self.ready.remove(&index) {
            self.frame_count -= 1;
            self.stats.hits += 1;
            Ok(ConsumeOutcome::Hit(index))
        } else {
            self.stats.misses += 1;
            Ok(ConsumeOutcome::Miss(index))
        }
    }
}
