// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-(peer, session) receive state machine.
//!
//! Tracks the next expected sequence, the set of missing ranges, and the
//! out-of-order packets held back until the gaps before them close. All
//! mutation happens from the receive task; the tracker needs no locks.
//!
//! Invariants:
//! - `expected` never decreases except on session reset.
//! - every sequence in `[expected, highest_seen]` is in exactly one of the
//!   gap set, the pending buffer, or the declared-lost skip set.
//! - a pending sample is released iff everything before it was delivered or
//!   declared lost.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::seq::{seq_delta, SeqRange, HALF_WINDOW};

/// Maximum number of gap ranges tracked per peer.
///
/// When exceeded, the oldest ranges are declared lost immediately rather
/// than silently dropped, so the application still sees them.
pub const MAX_GAP_RANGES: usize = 100;

/// Maximum out-of-order samples buffered per peer.
///
/// Past this, a future packet is not buffered; its sequence joins the gap
/// set and is recovered by retransmission instead.
pub const MAX_PENDING_SAMPLES: usize = 1_024;

/// A decoded, decrypted DATA sample awaiting (or undergoing) delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub seq: u32,
    pub topic: String,
    pub payload: Vec<u8>,
}

/// How an incoming DATA packet was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// `seq == expected`, delivered immediately.
    InOrder,
    /// Already delivered, already buffered, or declared lost. Dropped.
    Duplicate,
    /// Filled (part of) a known gap.
    FilledGap,
    /// Ahead of `expected`; opened or extended the tail.
    Future,
    /// Outside the reorder window; state was reinitialized.
    SessionReset,
}

/// Result of feeding one packet to the tracker.
#[derive(Debug)]
pub struct DataOutcome {
    pub kind: DataKind,
    /// Samples now deliverable, in sequence order.
    pub deliveries: Vec<Sample>,
    /// Ranges declared lost as a side effect (gap-table overflow).
    /// When non-empty, the loss precedes `deliveries` in stream order.
    pub lost: Vec<SeqRange>,
    /// The gap this packet opened, if any (schedule a NAK).
    pub opened: Option<SeqRange>,
}

impl DataOutcome {
    fn plain(kind: DataKind) -> Self {
        Self {
            kind,
            deliveries: Vec::new(),
            lost: Vec::new(),
            opened: None,
        }
    }
}

/// One missing range plus the time it was first detected, which anchors the
/// recovery deadline.
#[derive(Debug, Clone)]
struct Gap {
    range: SeqRange,
    detected_at: Instant,
}

/// Receive state for one (peer, session).
#[derive(Debug)]
pub struct PeerTracker {
    /// Next in-order sequence awaited.
    expected: u32,
    /// Highest sequence accounted for (delivered, pending, or in a gap).
    highest_seen: u32,
    /// Missing ranges, ascending and disjoint.
    gaps: Vec<Gap>,
    /// Out-of-order samples held until the gaps before them close.
    pending: HashMap<u32, Sample>,
    /// Ranges declared lost that `expected` has not passed yet. Delivery
    /// steps over them instead of waiting.
    skipped: Vec<SeqRange>,
    /// Liveness timestamp, refreshed by any packet from the peer.
    last_heard: Instant,
}

impl PeerTracker {
    /// Create state expecting `start_seq` as the next delivery.
    ///
    /// For a first DATA packet pass its sequence (the packet is then fed via
    /// [`on_data`](Self::on_data) and delivers in-order); for a first
    /// HEARTBEAT pass `highest + 1` (a late joiner owes nothing older).
    pub fn new(start_seq: u32, now: Instant) -> Self {
        Self {
            expected: start_seq,
            highest_seen: start_seq.wrapping_sub(1),
            gaps: Vec::new(),
            pending: HashMap::new(),
            skipped: Vec::new(),
            last_heard: now,
        }
    }

    /// Next in-order sequence awaited.
    pub fn expected(&self) -> u32 {
        self.expected
    }

    /// When the peer was last heard from.
    pub fn last_heard(&self) -> Instant {
        self.last_heard
    }

    /// Whether the peer has been silent longer than `timeout`.
    pub fn is_idle(&self, timeout: Duration, now: Instant) -> bool {
        now.duration_since(self.last_heard) >= timeout
    }

    /// Current missing ranges, coalesced and in order.
    pub fn pending_gaps(&self) -> Vec<SeqRange> {
        self.gaps.iter().map(|g| g.range).collect()
    }

    /// Whether any range is outstanding.
    pub fn has_gaps(&self) -> bool {
        !self.gaps.is_empty()
    }

    /// Feed one DATA sample through the state machine.
    pub fn on_data(&mut self, sample: Sample, now: Instant) -> DataOutcome {
        self.last_heard = now;
        let seq = sample.seq;
        let delta = seq_delta(seq, self.expected);

        // Outside the reorder window in either direction: the peer restarted
        // its sequence space without changing session id, or the stream is
        // hopelessly far ahead. Reinitialize around the new position.
        if delta.unsigned_abs() > HALF_WINDOW as u32 {
            self.gaps.clear();
            self.pending.clear();
            self.skipped.clear();
            self.expected = seq.wrapping_add(1);
            self.highest_seen = seq;
            return DataOutcome {
                kind: DataKind::SessionReset,
                deliveries: vec![sample],
                lost: Vec::new(),
                opened: None,
            };
        }

        if delta < 0 {
            // Behind expected: delivered earlier or skipped as lost.
            return DataOutcome::plain(DataKind::Duplicate);
        }

        if delta == 0 {
            // In order. If a gap starts here it shrinks by one.
            let was_gap = self.remove_from_gaps(seq);
            let mut deliveries = vec![sample];
            self.expected = self.expected.wrapping_add(1);
            deliveries.extend(self.advance());
            return DataOutcome {
                kind: if was_gap {
                    DataKind::FilledGap
                } else {
                    DataKind::InOrder
                },
                deliveries,
                lost: Vec::new(),
                opened: None,
            };
        }

        // Ahead of expected.
        if seq_delta(seq, self.highest_seen) > 0 {
            // Beyond everything seen: the sequences between the old tail and
            // this packet are now known missing.
            let tail_start = self.highest_seen.wrapping_add(1);
            let mut outcome = DataOutcome::plain(DataKind::Future);

            if self.pending.len() >= MAX_PENDING_SAMPLES {
                // Buffer full: let retransmission recover this one too.
                let gap = SeqRange::new(tail_start, seq.wrapping_add(1));
                self.push_gap(gap, now);
                outcome.opened = Some(gap);
                log::debug!(
                    "[PeerTracker] pending buffer full ({}), not buffering seq {}",
                    MAX_PENDING_SAMPLES,
                    seq
                );
            } else {
                if tail_start != seq {
                    let gap = SeqRange::new(tail_start, seq);
                    self.push_gap(gap, now);
                    outcome.opened = Some(gap);
                }
                self.pending.insert(seq, sample);
            }
            self.highest_seen = seq;

            // Enforce the gap-table bound by declaring the oldest ranges
            // lost instead of forgetting them.
            while self.gaps.len() > MAX_GAP_RANGES {
                let evicted = self.gaps.remove(0);
                outcome.lost.push(evicted.range);
                self.skipped.push(evicted.range);
            }
            if !outcome.lost.is_empty() {
                outcome.deliveries.extend(self.advance());
            }
            return outcome;
        }

        // Within [expected, highest_seen]: either fills a gap or duplicates
        // a buffered sample.
        if self.gap_containing(seq).is_some() {
            self.remove_from_gaps(seq);
            self.pending.insert(seq, sample);
            // seq != expected here (delta > 0), so nothing drains yet.
            DataOutcome::plain(DataKind::FilledGap)
        } else {
            DataOutcome::plain(DataKind::Duplicate)
        }
    }

    /// Process a heartbeat announcing the sender's highest assigned
    /// sequence. Returns the tail gap it exposed, if any.
    pub fn on_heartbeat(&mut self, highest: u32, now: Instant) -> Option<SeqRange> {
        self.last_heard = now;

        let delta = seq_delta(highest, self.expected);
        if delta.unsigned_abs() > HALF_WINDOW as u32 {
            // Heartbeat from a different epoch; resync without inventing a
            // window-sized gap.
            self.gaps.clear();
            self.pending.clear();
            self.skipped.clear();
            self.expected = highest.wrapping_add(1);
            self.highest_seen = highest;
            return None;
        }

        if seq_delta(highest, self.highest_seen) > 0 {
            let start = self.highest_seen.wrapping_add(1);
            let gap = SeqRange::from_inclusive(start, highest);
            self.push_gap(gap, now);
            self.highest_seen = highest;
            Some(gap)
        } else {
            None
        }
    }

    /// Declare ranges lost on the sender's authority (unrecoverable NAK
    /// echo). Returns the ranges actually still missing here, plus the
    /// pending samples the loss released, in order.
    pub fn declare_lost(&mut self, ranges: &[SeqRange]) -> (Vec<SeqRange>, Vec<Sample>) {
        let mut lost = Vec::new();
        for range in ranges {
            lost.extend(self.remove_range_from_gaps(*range));
        }
        if lost.is_empty() {
            return (lost, Vec::new());
        }
        self.skipped.extend_from_slice(&lost);
        let released = self.advance();
        (lost, released)
    }

    /// Expire gaps whose recovery deadline has passed.
    ///
    /// Returns the lost ranges and the pending samples they released, or
    /// `None` when nothing expired.
    pub fn expire_deadlines(
        &mut self,
        deadline: Duration,
        now: Instant,
    ) -> Option<(Vec<SeqRange>, Vec<Sample>)> {
        let mut lost = Vec::new();
        let mut i = 0;
        while i < self.gaps.len() {
            if now.duration_since(self.gaps[i].detected_at) >= deadline {
                lost.push(self.gaps.remove(i).range);
            } else {
                i += 1;
            }
        }
        if lost.is_empty() {
            return None;
        }
        self.skipped.extend_from_slice(&lost);
        let released = self.advance();
        Some((lost, released))
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    /// Append a gap; new gaps always start past every existing one, so the
    /// list stays sorted without a sort.
    fn push_gap(&mut self, range: SeqRange, now: Instant) {
        debug_assert!(!range.is_empty());
        self.gaps.push(Gap {
            range,
            detected_at: now,
        });
    }

    fn gap_containing(&self, seq: u32) -> Option<usize> {
        self.gaps.iter().position(|g| g.range.contains(seq))
    }

    /// Remove one sequence from the gap set, splitting its range if needed.
    /// Returns whether the sequence was in a gap.
    fn remove_from_gaps(&mut self, seq: u32) -> bool {
        let Some(idx) = self.gap_containing(seq) else {
            return false;
        };
        let gap = self.gaps.remove(idx);
        let mut insert_at = idx;
        let before = SeqRange::new(gap.range.start, seq);
        let after = SeqRange::new(seq.wrapping_add(1), gap.range.end);
        if !before.is_empty() {
            self.gaps.insert(
                insert_at,
                Gap {
                    range: before,
                    detected_at: gap.detected_at,
                },
            );
            insert_at += 1;
        }
        if !after.is_empty() {
            self.gaps.insert(
                insert_at,
                Gap {
                    range: after,
                    detected_at: gap.detected_at,
                },
            );
        }
        true
    }

    /// Remove the intersection of `range` with the gap set; returns the
    /// removed sub-ranges.
    fn remove_range_from_gaps(&mut self, range: SeqRange) -> Vec<SeqRange> {
        if range.is_empty() {
            return Vec::new();
        }
        let mut removed = Vec::new();
        let mut rebuilt = Vec::with_capacity(self.gaps.len());
        for gap in self.gaps.drain(..) {
            // Wrap-aware interval overlap: ranges intersect iff one
            // contains the other's start.
            let g = gap.range;
            if !g.contains(range.start) && !range.contains(g.start) {
                rebuilt.push(gap);
                continue;
            }
            let cut_start = if g.contains(range.start) {
                range.start
            } else {
                g.start
            };
            let cut_end = if g.contains(range.end.wrapping_sub(1)) {
                range.end
            } else {
                g.end
            };
            removed.push(SeqRange::new(cut_start, cut_end));
            let before = SeqRange::new(g.start, cut_start);
            let after = SeqRange::new(cut_end, g.end);
            if !before.is_empty() {
                rebuilt.push(Gap {
                    range: before,
                    detected_at: gap.detected_at,
                });
            }
            if !after.is_empty() {
                rebuilt.push(Gap {
                    range: after,
                    detected_at: gap.detected_at,
                });
            }
        }
        self.gaps = rebuilt;
        removed
    }

    /// Advance `expected` over everything deliverable or skippable:
    /// release the contiguous run of pending samples and step over ranges
    /// declared lost. Stops at the first sequence still awaited.
    fn advance(&mut self) -> Vec<Sample> {
        let mut released = Vec::new();
        loop {
            if let Some(sample) = self.pending.remove(&self.expected) {
                released.push(sample);
                self.expected = self.expected.wrapping_add(1);
                continue;
            }
            if let Some(range) = self.skipped.iter().find(|r| r.contains(self.expected)) {
                self.expected = range.end;
                continue;
            }
            break;
        }
        // Skip ranges fully behind `expected` are spent.
        let expected = self.expected;
        self.skipped.retain(|r| seq_delta(r.end, expected) > 0);
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seq: u32) -> Sample {
        Sample {
            seq,
            topic: "t".into(),
            payload: vec![seq as u8],
        }
    }

    fn now() -> Instant {
        Instant::now()
    }

    fn delivered(outcome: &DataOutcome) -> Vec<u32> {
        outcome.deliveries.iter().map(|s| s.seq).collect()
    }

    #[test]
    fn test_tracker_in_order_stream() {
        let mut t = PeerTracker::new(1, now());
        for seq in 1..=5 {
            let out = t.on_data(sample(seq), now());
            assert_eq!(out.kind, DataKind::InOrder);
            assert_eq!(delivered(&out), vec![seq]);
        }
        assert_eq!(t.expected(), 6);
        assert!(!t.has_gaps());
    }

    #[test]
    fn test_tracker_reorder_delivers_in_order() {
        let mut t = PeerTracker::new(1, now());
        let mut all = Vec::new();
        for seq in [5u32, 3, 4, 2, 1] {
            all.extend(delivered(&t.on_data(sample(seq), now())));
        }
        assert_eq!(all, vec![1, 2, 3, 4, 5]);
        assert!(!t.has_gaps());
        assert_eq!(t.expected(), 6);
    }

    #[test]
    fn test_tracker_duplicate_suppressed() {
        let mut t = PeerTracker::new(1, now());
        assert_eq!(t.on_data(sample(1), now()).kind, DataKind::InOrder);
        assert_eq!(t.on_data(sample(1), now()).kind, DataKind::Duplicate);

        // Duplicate of a buffered future sample is also suppressed.
        assert_eq!(t.on_data(sample(5), now()).kind, DataKind::Future);
        assert_eq!(t.on_data(sample(5), now()).kind, DataKind::Duplicate);
    }

    #[test]
    fn test_tracker_gap_detection_and_fill() {
        let mut t = PeerTracker::new(1, now());
        t.on_data(sample(1), now());
        let out = t.on_data(sample(5), now());
        assert_eq!(out.kind, DataKind::Future);
        assert_eq!(out.opened, Some(SeqRange::new(2, 5)));
        assert_eq!(t.pending_gaps(), vec![SeqRange::new(2, 5)]);

        // Fill 3: gap splits.
        let out = t.on_data(sample(3), now());
        assert_eq!(out.kind, DataKind::FilledGap);
        assert!(out.deliveries.is_empty());
        assert_eq!(
            t.pending_gaps(),
            vec![SeqRange::new(2, 3), SeqRange::new(4, 5)]
        );

        // Fill 2: delivers 2 and 3.
        let out = t.on_data(sample(2), now());
        assert_eq!(out.kind, DataKind::FilledGap);
        assert_eq!(delivered(&out), vec![2, 3]);

        // Fill 4: delivers 4 and the buffered 5.
        let out = t.on_data(sample(4), now());
        assert_eq!(delivered(&out), vec![4, 5]);
        assert!(!t.has_gaps());
        assert_eq!(t.expected(), 6);
    }

    #[test]
    fn test_tracker_heartbeat_opens_tail_gap() {
        let mut t = PeerTracker::new(1, now());
        t.on_data(sample(1), now());
        assert_eq!(t.on_heartbeat(4, now()), Some(SeqRange::new(2, 5)));
        assert_eq!(t.pending_gaps(), vec![SeqRange::new(2, 5)]);

        // A heartbeat not past the tail changes nothing.
        assert_eq!(t.on_heartbeat(4, now()), None);
        assert_eq!(t.on_heartbeat(2, now()), None);
    }

    #[test]
    fn test_tracker_deadline_expiry_releases_pending() {
        let start = now();
        let mut t = PeerTracker::new(1, start);
        for seq in 1..=4 {
            t.on_data(sample(seq), start);
        }
        // 5 lost; 6..=10 buffer.
        for seq in 6..=10 {
            t.on_data(sample(seq), start);
        }
        assert_eq!(t.pending_gaps(), vec![SeqRange::new(5, 6)]);

        // Not yet expired.
        assert!(t
            .expire_deadlines(Duration::from_secs(5), start + Duration::from_secs(1))
            .is_none());

        let (lost, released) = t
            .expire_deadlines(Duration::from_secs(5), start + Duration::from_secs(6))
            .expect("deadline passed");
        assert_eq!(lost, vec![SeqRange::new(5, 6)]);
        assert_eq!(released.iter().map(|s| s.seq).collect::<Vec<_>>(), vec![
            6, 7, 8, 9, 10
        ]);
        assert_eq!(t.expected(), 11);
        assert!(!t.has_gaps());
    }

    #[test]
    fn test_tracker_declare_lost_from_sender() {
        let mut t = PeerTracker::new(1, now());
        t.on_data(sample(1), now());
        t.on_data(sample(6), now()); // gap [2..6)

        let (lost, released) = t.declare_lost(&[SeqRange::new(2, 6)]);
        assert_eq!(lost, vec![SeqRange::new(2, 6)]);
        assert_eq!(released.iter().map(|s| s.seq).collect::<Vec<_>>(), vec![6]);
        assert_eq!(t.expected(), 7);

        // Declaring again is a no-op.
        let (lost, released) = t.declare_lost(&[SeqRange::new(2, 6)]);
        assert!(lost.is_empty());
        assert!(released.is_empty());
    }

    #[test]
    fn test_tracker_partial_declare_lost() {
        let mut t = PeerTracker::new(1, now());
        t.on_data(sample(1), now());
        t.on_data(sample(8), now()); // gap [2..8)

        // Only 3..5 are unrecoverable; 2 and 5..8 still pending recovery.
        let (lost, released) = t.declare_lost(&[SeqRange::new(3, 5)]);
        assert_eq!(lost, vec![SeqRange::new(3, 5)]);
        assert!(released.is_empty());
        assert_eq!(
            t.pending_gaps(),
            vec![SeqRange::new(2, 3), SeqRange::new(5, 8)]
        );

        // 2 arrives: delivers 2, steps over the lost 3..5, stops at gap 5.
        let out = t.on_data(sample(2), now());
        assert_eq!(delivered(&out), vec![2]);
        assert_eq!(t.expected(), 5);
        assert_eq!(t.pending_gaps(), vec![SeqRange::new(5, 8)]);

        // 5..8 arrive: stream resumes cleanly after the skipped hole.
        let mut rest = Vec::new();
        for seq in [5u32, 6, 7, 8] {
            rest.extend(delivered(&t.on_data(sample(seq), now())));
        }
        assert_eq!(rest, vec![5, 6, 7, 8]);
        assert!(!t.has_gaps());
    }

    #[test]
    fn test_tracker_session_reset_on_window_jump() {
        let mut t = PeerTracker::new(1, now());
        t.on_data(sample(1), now());
        t.on_data(sample(5), now()); // gap [2..5)

        let far = 1u32.wrapping_add(HALF_WINDOW as u32).wrapping_add(10);
        let out = t.on_data(sample(far), now());
        assert_eq!(out.kind, DataKind::SessionReset);
        assert_eq!(delivered(&out), vec![far]);
        assert!(!t.has_gaps());
        assert_eq!(t.expected(), far.wrapping_add(1));
    }

    #[test]
    fn test_tracker_sequence_wrap() {
        let start = u32::MAX - 1;
        let mut t = PeerTracker::new(start, now());
        let mut all = Vec::new();
        for seq in [start, start.wrapping_add(1), start.wrapping_add(2)] {
            all.extend(delivered(&t.on_data(sample(seq), now())));
        }
        assert_eq!(all, vec![u32::MAX - 1, u32::MAX, 0]);
        assert_eq!(t.expected(), 1);
    }

    #[test]
    fn test_tracker_gap_table_overflow_declares_lost() {
        let mut t = PeerTracker::new(1, now());
        t.on_data(sample(1), now());

        // Every other sequence missing: one gap per received packet.
        let mut seq = 1u32;
        let mut evicted = Vec::new();
        for _ in 0..(MAX_GAP_RANGES + 5) {
            seq += 2;
            let out = t.on_data(sample(seq), now());
            evicted.extend(out.lost);
        }
        assert!(t.pending_gaps().len() <= MAX_GAP_RANGES);
        assert!(!evicted.is_empty(), "oldest gaps surfaced as losses");
    }

    #[test]
    fn test_tracker_idle_detection() {
        let start = now();
        let t = PeerTracker::new(1, start);
        assert!(!t.is_idle(Duration::from_secs(30), start + Duration::from_secs(1)));
        assert!(t.is_idle(Duration::from_secs(30), start + Duration::from_secs(31)));
    }
}
