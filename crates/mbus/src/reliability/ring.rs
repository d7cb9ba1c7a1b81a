// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Send-side retransmit ring.
//!
//! Fixed-capacity store of the most recently transmitted packets, indexed
//! by sequence number modulo capacity. Each slot carries the absolute
//! sequence so a lookup for an evicted sequence that hashes to an occupied
//! slot is rejected rather than served stale bytes. NAK servicing resends
//! the exact original packet bytes kept here.

use std::time::{Duration, Instant};

/// One retained packet.
#[derive(Debug, Clone)]
struct RingEntry {
    seq: u32,
    bytes: Vec<u8>,
    stored_at: Instant,
}

/// Bounded ring of encoded packets, keyed by sequence.
#[derive(Debug)]
pub struct RetransmitRing {
    slots: Vec<Option<RingEntry>>,
}

impl RetransmitRing {
    /// Create a ring retaining up to `capacity` packets.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "retransmit ring capacity must be non-zero");
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Retention capacity in packets.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Retain the encoded bytes of `seq`, evicting whatever occupied the
    /// slot before (capacity eviction).
    pub fn insert(&mut self, seq: u32, bytes: Vec<u8>, now: Instant) {
        let idx = seq as usize % self.slots.len();
        self.slots[idx] = Some(RingEntry {
            seq,
            bytes,
            stored_at: now,
        });
    }

    /// Exact original bytes for `seq`, if still retained.
    pub fn get(&self, seq: u32) -> Option<&[u8]> {
        let idx = seq as usize % self.slots.len();
        match &self.slots[idx] {
            Some(entry) if entry.seq == seq => Some(&entry.bytes),
            _ => None,
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    /// Drop entries older than `max_age` (age eviction).
    pub fn purge_older_than(&mut self, max_age: Duration, now: Instant) -> usize {
        let mut purged = 0;
        for slot in &mut self.slots {
            if let Some(entry) = slot {
                if now.duration_since(entry.stored_at) >= max_age {
                    *slot = None;
                    purged += 1;
                }
            }
        }
        purged
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }
}
