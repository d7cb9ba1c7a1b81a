// SPDX-License-Identifier: Apache-2.0 OR MIT

//! NAK timing per (peer, session).
//!
//! A freshly detected gap waits out a short coalescing delay (absorbing
//! plain reorder) before the first NAK. Each NAK carries every outstanding
//! range for the peer; retries back off exponentially up to a cap. The
//! recovery deadline itself lives with the gap ranges in `PeerTracker`;
//! this scheduler only decides *when* to ask again.

use std::time::{Duration, Instant};

use super::seq::SeqRange;

/// NAK timing state machine.
///
/// ```text
///   IDLE ── gap opened ──▶ ARMED ── delay expires ──▶ (send NAK) ─┐
///    ▲                                                            │
///    │                                  backoff: base, 2x ... cap │
///    └────────── all gaps filled or declared lost ◀───────────────┘
/// ```
#[derive(Debug)]
pub struct NakScheduler {
    /// When the next NAK may be sent; `None` while idle.
    next_nak: Option<Instant>,
    /// Wait after the next send (doubles per send, capped).
    backoff: Duration,
    initial_delay: Duration,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl NakScheduler {
    pub fn new(initial_delay: Duration, backoff_base: Duration, backoff_cap: Duration) -> Self {
        Self {
            next_nak: None,
            backoff: backoff_base,
            initial_delay,
            backoff_base,
            backoff_cap,
        }
    }

    /// Arm the scheduler when a gap opens. No-op while already armed, so an
    /// existing coalescing window or backoff is never shortened.
    pub fn on_gap_opened(&mut self, now: Instant) {
        if self.next_nak.is_none() {
            self.next_nak = Some(now + self.initial_delay);
        }
    }

    /// Disarm and reset the backoff once nothing is outstanding.
    pub fn on_gaps_cleared(&mut self) {
        self.next_nak = None;
        self.backoff = self.backoff_base;
    }

    /// Whether a NAK is due. `gaps` is the tracker's current outstanding
    /// set; an armed scheduler with no gaps left disarms itself.
    pub fn try_flush(&mut self, gaps: &[SeqRange], now: Instant) -> Option<Vec<SeqRange>> {
        let due = self.next_nak?;
        if now < due {
            return None;
        }
        if gaps.is_empty() {
            self.on_gaps_cleared();
            return None;
        }
        Some(gaps.to_vec())
    }

    /// Record a sent NAK: schedule the retry with doubled backoff.
    pub fn on_nak_sent(&mut self, now: Instant) {
        self.next_nak = Some(now + self.backoff);
        self.backoff = (self.backoff * 2).min(self.backoff_cap);
    }

    /// Whether the scheduler is currently armed.
    pub fn is_armed(&self) -> bool {
        self.next_nak.is_some()
    }
}
