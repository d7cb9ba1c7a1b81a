// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reliability metrics.
//!
//! Lock-free counters updated from the receive and publish paths.
//! Transport-internal faults (malformed packets, dropped events) are
//! observable only here, per the error-propagation policy.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for one bus instance.
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// Gaps detected on receive (one per opened range).
    gaps_detected: AtomicU64,
    /// Largest single gap observed (high-water mark, sequences).
    max_gap_size: AtomicU64,
    /// DATA packets dropped as duplicates.
    duplicates: AtomicU64,
    /// DATA packets that arrived out of order but were recovered.
    out_of_order: AtomicU64,
    /// NAK packets sent.
    naks_sent: AtomicU64,
    /// Packets resent in response to a NAK.
    retransmits_sent: AtomicU64,
    /// Retransmitted packets received and applied.
    retransmits_received: AtomicU64,
    /// Heartbeats sent.
    heartbeats_sent: AtomicU64,
    /// Datagrams that failed to decode.
    malformed_packets: AtomicU64,
    /// Ranges declared permanently lost.
    losses_declared: AtomicU64,
    /// Bus events dropped because the event channel was full.
    events_dropped: AtomicU64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly detected gap of `size` sequences.
    pub fn record_gap(&self, size: u64) {
        self.gaps_detected.fetch_add(1, Ordering::Relaxed);
        let mut current = self.max_gap_size.load(Ordering::Relaxed);
        while size > current {
            match self.max_gap_size.compare_exchange_weak(
                current,
                size,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn incr_duplicates(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_out_of_order(&self) {
        self.out_of_order.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_naks_sent(&self) {
        self.naks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_retransmits_sent(&self, count: u64) {
        self.retransmits_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn incr_retransmits_received(&self) {
        self.retransmits_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_heartbeats_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_malformed_packets(&self) {
        self.malformed_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_losses_declared(&self, ranges: u64) {
        self.losses_declared.fetch_add(ranges, Ordering::Relaxed);
    }

    pub fn incr_events_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            gaps_detected: self.gaps_detected.load(Ordering::Relaxed),
            max_gap_size: self.max_gap_size.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            naks_sent: self.naks_sent.load(Ordering::Relaxed),
            retransmits_sent: self.retransmits_sent.load(Ordering::Relaxed),
            retransmits_received: self.retransmits_received.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
            losses_declared: self.losses_declared.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value copy of [`BusMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub gaps_detected: u64,
    pub max_gap_size: u64,
    pub duplicates: u64,
    pub out_of_order: u64,
    pub naks_sent: u64,
    pub retransmits_sent: u64,
    pub retransmits_received: u64,
    pub heartbeats_sent: u64,
    pub malformed_packets: u64,
    pub losses_declared: u64,
    pub events_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_counters() {
        let m = BusMetrics::new();
        m.incr_duplicates();
        m.incr_duplicates();
        m.incr_retransmits_sent(3);
        m.incr_losses_declared(2);

        let s = m.snapshot();
        assert_eq!(s.duplicates, 2);
        assert_eq!(s.retransmits_sent, 3);
        assert_eq!(s.losses_declared, 2);
        assert_eq!(s.naks_sent, 0);
    }

    #[test]
    fn test_metrics_max_gap_high_water() {
        let m = BusMetrics::new();
        m.record_gap(3);
        m.record_gap(10);
        m.record_gap(5);

        let s = m.snapshot();
        assert_eq!(s.gaps_detected, 3);
        assert_eq!(s.max_gap_size, 10);
    }
}
