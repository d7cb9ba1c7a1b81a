// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reliability layer: sequencing, gap recovery, and retransmission.
//!
//! ## Protocol flow
//!
//! ```text
//! Publisher                                 Subscriber
//!   |                                          |
//!   |--- DATA (seq=1) ------------------------>|
//!   |--- DATA (seq=2) ----------X (lost)       |
//!   |--- DATA (seq=3) ------------------------>|
//!   |                                          | (gap: seq=2 missing)
//!   |<-- NAK (ranges: [2..3)) ----- unicast ---|
//!   |                                          |
//!   |--- DATA (seq=2) [retransmit, unicast] -->|
//!   |                                          | (delivers 2, 3 in order)
//!   |--- HEARTBEAT (highest=3) --------------->| (tail-loss detection)
//! ```
//!
//! | Component | Role |
//! |-----------|------|
//! | [`SeqNumGenerator`] | Sender assigns per-session sequence numbers |
//! | [`PeerTracker`] | Receiver orders, de-duplicates, and tracks gaps per peer |
//! | [`NakScheduler`] | Receiver times NAKs: coalescing delay + backoff |
//! | [`RetransmitRing`] | Sender retains recent packets for NAK servicing |
//! | [`BusMetrics`] | Observability counters |
//!
//! There are no positive acknowledgements: reliability is negative-ack and
//! heartbeat driven, bounded by the sender's ring and the receiver's
//! recovery deadline.

mod metrics;
mod nak;
mod peer;
mod ring;
mod seq;

pub use metrics::{BusMetrics, MetricsSnapshot};
pub use nak::NakScheduler;
pub use peer::{DataKind, DataOutcome, PeerTracker, Sample, MAX_GAP_RANGES, MAX_PENDING_SAMPLES};
pub use ring::RetransmitRing;
pub use seq::{seq_delta, seq_lt, SeqNumGenerator, SeqRange, HALF_WINDOW};
