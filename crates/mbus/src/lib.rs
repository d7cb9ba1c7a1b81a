// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # mbus - reliable sequenced pub/sub over IP multicast
//!
//! Peer processes publish messages to hierarchical dotted **topics** and
//! subscribe with wildcard **filters**; the bus delivers matching messages
//! to every subscriber in the multicast group, in per-publisher order, with
//! gap detection and NAK-driven recovery on top of plain UDP.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mbus::{Bus, BusConfig};
//!
//! fn main() -> mbus::Result<()> {
//!     let bus = Bus::open(BusConfig::default())?;
//!
//!     bus.subscribe("metrics.>", |msg| {
//!         println!("[{}] seq {} from {:#010x}", msg.topic, msg.sequence, msg.peer.peer);
//!     })?;
//!
//!     bus.publish("metrics.cpu.load", &[0x2A])?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------------------------------+
//! |                        Application Layer                          |
//! |        publish(topic, payload)  /  subscribe(filter, cb)          |
//! +-------------------------------------------------------------------+
//! |                           Bus Engine                              |
//! |   subscription table | ordered dispatch | heartbeat timer         |
//! +-------------------------------------------------------------------+
//! |                        Reliability Layer                          |
//! |   per-peer sequencing | gap tracking | NAK + retransmit ring      |
//! +-------------------------------------------------------------------+
//! |                     Codec / Cipher Layer                          |
//! |   wire framing (big-endian) | optional Blowfish payload cipher    |
//! +-------------------------------------------------------------------+
//! |                          Transport                                |
//! |        UDP multicast group + unicast recovery sockets             |
//! +-------------------------------------------------------------------+
//! ```
//!
//! ## Guarantees
//!
//! - Per (peer, session): strict in-order delivery of every successfully
//!   received sequence, duplicates suppressed, with explicit
//!   [`BusEvent::Loss`] events for ranges that could not be recovered
//!   within the deadline.
//! - Across peers: no ordering; callbacks see interleaved publishers.
//! - No positive acks: reliability is NAK + heartbeat driven, bounded by
//!   the sender's retransmit ring and the receiver's recovery deadline.

/// Blowfish payload cipher (block ops, key schedule, padded ECB mode).
pub mod cipher;
/// Bus configuration: wire constants, timing defaults, `BusConfig`.
pub mod config;
/// The bus engine: `Bus`, subscriptions, receive loop.
pub mod engine;
/// Error and event types.
pub mod error;
/// Wire codec for DATA / NAK / HEARTBEAT packets.
pub mod protocol;
/// Sequencing, gap recovery, retransmission, metrics.
pub mod reliability;
/// Topic names and wildcard filters.
pub mod topic;
/// UDP multicast / unicast transport.
pub mod transport;

pub use config::BusConfig;
pub use engine::{Bus, Message, SubscriptionId};
pub use error::{BusEvent, Error, PeerId, Result};
pub use reliability::{MetricsSnapshot, SeqRange};
pub use topic::TopicFilter;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
