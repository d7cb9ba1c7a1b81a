// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Datagram transport for the bus.
//!
//! The bus assumes an unreliable datagram channel with multicast join,
//! send-to, and receive-from; everything above (ordering, recovery) is
//! sequence-driven. No retries happen at this layer.

mod multicast;
mod udp;

pub use multicast::{join_group, multicast_interfaces};
pub use udp::UdpTransport;
