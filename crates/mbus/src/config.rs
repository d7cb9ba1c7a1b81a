// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bus configuration - single source of truth.
//!
//! This module centralizes the wire constants and runtime configuration.
//! Compile-time constants hold the protocol contract and the defaults;
//! [`BusConfig`] carries the per-bus knobs.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::{Error, Result};

// =======================================================================
// Wire contract (stable external constants)
// =======================================================================

/// Default multicast group for bus traffic.
///
/// Administratively scoped (RFC 2365, 239.0.0.0/8); chosen outside the
/// ranges used by common discovery protocols.
pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 66, 1);

/// Default UDP port for the multicast group.
pub const DEFAULT_PORT: u16 = 7667;

/// Maximum datagram size (payload + headers) the bus will emit.
///
/// Kept under typical Ethernet MTU so packets never fragment.
pub const DEFAULT_MAX_PACKET_BYTES: usize = 1400;

// =======================================================================
// Timing defaults
// =======================================================================

/// Heartbeat period. Heartbeats are only sent when at least one DATA was
/// published since the previous one.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1_000);

/// Delay between detecting a gap and the first NAK, absorbing reorder.
pub const DEFAULT_NAK_INITIAL_DELAY: Duration = Duration::from_millis(20);

/// First retransmission-wait after a NAK; doubles on each retry.
pub const DEFAULT_NAK_BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Upper bound for the doubling backoff.
pub const DEFAULT_NAK_BACKOFF_CAP: Duration = Duration::from_millis(800);

/// Wall-clock budget for recovering a gap. Past this, the missing ranges
/// are declared permanently lost and surfaced as a `Loss` event.
pub const DEFAULT_NAK_DEADLINE: Duration = Duration::from_secs(5);

/// When to reclaim per-peer receive state with no data and no heartbeats.
pub const DEFAULT_PEER_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-peer send-side retention for retransmission.
pub const DEFAULT_RETRANSMIT_RING_SIZE: usize = 1_024;

/// Socket read timeout for the receive loop. Bounds how late NAK and loss
/// deadlines fire when the group is silent.
pub const RECV_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Capacity of the user-facing event channel. Overflow drops the oldest
/// event and increments a metric.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Runtime configuration for one bus instance.
///
/// # Example
///
/// ```rust,no_run
/// use mbus::BusConfig;
/// use std::time::Duration;
///
/// let config = BusConfig::default()
///     .with_group("239.255.66.9".parse().unwrap(), 7700)
///     .with_cipher_key(b"3657".to_vec())
///     .with_heartbeat_interval(Duration::from_millis(500));
/// ```
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Multicast destination address.
    pub group_addr: Ipv4Addr,
    /// Multicast destination port.
    pub group_port: u16,
    /// Period for sender heartbeats.
    pub heartbeat_interval: Duration,
    /// Gap age before the first NAK is issued.
    pub nak_initial_delay: Duration,
    /// Initial NAK retry backoff (doubles per retry).
    pub nak_backoff_base: Duration,
    /// Maximum NAK retry backoff.
    pub nak_backoff_cap: Duration,
    /// Gap age after which ranges are declared permanently lost.
    pub nak_deadline: Duration,
    /// Send-side retransmit ring capacity (packets).
    pub retransmit_ring_size: usize,
    /// Idle time before per-peer receive state is reclaimed.
    pub peer_idle_timeout: Duration,
    /// MTU bound for emitted datagrams.
    pub max_packet_bytes: usize,
    /// Optional symmetric key. `None` sends payloads in cleartext.
    pub cipher_key: Option<Vec<u8>>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            group_addr: DEFAULT_GROUP,
            group_port: DEFAULT_PORT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            nak_initial_delay: DEFAULT_NAK_INITIAL_DELAY,
            nak_backoff_base: DEFAULT_NAK_BACKOFF_BASE,
            nak_backoff_cap: DEFAULT_NAK_BACKOFF_CAP,
            nak_deadline: DEFAULT_NAK_DEADLINE,
            retransmit_ring_size: DEFAULT_RETRANSMIT_RING_SIZE,
            peer_idle_timeout: DEFAULT_PEER_IDLE_TIMEOUT,
            max_packet_bytes: DEFAULT_MAX_PACKET_BYTES,
            cipher_key: None,
        }
    }
}

impl BusConfig {
    /// Set the multicast group address and port.
    #[must_use]
    pub fn with_group(mut self, addr: Ipv4Addr, port: u16) -> Self {
        self.group_addr = addr;
        self.group_port = port;
        self
    }

    /// Set the symmetric payload key (1..=56 bytes).
    #[must_use]
    pub fn with_cipher_key(mut self, key: Vec<u8>) -> Self {
        self.cipher_key = Some(key);
        self
    }

    /// Set the heartbeat period.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the gap recovery timing in one call.
    #[must_use]
    pub fn with_nak_timing(
        mut self,
        initial_delay: Duration,
        backoff_base: Duration,
        backoff_cap: Duration,
        deadline: Duration,
    ) -> Self {
        self.nak_initial_delay = initial_delay;
        self.nak_backoff_base = backoff_base;
        self.nak_backoff_cap = backoff_cap;
        self.nak_deadline = deadline;
        self
    }

    /// Set the send-side retransmit ring capacity.
    #[must_use]
    pub fn with_retransmit_ring_size(mut self, size: usize) -> Self {
        self.retransmit_ring_size = size;
        self
    }

    /// Set the per-peer idle timeout.
    #[must_use]
    pub fn with_peer_idle_timeout(mut self, timeout: Duration) -> Self {
        self.peer_idle_timeout = timeout;
        self
    }

    /// Check the configuration for values the bus cannot operate with.
    ///
    /// Called by `Bus::open` before any resource is touched, so a bad
    /// config fails with `InvalidConfig` instead of panicking mid-setup.
    pub fn validate(&self) -> Result<()> {
        if self.retransmit_ring_size == 0 {
            return Err(Error::InvalidConfig(
                "retransmit_ring_size must be at least 1".into(),
            ));
        }
        // Smallest useful datagram: a header plus a one-range NAK body.
        if self.max_packet_bytes < 32 {
            return Err(Error::InvalidConfig(format!(
                "max_packet_bytes {} is below the 32-byte minimum",
                self.max_packet_bytes
            )));
        }
        Ok(())
    }
}
