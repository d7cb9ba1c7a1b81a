// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types surfaced by the bus API.
//!
//! Fallible entry points return [`Result`]. Transport-internal faults
//! (malformed packets, per-interface join failures) are absorbed into
//! metrics and never propagated per-packet.

use std::net::SocketAddr;

use crate::reliability::SeqRange;

/// Errors returned by mbus operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Argument Errors
    // ========================================================================
    /// Topic or filter pattern violates the segmenter rules
    /// (empty, too long, oversized segment, embedded wildcard).
    MalformedTopic(String),
    /// Cipher key is empty or longer than 56 bytes.
    InvalidKey,
    /// Ciphertext is not a whole number of blocks or carries invalid padding.
    InvalidCiphertext(String),
    /// A `BusConfig` value is out of range (e.g. a zero-capacity
    /// retransmit ring).
    InvalidConfig(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Failed to bind a socket to an address.
    BindFailed(String),
    /// Failed to join the multicast group on any interface.
    MulticastJoinFailed(String),
    /// Datagram send failed. The packet is retained in the retransmit ring,
    /// so a publish that hits this is still recoverable via NAK.
    SendFailed(String),
    /// I/O error with underlying cause.
    IoError(std::io::Error),

    // ========================================================================
    // Wire Errors (internal: counted, not surfaced per-packet)
    // ========================================================================
    /// Received bytes do not decode as an mbus packet.
    MalformedPacket(&'static str),

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Operation attempted after `close()`.
    Closed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::MalformedTopic(msg) => write!(f, "Malformed topic: {}", msg),
            Error::InvalidKey => write!(f, "Invalid cipher key: must be 1..=56 bytes"),
            Error::InvalidCiphertext(msg) => write!(f, "Invalid ciphertext: {}", msg),
            Error::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
            Error::BindFailed(msg) => write!(f, "Bind failed: {}", msg),
            Error::MulticastJoinFailed(msg) => write!(f, "Multicast join failed: {}", msg),
            Error::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::MalformedPacket(msg) => write!(f, "Malformed packet: {}", msg),
            Error::Closed => write!(f, "Bus is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Events delivered on the bus event stream (see `Bus::events`).
///
/// Delivery of `Loss` is ordered with respect to data dispatch for the same
/// peer: subscribers observe every delivery before the gap, then the `Loss`,
/// then every delivery after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A gap was declared permanently unrecoverable. `ranges` holds the
    /// exact missing sequences, coalesced.
    Loss {
        peer: u32,
        session: u16,
        ranges: Vec<SeqRange>,
    },
    /// Per-peer receive state was reclaimed after the idle timeout.
    PeerExpired { peer: u32, session: u16 },
}

impl std::fmt::Display for BusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusEvent::Loss {
                peer,
                session,
                ranges,
            } => {
                write!(f, "Loss(peer={:#010x}, session={}, ranges=[", peer, session)?;
                for (i, r) in ranges.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}..{}", r.start, r.end)?;
                }
                write!(f, "])")
            }
            BusEvent::PeerExpired { peer, session } => {
                write!(f, "PeerExpired(peer={:#010x}, session={})", peer, session)
            }
        }
    }
}

/// Identity of a remote publisher as seen by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId {
    /// Stable per-process identifier carried in every packet.
    pub peer: u32,
    /// Ephemeral session id; changes when the peer reopens its bus.
    pub session: u16,
    /// Source address of the most recent packet from this peer.
    pub addr: SocketAddr,
}
