// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wire codec for bus packets.
//!
//! Every packet starts with a fixed 16-byte header; all multi-byte integers
//! are big-endian. The magic sentinel, version, and kind codes are the
//! stable external contract.
//!
//! ```text
//! header:  magic(2) version(1) kind(1) peer(4) session(2) sequence(4) flags(2)
//! DATA:    topic-len(2) topic(..) payload-len(4) payload(..)
//! NAK:     target-peer(4) target-session(2) range-count(2)
//!          count x { start-seq(4) end-seq(4, inclusive) }
//! HEARTBEAT: (empty - the highest assigned sequence rides in the header)
//! ```
//!
//! Encoding is byte-exact for equal inputs: retransmission resends the
//! original bytes and receivers may de-duplicate on them. The decoder
//! rejects anything malformed before it can touch peer state.

use crate::error::{Error, Result};
use crate::reliability::SeqRange;
use crate::topic::{self, MAX_TOPIC_LEN};

/// Magic sentinel, first two bytes of every packet.
pub const MAGIC: [u8; 2] = [0x4D, 0x42];

/// Wire protocol version.
pub const WIRE_VERSION: u8 = 1;

/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 16;

/// Packet kind codes.
pub const KIND_DATA: u8 = 1;
pub const KIND_NAK: u8 = 2;
pub const KIND_HEARTBEAT: u8 = 3;

/// Header flag: the DATA payload is ciphertext (padded ECB).
pub const FLAG_ENCRYPTED: u16 = 0x0001;

/// Header flag: this NAK echoes ranges the sender can no longer
/// retransmit; the receiver should declare them lost immediately.
pub const FLAG_UNRECOVERABLE: u16 = 0x0002;

/// Common packet header.
///
/// `sequence` is the packet's own sequence for DATA, the highest assigned
/// sequence for HEARTBEAT, and a request id for NAK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub peer: u32,
    pub session: u16,
    pub sequence: u32,
    pub flags: u16,
}

impl Header {
    pub fn new(peer: u32, session: u16, sequence: u32, flags: u16) -> Self {
        Self {
            peer,
            session,
            sequence,
            flags,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn is_unrecoverable(&self) -> bool {
        self.flags & FLAG_UNRECOVERABLE != 0
    }

    fn write(&self, kind: u8, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAGIC);
        out.push(WIRE_VERSION);
        out.push(kind);
        out.extend_from_slice(&self.peer.to_be_bytes());
        out.extend_from_slice(&self.session.to_be_bytes());
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
    }
}

/// Application data on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub header: Header,
    pub topic: String,
    /// Cleartext, or ciphertext when `header.is_encrypted()`.
    pub payload: Vec<u8>,
}

/// Retransmission request (or unrecoverable echo) for a peer's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NakPacket {
    pub header: Header,
    /// The publisher whose stream has the gaps.
    pub target_peer: u32,
    pub target_session: u16,
    /// Missing ranges, coalesced.
    pub ranges: Vec<SeqRange>,
}

/// Decoded wire packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Data(DataPacket),
    Nak(NakPacket),
    /// Body-less; the header's `sequence` is the sender's highest assigned.
    Heartbeat(Header),
}

impl Packet {
    /// Header common to all kinds.
    pub fn header(&self) -> &Header {
        match self {
            Packet::Data(d) => &d.header,
            Packet::Nak(n) => &n.header,
            Packet::Heartbeat(h) => h,
        }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::Data(data) => {
                let mut out =
                    Vec::with_capacity(HEADER_LEN + 2 + data.topic.len() + 4 + data.payload.len());
                data.header.write(KIND_DATA, &mut out);
                out.extend_from_slice(&(data.topic.len() as u16).to_be_bytes());
                out.extend_from_slice(data.topic.as_bytes());
                out.extend_from_slice(&(data.payload.len() as u32).to_be_bytes());
                out.extend_from_slice(&data.payload);
                out
            }
            Packet::Nak(nak) => {
                let mut out = Vec::with_capacity(HEADER_LEN + 8 + nak.ranges.len() * 8);
                nak.header.write(KIND_NAK, &mut out);
                out.extend_from_slice(&nak.target_peer.to_be_bytes());
                out.extend_from_slice(&nak.target_session.to_be_bytes());
                out.extend_from_slice(&(nak.ranges.len() as u16).to_be_bytes());
                for range in &nak.ranges {
                    out.extend_from_slice(&range.start.to_be_bytes());
                    out.extend_from_slice(&range.last().to_be_bytes());
                }
                out
            }
            Packet::Heartbeat(header) => {
                let mut out = Vec::with_capacity(HEADER_LEN);
                header.write(KIND_HEARTBEAT, &mut out);
                out
            }
        }
    }

    /// Parse wire bytes.
    pub fn decode(buf: &[u8]) -> Result<Packet> {
        let mut r = Reader::new(buf);

        if r.take(2)? != MAGIC {
            return Err(Error::MalformedPacket("bad magic"));
        }
        if r.u8()? != WIRE_VERSION {
            return Err(Error::MalformedPacket("unsupported version"));
        }
        let kind = r.u8()?;
        let header = Header {
            peer: r.u32()?,
            session: r.u16()?,
            sequence: r.u32()?,
            flags: r.u16()?,
        };

        match kind {
            KIND_DATA => {
                let topic_len = r.u16()? as usize;
                if topic_len == 0 || topic_len > MAX_TOPIC_LEN {
                    return Err(Error::MalformedPacket("topic length out of range"));
                }
                let topic_bytes = r.slice(topic_len)?;
                let topic = std::str::from_utf8(topic_bytes)
                    .map_err(|_| Error::MalformedPacket("topic is not UTF-8"))?;
                if topic::split_topic(topic).is_err() {
                    return Err(Error::MalformedPacket("topic violates segmenter rules"));
                }
                let payload_len = r.u32()? as usize;
                let payload = r.slice(payload_len)?.to_vec();
                r.finish()?;
                Ok(Packet::Data(DataPacket {
                    header,
                    topic: topic.to_string(),
                    payload,
                }))
            }
            KIND_NAK => {
                let target_peer = r.u32()?;
                let target_session = r.u16()?;
                let count = r.u16()? as usize;
                let mut ranges = Vec::with_capacity(count.min(256));
                for _ in 0..count {
                    let start = r.u32()?;
                    let last = r.u32()?;
                    ranges.push(SeqRange::from_inclusive(start, last));
                }
                r.finish()?;
                Ok(Packet::Nak(NakPacket {
                    header,
                    target_peer,
                    target_session,
                    ranges,
                }))
            }
            KIND_HEARTBEAT => {
                r.finish()?;
                Ok(Packet::Heartbeat(header))
            }
            _ => Err(Error::MalformedPacket("unknown kind")),
        }
    }
}

/// Bounds-checked big-endian cursor over a received datagram.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn slice(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&e| e <= self.buf.len())
            .ok_or(Error::MalformedPacket("truncated"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        self.slice(len)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.slice(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.slice(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.slice(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reject trailing garbage so encode/decode is a bijection.
    fn finish(&self) -> Result<()> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(Error::MalformedPacket("trailing bytes"))
        }
    }
}
