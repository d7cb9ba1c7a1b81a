// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The receive loop.
//!
//! A single task drives packet intake, per-peer tracking, and user dispatch
//! in order. The peer map lives on this task's stack - nothing else touches
//! it, so it needs no lock. NAK and loss deadlines are polled between
//! socket reads; the group socket's read timeout bounds how late they fire.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::error::{BusEvent, PeerId};
use crate::protocol::{Header, NakPacket, Packet, FLAG_UNRECOVERABLE};
use crate::reliability::{DataKind, NakScheduler, PeerTracker, Sample, SeqRange};

use super::subscription::Message;
use super::RxContext;

/// Receive state plus NAK timing for one (peer, session).
struct PeerEntry {
    tracker: PeerTracker,
    nak: NakScheduler,
    /// Source address of the most recent packet; NAKs go back here.
    addr: SocketAddr,
}

/// Largest datagram we will accept. Oversized packets are truncated by the
/// socket and then fail to decode, which is the desired outcome.
const RECV_BUF_LEN: usize = 65_536;

/// Upper bound on sequences serviced per incoming NAK. A request beyond
/// this (only possible from a hostile or corrupted peer; real gaps are
/// bounded by the tracker) is answered partially and simply NAKed again.
const MAX_NAK_SEQUENCES: usize = 4_096;

pub(super) fn run(ctx: RxContext) {
    let mut peers: HashMap<(u32, u16), PeerEntry> = HashMap::new();
    let mut nak_request_id: u32 = 0;
    let mut buf = vec![0u8; RECV_BUF_LEN];

    log::debug!(
        "[Rx] receive loop started peer={:#010x} session={}",
        ctx.local_peer,
        ctx.local_session
    );

    while ctx.running.load(Ordering::SeqCst) {
        // Unicast recovery traffic first: retransmissions should win races
        // against new group data for the same sequences.
        loop {
            match ctx.transport.recv_unicast(&mut buf) {
                Ok(Some((len, src))) => {
                    handle_datagram(&ctx, &mut peers, &mut nak_request_id, &buf[..len], src);
                }
                Ok(None) => break,
                Err(e) => {
                    log::debug!("[Rx] unicast recv error: {}", e);
                    break;
                }
            }
        }

        match ctx.transport.recv_group(&mut buf) {
            Ok(Some((len, src))) => {
                handle_datagram(&ctx, &mut peers, &mut nak_request_id, &buf[..len], src);
            }
            Ok(None) => {}
            Err(e) => {
                if !ctx.running.load(Ordering::SeqCst) {
                    break;
                }
                log::debug!("[Rx] group recv error: {}", e);
            }
        }

        poll_timers(&ctx, &mut peers, &mut nak_request_id);
    }

    log::debug!("[Rx] receive loop stopped");
}

fn handle_datagram(
    ctx: &RxContext,
    peers: &mut HashMap<(u32, u16), PeerEntry>,
    nak_request_id: &mut u32,
    datagram: &[u8],
    src: SocketAddr,
) {
    let packet = match Packet::decode(datagram) {
        Ok(p) => p,
        Err(e) => {
            ctx.metrics.incr_malformed_packets();
            log::debug!("[Rx] dropping malformed packet from {}: {}", src, e);
            return;
        }
    };

    let header = *packet.header();
    // Our own multicast transmissions loop back (loopback is enabled so
    // same-host peers work); never track ourselves.
    if header.peer == ctx.local_peer && header.session == ctx.local_session {
        return;
    }

    match packet {
        Packet::Data(data) => on_data(ctx, peers, data, src),
        Packet::Heartbeat(h) => on_heartbeat(ctx, peers, h, src),
        Packet::Nak(nak) => on_nak(ctx, peers, nak, src, nak_request_id),
    }
}

fn on_data(
    ctx: &RxContext,
    peers: &mut HashMap<(u32, u16), PeerEntry>,
    data: crate::protocol::DataPacket,
    src: SocketAddr,
) {
    let header = data.header;

    let payload = if header.is_encrypted() {
        let Some(cipher) = ctx.cipher.as_ref() else {
            ctx.metrics.incr_malformed_packets();
            log::debug!(
                "[Rx] encrypted payload from {:#010x} but no key configured; dropping",
                header.peer
            );
            return;
        };
        match cipher.decrypt_payload(&data.payload) {
            Ok(clear) => clear,
            Err(e) => {
                ctx.metrics.incr_malformed_packets();
                log::debug!("[Rx] payload decrypt failed from {:#010x}: {}", header.peer, e);
                return;
            }
        }
    } else {
        data.payload
    };

    let now = Instant::now();
    let key = (header.peer, header.session);
    let entry = peers.entry(key).or_insert_with(|| {
        log::debug!(
            "[Rx] new peer {:#010x} session {} from {}",
            header.peer,
            header.session,
            src
        );
        PeerEntry {
            tracker: PeerTracker::new(header.sequence, now),
            nak: new_scheduler(ctx),
            addr: src,
        }
    });
    entry.addr = src;

    let sample = Sample {
        seq: header.sequence,
        topic: data.topic,
        payload,
    };
    let outcome = entry.tracker.on_data(sample, now);

    match outcome.kind {
        DataKind::Duplicate => ctx.metrics.incr_duplicates(),
        DataKind::FilledGap => ctx.metrics.incr_retransmits_received(),
        DataKind::Future => ctx.metrics.incr_out_of_order(),
        DataKind::SessionReset => {
            log::debug!(
                "[Rx] peer {:#010x} jumped outside the reorder window; state reset",
                header.peer
            );
        }
        DataKind::InOrder => {}
    }

    if let Some(gap) = outcome.opened {
        ctx.metrics.record_gap(u64::from(gap.len()));
        entry.nak.on_gap_opened(now);
    }
    if !outcome.lost.is_empty() {
        emit_loss(ctx, header.peer, header.session, outcome.lost.clone());
    }
    dispatch_all(ctx, header.peer, header.session, src, outcome.deliveries);

    if !entry.tracker.has_gaps() {
        entry.nak.on_gaps_cleared();
    }
}

fn on_heartbeat(
    ctx: &RxContext,
    peers: &mut HashMap<(u32, u16), PeerEntry>,
    header: Header,
    src: SocketAddr,
) {
    let now = Instant::now();
    let highest = header.sequence;
    let entry = peers
        .entry((header.peer, header.session))
        .or_insert_with(|| PeerEntry {
            // A late joiner owes nothing the sender published before we
            // arrived; start expecting the next sequence.
            tracker: PeerTracker::new(highest.wrapping_add(1), now),
            nak: new_scheduler(ctx),
            addr: src,
        });
    entry.addr = src;

    if let Some(gap) = entry.tracker.on_heartbeat(highest, now) {
        ctx.metrics.record_gap(u64::from(gap.len()));
        entry.nak.on_gap_opened(now);
    }
}

fn on_nak(
    ctx: &RxContext,
    peers: &mut HashMap<(u32, u16), PeerEntry>,
    nak: NakPacket,
    src: SocketAddr,
    nak_request_id: &mut u32,
) {
    if nak.header.is_unrecoverable() {
        // Sender's answer to our NAK: these ranges are gone for good.
        let key = (nak.target_peer, nak.target_session);
        let Some(entry) = peers.get_mut(&key) else {
            return;
        };
        let (lost, released) = entry.tracker.declare_lost(&nak.ranges);
        if !lost.is_empty() {
            emit_loss(ctx, nak.target_peer, nak.target_session, lost);
            dispatch_all(ctx, nak.target_peer, nak.target_session, entry.addr, released);
        }
        if !entry.tracker.has_gaps() {
            entry.nak.on_gaps_cleared();
        }
        return;
    }

    if nak.target_peer != ctx.local_peer || nak.target_session != ctx.local_session {
        return;
    }

    // Retransmit servicing: resend the exact original bytes, unicast to the
    // requester. The ring lock is held only to copy the payloads out.
    let mut resends: Vec<Vec<u8>> = Vec::new();
    let mut missing: Vec<u32> = Vec::new();
    {
        let mut quota = MAX_NAK_SEQUENCES;
        let send = ctx.send_state.lock();
        'ranges: for range in &nak.ranges {
            for seq in range.iter_sequences() {
                if quota == 0 {
                    log::debug!(
                        "[Rx] NAK from {} exceeds servicing bound; answering partially",
                        src
                    );
                    break 'ranges;
                }
                quota -= 1;
                match send.ring.get(seq) {
                    Some(bytes) => resends.push(bytes.to_vec()),
                    None => missing.push(seq),
                }
            }
        }
    }

    let resent = resends.len() as u64;
    for bytes in resends {
        if let Err(e) = ctx.transport.send_unicast(&bytes, src) {
            log::debug!("[Rx] retransmit to {} failed: {}", src, e);
        }
    }
    if resent > 0 {
        ctx.metrics.incr_retransmits_sent(resent);
    }

    if !missing.is_empty() {
        // Echo the unrecoverable ranges so the requester stops waiting.
        let mut ranges = coalesce(&missing);
        ranges.truncate(ctx.config.max_packet_bytes.saturating_sub(24) / 8);
        *nak_request_id = nak_request_id.wrapping_add(1);
        let echo = Packet::Nak(NakPacket {
            header: Header::new(
                ctx.local_peer,
                ctx.local_session,
                *nak_request_id,
                FLAG_UNRECOVERABLE,
            ),
            target_peer: ctx.local_peer,
            target_session: ctx.local_session,
            ranges,
        });
        if let Err(e) = ctx.transport.send_unicast(&echo.encode(), src) {
            log::debug!("[Rx] unrecoverable echo to {} failed: {}", src, e);
        }
    }
}

fn poll_timers(
    ctx: &RxContext,
    peers: &mut HashMap<(u32, u16), PeerEntry>,
    nak_request_id: &mut u32,
) {
    let now = Instant::now();
    // Headroom for a NAK packet: header + target + count, 8 bytes per range.
    let max_ranges = (ctx.config.max_packet_bytes.saturating_sub(24) / 8).max(1);

    let mut expired: Vec<(u32, u16)> = Vec::new();
    for (&(peer, session), entry) in peers.iter_mut() {
        // Recovery deadline: give up on ranges that stayed missing too long.
        if let Some((lost, released)) = entry
            .tracker
            .expire_deadlines(ctx.config.nak_deadline, now)
        {
            emit_loss(ctx, peer, session, lost);
            dispatch_all(ctx, peer, session, entry.addr, released);
            if !entry.tracker.has_gaps() {
                entry.nak.on_gaps_cleared();
            }
        }

        // NAK due?
        let gaps = entry.tracker.pending_gaps();
        if let Some(mut ranges) = entry.nak.try_flush(&gaps, now) {
            ranges.truncate(max_ranges);
            *nak_request_id = nak_request_id.wrapping_add(1);
            let packet = Packet::Nak(NakPacket {
                header: Header::new(ctx.local_peer, ctx.local_session, *nak_request_id, 0),
                target_peer: peer,
                target_session: session,
                ranges,
            });
            match ctx.transport.send_unicast(&packet.encode(), entry.addr) {
                Ok(()) => {
                    ctx.metrics.incr_naks_sent();
                    entry.nak.on_nak_sent(now);
                }
                Err(e) => {
                    log::debug!("[Rx] NAK to {} failed: {}", entry.addr, e);
                    // Back off anyway so a dead route is not hammered.
                    entry.nak.on_nak_sent(now);
                }
            }
        }

        if entry.tracker.is_idle(ctx.config.peer_idle_timeout, now) {
            expired.push((peer, session));
        }
    }

    for (peer, session) in expired {
        peers.remove(&(peer, session));
        log::debug!("[Rx] peer {:#010x} session {} idle; state reclaimed", peer, session);
        emit_event(ctx, BusEvent::PeerExpired { peer, session });
    }
}

fn new_scheduler(ctx: &RxContext) -> NakScheduler {
    NakScheduler::new(
        ctx.config.nak_initial_delay,
        ctx.config.nak_backoff_base,
        ctx.config.nak_backoff_cap,
    )
}

fn dispatch_all(
    ctx: &RxContext,
    peer: u32,
    session: u16,
    addr: SocketAddr,
    samples: Vec<Sample>,
) {
    let peer_id = PeerId {
        peer,
        session,
        addr,
    };
    for sample in samples {
        ctx.subscriptions.dispatch(&Message {
            topic: sample.topic,
            payload: sample.payload,
            peer: peer_id,
            sequence: sample.seq,
        });
    }
}

fn emit_loss(ctx: &RxContext, peer: u32, session: u16, ranges: Vec<SeqRange>) {
    ctx.metrics.incr_losses_declared(ranges.len() as u64);
    log::warn!(
        "[Rx] declaring {} range(s) from peer {:#010x} permanently lost",
        ranges.len(),
        peer
    );
    emit_event(
        ctx,
        BusEvent::Loss {
            peer,
            session,
            ranges,
        },
    );
}

fn emit_event(ctx: &RxContext, event: BusEvent) {
    if ctx.events.try_send(event).is_err() {
        ctx.metrics.incr_events_dropped();
        log::debug!("[Rx] event channel full; event dropped");
    }
}

/// Collapse a sorted list of sequences into coalesced ranges.
fn coalesce(seqs: &[u32]) -> Vec<SeqRange> {
    let mut ranges: Vec<SeqRange> = Vec::new();
    for &seq in seqs {
        match ranges.last_mut() {
            Some(last) if last.end == seq => last.end = seq.wrapping_add(1),
            _ => ranges.push(SeqRange::from_sequence(seq)),
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesce_merges_adjacent() {
        let ranges = coalesce(&[3, 4, 5, 9, 10, 20]);
        assert_eq!(
            ranges,
            vec![
                SeqRange::new(3, 6),
                SeqRange::new(9, 11),
                SeqRange::from_sequence(20),
            ]
        );
    }

    #[test]
    fn test_coalesce_handles_wrap() {
        let ranges = coalesce(&[u32::MAX, 0, 1]);
        assert_eq!(ranges, vec![SeqRange::new(u32::MAX, 2)]);
    }
}
