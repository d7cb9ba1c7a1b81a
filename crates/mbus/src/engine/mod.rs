// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The bus engine: public API, send path, and background tasks.
//!
//! One [`Bus`] owns a receive thread (packet intake, peer tracking, ordered
//! dispatch, NAK servicing) and a timer thread (heartbeats, ring aging).
//! The publish path runs on the caller's thread and synchronizes only on
//! the send-side sequence counter and retransmit ring.

mod rx;
mod subscription;

pub use subscription::{Message, SubscriptionId, SubscriptionTable};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::cipher::Blowfish;
use crate::config::{BusConfig, EVENT_CHANNEL_CAPACITY, RECV_POLL_INTERVAL};
use crate::error::{BusEvent, Error, Result};
use crate::protocol::{DataPacket, Header, Packet, FLAG_ENCRYPTED, HEADER_LEN};
use crate::reliability::{BusMetrics, MetricsSnapshot, RetransmitRing, SeqNumGenerator};
use crate::topic::{self, TopicFilter};
use crate::transport::UdpTransport;

/// Send-side state: the sequence counter and the retransmit ring, guarded
/// together so a claimed sequence is always retained before anyone can NAK
/// it.
pub(crate) struct SendState {
    pub seq: SeqNumGenerator,
    pub ring: RetransmitRing,
    /// Set by publish, cleared by the heartbeat tick. Idle senders stay
    /// silent.
    pub published_since_heartbeat: bool,
}

/// Everything the receive loop needs, bundled for the thread.
pub(crate) struct RxContext {
    pub transport: Arc<UdpTransport>,
    pub subscriptions: Arc<SubscriptionTable>,
    pub cipher: Option<Arc<Blowfish>>,
    pub metrics: Arc<BusMetrics>,
    pub running: Arc<AtomicBool>,
    pub send_state: Arc<Mutex<SendState>>,
    pub events: Sender<BusEvent>,
    pub local_peer: u32,
    pub local_session: u16,
    pub config: BusConfig,
}

/// A reliable sequenced multicast message bus.
///
/// # Example
///
/// ```rust,no_run
/// use mbus::{Bus, BusConfig};
///
/// let bus = Bus::open(BusConfig::default())?;
/// bus.subscribe("metrics.>", |msg| {
///     println!("{}: {} bytes", msg.topic, msg.payload.len());
/// })?;
/// bus.publish("metrics.cpu", &[0x01])?;
/// # Ok::<(), mbus::Error>(())
/// ```
///
/// Callbacks run on the receive thread: per-peer ordered delivery stalls
/// while a callback runs, so they must not block indefinitely. `close`
/// must not be called from inside a callback.
pub struct Bus {
    config: BusConfig,
    transport: Arc<UdpTransport>,
    subscriptions: Arc<SubscriptionTable>,
    cipher: Option<Arc<Blowfish>>,
    metrics: Arc<BusMetrics>,
    running: Arc<AtomicBool>,
    send_state: Arc<Mutex<SendState>>,
    events_rx: Receiver<BusEvent>,
    local_peer: u32,
    local_session: u16,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Bus {
    /// Join the multicast group, derive cipher state if a key is
    /// configured, and start the receive and timer threads.
    ///
    /// Fails fast with [`Error::InvalidConfig`] before any socket is
    /// touched when the configuration is unusable.
    pub fn open(config: BusConfig) -> Result<Self> {
        config.validate()?;

        let cipher = match config.cipher_key.as_deref() {
            Some(key) => Some(Arc::new(Blowfish::new(key)?)),
            None => None,
        };

        let transport = Arc::new(UdpTransport::open(
            config.group_addr,
            config.group_port,
            RECV_POLL_INTERVAL,
        )?);

        let (local_peer, local_session) = derive_identity(transport.unicast_addr()?);
        log::info!(
            "[Bus] open group={} peer={:#010x} session={} encrypted={}",
            transport.group_addr(),
            local_peer,
            local_session,
            cipher.is_some()
        );

        let subscriptions = Arc::new(SubscriptionTable::new());
        let metrics = Arc::new(BusMetrics::new());
        let running = Arc::new(AtomicBool::new(true));
        let send_state = Arc::new(Mutex::new(SendState {
            seq: SeqNumGenerator::new(),
            ring: RetransmitRing::new(config.retransmit_ring_size),
            published_since_heartbeat: false,
        }));
        let (events_tx, events_rx) = bounded(EVENT_CHANNEL_CAPACITY);

        let rx_ctx = RxContext {
            transport: Arc::clone(&transport),
            subscriptions: Arc::clone(&subscriptions),
            cipher: cipher.clone(),
            metrics: Arc::clone(&metrics),
            running: Arc::clone(&running),
            send_state: Arc::clone(&send_state),
            events: events_tx,
            local_peer,
            local_session,
            config: config.clone(),
        };
        let rx_thread = std::thread::Builder::new()
            .name("mbus-rx".into())
            .spawn(move || rx::run(rx_ctx))?;

        let hb_thread = {
            let transport = Arc::clone(&transport);
            let send_state = Arc::clone(&send_state);
            let metrics = Arc::clone(&metrics);
            let running = Arc::clone(&running);
            let interval = config.heartbeat_interval;
            let ring_max_age = config.nak_deadline * 2;
            std::thread::Builder::new()
                .name("mbus-timer".into())
                .spawn(move || {
                    heartbeat_loop(
                        &transport,
                        &send_state,
                        &metrics,
                        &running,
                        interval,
                        ring_max_age,
                        local_peer,
                        local_session,
                    );
                })?
        };

        Ok(Self {
            config,
            transport,
            subscriptions,
            cipher,
            metrics,
            running,
            send_state,
            events_rx,
            local_peer,
            local_session,
            threads: Mutex::new(vec![rx_thread, hb_thread]),
        })
    }

    /// Publish `payload` on `topic` to the group.
    ///
    /// Returns the assigned sequence number. A transport-level send failure
    /// comes back as [`Error::SendFailed`], but the packet is already
    /// retained in the retransmit ring, so receivers that detect the gap
    /// can still recover it.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> Result<u32> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        topic::split_topic(topic)?;

        let (wire_payload, flags) = match &self.cipher {
            Some(cipher) => (cipher.encrypt_payload(payload), FLAG_ENCRYPTED),
            None => (payload.to_vec(), 0),
        };

        let total = HEADER_LEN + 2 + topic.len() + 4 + wire_payload.len();
        if total > self.config.max_packet_bytes {
            return Err(Error::SendFailed(format!(
                "packet is {} bytes, limit is {}",
                total, self.config.max_packet_bytes
            )));
        }

        let (seq, bytes) = {
            let mut send = self.send_state.lock();
            let seq = send.seq.next();
            let packet = Packet::Data(DataPacket {
                header: Header::new(self.local_peer, self.local_session, seq, flags),
                topic: topic.to_string(),
                payload: wire_payload,
            });
            let bytes = packet.encode();
            send.ring.insert(seq, bytes.clone(), Instant::now());
            send.published_since_heartbeat = true;
            (seq, bytes)
        };

        self.transport.send_to_group(&bytes)?;
        Ok(seq)
    }

    /// Subscribe `callback` to topics matching `pattern`.
    ///
    /// The callback receives matching messages in per-publisher sequence
    /// order, on the receive thread.
    pub fn subscribe<F>(&self, pattern: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let filter = TopicFilter::new(pattern)?;
        Ok(self.subscriptions.insert(filter, Arc::new(callback)))
    }

    /// Remove a subscription. Returns whether it existed; a dispatch
    /// already in flight for it may still fire once.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(self.subscriptions.remove(id))
    }

    /// Stream of out-of-band events: permanent losses and peer expiry.
    ///
    /// The channel is bounded; events beyond the capacity are dropped and
    /// counted in [`Bus::metrics`].
    pub fn events(&self) -> Receiver<BusEvent> {
        self.events_rx.clone()
    }

    /// Point-in-time metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// This bus's (peer, session) identity as carried in every packet.
    pub fn identity(&self) -> (u32, u16) {
        (self.local_peer, self.local_session)
    }

    /// Whether the bus is still open.
    pub fn is_open(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop both background threads, leave the group, and release the
    /// sockets. Idempotent; pending deliveries are dropped.
    pub fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        log::info!("[Bus] closing peer={:#010x}", self.local_peer);
        let handles: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                log::error!("[Bus] background thread panicked during close");
            }
        }
        self.send_state.lock().ring.clear();
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("group", &self.transport.group_addr())
            .field("peer", &self.local_peer)
            .field("session", &self.local_session)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Timer task: periodic heartbeats (only after fresh publishes) and ring
/// age eviction. Sleeps in short slices so `close` is prompt.
#[allow(clippy::too_many_arguments)]
fn heartbeat_loop(
    transport: &UdpTransport,
    send_state: &Mutex<SendState>,
    metrics: &BusMetrics,
    running: &AtomicBool,
    interval: Duration,
    ring_max_age: Duration,
    local_peer: u32,
    local_session: u16,
) {
    let mut last_tick = Instant::now();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(RECV_POLL_INTERVAL);
        if last_tick.elapsed() < interval {
            continue;
        }
        last_tick = Instant::now();

        let heartbeat = {
            let mut send = send_state.lock();
            send.ring.purge_older_than(ring_max_age, last_tick);
            if !send.published_since_heartbeat {
                None
            } else {
                send.published_since_heartbeat = false;
                send.seq.highest_assigned().map(|highest| {
                    Packet::Heartbeat(Header::new(local_peer, local_session, highest, 0))
                })
            }
        };

        if let Some(packet) = heartbeat {
            match transport.send_to_group(&packet.encode()) {
                Ok(()) => metrics.incr_heartbeats_sent(),
                Err(e) => log::debug!("[Bus] heartbeat send failed: {}", e),
            }
        }
    }
}

/// Derive the (peer, session) identity for this open.
///
/// The peer id hashes only the unicast socket address and the process id,
/// so it is stable for a given endpoint: reopening from the same address
/// yields the same peer. The session id mixes in the clock so each open
/// starts a fresh sequence space. Session 0 is reserved.
fn derive_identity(addr: SocketAddr) -> (u32, u16) {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    addr.hash(&mut hasher);
    std::process::id().hash(&mut hasher);
    let h = hasher.finish();
    let peer = (h >> 32) as u32 ^ h as u32;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut session = (nanos as u16) ^ ((nanos >> 16) as u16) ^ ((nanos >> 32) as u16);
    if session == 0 {
        session = 1;
    }
    (peer, session)
}
