//! `Peer`: the per-connection state machine (spec.md §3 "Peer", §4.3-§4.6).
//!
//! Submodules split the peer the way spec.md's component table splits it:
//! [`handshake`] drives CONNECTING_OUT/PENDING_REQUEST → CONNECTED, [`outgoing`]
//! is the aggregate/compress/encrypt/fragment/send pipeline, [`incoming`] is
//! its mirror, and [`channels`] holds the per-channel sequence/ordering/
//! duplicate/fragment state shared by both directions.

pub mod channels;
pub mod handshake;
pub mod incoming;
pub mod outgoing;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PeerConfig;
use crate::crypto::{Encryptor, KeyExchanger};
use crate::event::{ConnectionRequest, DisconnectReason, Message, PeerListener};
use crate::host::{Host, HostWeak};
use crate::stats::PeerStats;

use channels::{FragmentState, OrderState, SequenceState, UniqueSet};
use outgoing::{FlushState, ReliablesMap};

/// States of spec.md §4.6's handshake state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    ConnectingOut,
    PendingRequest,
    Connected,
    Disconnecting,
    Disposed,
}

/// Handshake-scoped state guarded by `ConnectLock` (spec.md §5): the
/// in-progress key exchanger, the random challenge we sent (kept until the
/// ACCEPT's signature is checked against it), and the pinger task handle.
#[derive(Default)]
pub(crate) struct ConnectState {
    pub exchanger: Option<Box<dyn KeyExchanger>>,
    pub our_random: Vec<u8>,
    pub pinger: Option<JoinHandle<()>>,
}

/// One end of a logical connection to a remote [`Host`] (spec.md §3 "Peer").
pub struct Peer {
    self_weak: Mutex<Weak<Peer>>,
    host: HostWeak,
    pub(crate) remote: SocketAddr,
    pub(crate) config: PeerConfig,
    pub(crate) listener: Arc<dyn PeerListener>,

    state: Mutex<PeerState>,
    pub(crate) connected: AtomicBool,
    disposed: AtomicBool,

    pub(crate) rtt_ms: AtomicU16,
    pub(crate) time_delta: AtomicU16,

    pub(crate) seq: SequenceState,
    pub(crate) unique: UniqueSet,
    pub(crate) fragment: Mutex<FragmentState>,
    pub(crate) order: OrderState,
    pub(crate) fragment_id_counter: AtomicU16,

    pub(crate) reliables: Mutex<ReliablesMap>,
    pub(crate) flush: Mutex<FlushState>,
    pub(crate) connect: Mutex<ConnectState>,
    pub(crate) encryptor: Mutex<Option<Arc<dyn Encryptor>>>,

    pub(crate) dispose_token: CancellationToken,
    pub(crate) stats: PeerStats,
}

impl Peer {
    fn new(
        host: HostWeak,
        remote: SocketAddr,
        config: PeerConfig,
        listener: Arc<dyn PeerListener>,
        initial: PeerState,
    ) -> Arc<Self> {
        let peer = Arc::new(Self {
            self_weak: Mutex::new(Weak::new()),
            host,
            remote,
            config,
            listener,
            state: Mutex::new(initial),
            connected: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            rtt_ms: AtomicU16::new(0),
            time_delta: AtomicU16::new(0),
            seq: SequenceState::new(),
            unique: UniqueSet::new(),
            fragment: Mutex::new(FragmentState::new()),
            order: OrderState::new(),
            fragment_id_counter: AtomicU16::new(0),
            reliables: Mutex::new(ReliablesMap::new()),
            flush: Mutex::new(FlushState::default()),
            connect: Mutex::new(ConnectState::default()),
            encryptor: Mutex::new(None),
            dispose_token: CancellationToken::new(),
            stats: PeerStats::default(),
        });
        *peer.self_weak.lock() = Arc::downgrade(&peer);
        spawn_fragment_sweeper(&peer);
        peer
    }

    pub(crate) fn new_outbound(
        host: HostWeak,
        remote: SocketAddr,
        config: PeerConfig,
        listener: Arc<dyn PeerListener>,
    ) -> Arc<Self> {
        Self::new(host, remote, config, listener, PeerState::ConnectingOut)
    }

    pub(crate) fn new_inbound(
        host: HostWeak,
        remote: SocketAddr,
        config: PeerConfig,
        listener: Arc<dyn PeerListener>,
    ) -> Arc<Self> {
        Self::new(host, remote, config, listener, PeerState::PendingRequest)
    }

    pub(crate) fn spawn_connect(peer: Arc<Peer>, payload: Option<Vec<u8>>) {
        tokio::spawn(async move { handshake::run_connect(peer, payload).await });
    }

    pub(crate) fn spawn_accept(peer: Arc<Peer>, request: ConnectionRequest) {
        tokio::spawn(async move { handshake::run_accept(peer, request).await });
    }

    pub(crate) fn host(&self) -> Option<Arc<Host>> {
        self.host.upgrade()
    }

    pub(crate) fn upgrade_self(&self) -> Option<Arc<Peer>> {
        self.self_weak.lock().upgrade()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn state(&self) -> PeerState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, s: PeerState) {
        *self.state.lock() = s;
    }

    pub(crate) fn host_tick_ms(&self) -> u64 {
        self.host().map(|h| h.tick_ms()).unwrap_or(0)
    }

    /// Entry point for a datagram the [`Host`] has routed to this peer.
    pub(crate) async fn on_receive_async(self: &Arc<Self>, data: Vec<u8>) {
        incoming::on_receive_async(self, data).await;
    }

    /// Public handle for the remote endpoint this peer talks to.
    pub fn remote_endpoint(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.state() == PeerState::Connected
    }

    pub fn stats(&self) -> &PeerStats {
        &self.stats
    }

    /// Estimated net messages lost on `channel` so far: positive when
    /// observed sequences have jumped ahead of the expected next one,
    /// decremented back when a late (previously counted lost) message
    /// arrives (spec.md §4.4 "Update per-channel lost-message estimator").
    pub fn lost_estimate(&self, channel: u8) -> i64 {
        self.seq.lost(channel)
    }

    /// Current smoothed round-trip time, last updated by an ACK carrying
    /// `attempt == 0` on both sides (spec.md §4.4 "ACKNOWLEDGE").
    pub fn rtt_ms(&self) -> u16 {
        self.rtt_ms.load(Ordering::Relaxed)
    }

    /// Low-16-bit clock skew against the remote, derived the same way
    /// (spec.md §9 "Clock reconstruction").
    pub fn time_delta(&self) -> u16 {
        self.time_delta.load(Ordering::Relaxed)
    }

    /// Enqueues `message` for the outgoing pipeline (spec.md §4.3 `send`).
    /// Returns the allocated sequence number.
    pub fn send(self: &Arc<Self>, message: Message) -> u16 {
        outgoing::send(self, message)
    }

    /// Gracefully disconnects: sends DISCONNECT, waits `disconnect_delay`,
    /// then disposes (spec.md §4.4 "DISCONNECT").
    pub async fn disconnect(self: &Arc<Self>) {
        if self.is_disposed() {
            return;
        }
        self.set_state(PeerState::Disconnecting);
        outgoing::send_disconnect_now(self).await;
        tokio::time::sleep(self.config.disconnect_delay()).await;
        self.terminate(DisconnectReason::Disconnected, None).await;
    }

    /// Immediate teardown (spec.md §4.1 `dispose`, §7 "Idempotent dispose").
    pub async fn dispose(self: &Arc<Self>, reason: DisconnectReason) {
        self.terminate(reason, None).await;
    }

    /// Single terminal state transition, guaranteed to invoke
    /// `on_disconnect` exactly once per peer lifetime (spec.md §7).
    pub(crate) async fn terminate(self: &Arc<Self>, reason: DisconnectReason, payload: Option<Vec<u8>>) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(PeerState::Disposed);
        self.connected.store(false, Ordering::SeqCst);
        handshake::stop_pinger(self);
        outgoing::cancel_all_reliables(self);
        self.dispose_token.cancel();
        if let Some(host) = self.host() {
            host.remove_peer(&self.remote);
        }
        self.listener.on_disconnect(self, reason, payload.as_deref());
    }
}

/// Periodically clears a stale in-progress fragment reassembly (spec.md §3
/// "a timeout token", §4.4 step 3 "cancelled and recreated on first part").
/// Modeled as a sweep rather than a literal per-fragment timer task: the
/// behavioral contract is identical (buffers older than `fragment_timeout`
/// are dropped) and a sweep needs no cancel/recreate bookkeeping.
fn spawn_fragment_sweeper(peer: &Arc<Peer>) {
    let peer = Arc::clone(peer);
    tokio::spawn(async move {
        let timeout = peer.config.fragment_timeout();
        let interval = (timeout / 2).max(Duration::from_millis(50));
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = peer.dispose_token.cancelled() => return,
            }
            peer.fragment.lock().clear_if_stale(timeout);
        }
    });
}
