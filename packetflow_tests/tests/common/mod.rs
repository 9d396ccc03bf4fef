//! Shared test harness: listeners that forward `Host`/`Peer` callbacks onto
//! `tokio::sync::mpsc` channels so test bodies can `.recv().await` them
//! instead of polling shared state.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use packetflow_core::prelude::*;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone)]
pub enum PeerEvent {
    Connect,
    Disconnect(DisconnectReason, Option<Vec<u8>>),
    Receive(ReceivedMessage),
    Rtt(u16),
    Exception(String),
}

/// Forwards every `PeerListener` callback onto a channel.
pub struct ChannelPeerListener {
    tx: UnboundedSender<PeerEvent>,
}

impl ChannelPeerListener {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<PeerEvent>) {
        let (tx, rx) = unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl PeerListener for ChannelPeerListener {
    fn on_connect(&self, _peer: &Arc<Peer>) {
        let _ = self.tx.send(PeerEvent::Connect);
    }

    fn on_disconnect(&self, _peer: &Arc<Peer>, reason: DisconnectReason, payload: Option<&[u8]>) {
        let _ = self
            .tx
            .send(PeerEvent::Disconnect(reason, payload.map(|p| p.to_vec())));
    }

    fn on_receive(&self, _peer: &Arc<Peer>, message: ReceivedMessage) {
        let _ = self.tx.send(PeerEvent::Receive(message));
    }

    fn on_update_rtt(&self, _peer: &Arc<Peer>, rtt_ms: u16) {
        let _ = self.tx.send(PeerEvent::Rtt(rtt_ms));
    }

    fn on_exception(&self, _peer: &Arc<Peer>, error: &anyhow::Error) {
        let _ = self.tx.send(PeerEvent::Exception(error.to_string()));
    }
}

#[derive(Debug, Clone)]
pub enum HostEvent {
    Unconnected(SocketAddr, Vec<u8>),
    Broadcast(SocketAddr, Vec<u8>),
    Exception(String),
}

pub struct AcceptedPeer {
    pub peer: Arc<Peer>,
    pub events: UnboundedReceiver<PeerEvent>,
}

/// Host listener that accepts every inbound `ConnectionRequest` immediately,
/// handing the resulting `Peer` (plus a fresh event channel for it) back to
/// the test body through `new_peers`.
pub struct AutoAcceptListener {
    host: Mutex<Option<Weak<Host>>>,
    peer_config: PeerConfig,
    new_peers: UnboundedSender<AcceptedPeer>,
    host_events: UnboundedSender<HostEvent>,
}

impl AutoAcceptListener {
    pub fn new(
        peer_config: PeerConfig,
    ) -> (Arc<Self>, UnboundedReceiver<AcceptedPeer>, UnboundedReceiver<HostEvent>) {
        let (peers_tx, peers_rx) = unbounded_channel();
        let (events_tx, events_rx) = unbounded_channel();
        let listener = Arc::new(Self {
            host: Mutex::new(None),
            peer_config,
            new_peers: peers_tx,
            host_events: events_tx,
        });
        (listener, peers_rx, events_rx)
    }

    pub fn bind(&self, host: Weak<Host>) {
        *self.host.lock().unwrap() = Some(host);
    }
}

impl HostListener for AutoAcceptListener {
    fn on_receive_request(&self, request: &ConnectionRequest) {
        let Some(host) = self.host.lock().unwrap().as_ref().and_then(Weak::upgrade) else {
            return;
        };
        let (listener, rx) = ChannelPeerListener::new();
        let peer = host.accept(request, self.peer_config.clone(), listener);
        let _ = self.new_peers.send(AcceptedPeer { peer, events: rx });
    }

    fn on_receive_unconnected(&self, remote: SocketAddr, data: &[u8]) {
        let _ = self.host_events.send(HostEvent::Unconnected(remote, data.to_vec()));
    }

    fn on_receive_broadcast(&self, remote: SocketAddr, data: &[u8]) {
        let _ = self.host_events.send(HostEvent::Broadcast(remote, data.to_vec()));
    }

    fn on_exception(&self, _remote: Option<SocketAddr>, error: &anyhow::Error) {
        let _ = self.host_events.send(HostEvent::Exception(error.to_string()));
    }
}

/// Host listener that rejects every inbound request with a fixed payload.
pub struct AutoRejectListener {
    host: Mutex<Option<Weak<Host>>>,
    payload: Vec<u8>,
}

impl AutoRejectListener {
    pub fn new(payload: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            host: Mutex::new(None),
            payload,
        })
    }

    pub fn bind(&self, host: Weak<Host>) {
        *self.host.lock().unwrap() = Some(host);
    }
}

impl HostListener for AutoRejectListener {
    fn on_receive_request(&self, request: &ConnectionRequest) {
        let Some(host) = self.host.lock().unwrap().as_ref().and_then(Weak::upgrade) else {
            return;
        };
        let payload = self.payload.clone();
        let request = request.clone();
        tokio::spawn(async move {
            let _ = host.reject(&request, Some(&payload)).await;
        });
    }
}

/// Fast timings so integration tests don't spend real wall-clock minutes on
/// `connect_attempts`/`resend_count` loops; still realistic relative to each
/// other (resend_delay_min < resend_delay_max, etc).
pub fn fast_peer_config() -> PeerConfig {
    PeerConfig {
        send_delay_ms: 5,
        connect_attempts: 20,
        connect_delay_ms: 50,
        resend_count: 30,
        resend_delay_min_ms: 20,
        resend_delay_max_ms: 150,
        resend_delay_jitter_ms: 5,
        fragment_timeout_ms: 2_000,
        duplicate_timeout_ms: 2_000,
        ordered_delay_timeout_ms: 100,
        disconnect_delay_ms: 30,
        ping_delay_ms: 60_000,
        ..PeerConfig::default()
    }
}

pub fn loopback_host_config() -> HostConfig {
    HostConfig {
        port: 0,
        ..HostConfig::default()
    }
}

pub async fn spawn_auto_accept_host(
    host_cfg: HostConfig,
    peer_cfg: PeerConfig,
) -> (Arc<Host>, UnboundedReceiver<AcceptedPeer>, UnboundedReceiver<HostEvent>) {
    let (listener, peer_rx, host_rx) = AutoAcceptListener::new(peer_cfg);
    let host = Host::new(host_cfg, HostCapabilities::default(), listener.clone())
        .await
        .expect("host bind");
    listener.bind(Arc::downgrade(&host));
    (host, peer_rx, host_rx)
}

pub async fn recv_timeout<T>(rx: &mut UnboundedReceiver<T>, millis: u64) -> Option<T> {
    tokio::time::timeout(Duration::from_millis(millis), rx.recv())
        .await
        .ok()
        .flatten()
}

pub async fn expect_connect(rx: &mut UnboundedReceiver<PeerEvent>) {
    match recv_timeout(rx, 5_000).await {
        Some(PeerEvent::Connect) => {}
        other => panic!("expected Connect, got {other:?}"),
    }
}

pub struct ConnectedPair {
    pub host_a: Arc<Host>,
    pub peer_a: Arc<Peer>,
    pub events_a: UnboundedReceiver<PeerEvent>,
    pub host_b: Arc<Host>,
    pub peer_b: Arc<Peer>,
    pub events_b: UnboundedReceiver<PeerEvent>,
}

/// Spins up two hosts on loopback, connects A to B, and waits for both
/// `on_connect` callbacks before returning.
pub async fn connect_pair(host_cfg: HostConfig, peer_cfg: PeerConfig) -> ConnectedPair {
    let (host_b, mut new_peers, _host_events) =
        spawn_auto_accept_host(host_cfg.clone(), peer_cfg.clone()).await;
    let addr_b = host_b.local_addr().unwrap();

    let (host_a, _new_peers_a, _host_events_a) = spawn_auto_accept_host(host_cfg, peer_cfg.clone()).await;

    let (listener_a, mut events_a) = ChannelPeerListener::new();
    let peer_a = host_a.connect(addr_b, peer_cfg, listener_a, None);
    expect_connect(&mut events_a).await;

    let accepted = recv_timeout(&mut new_peers, 5_000)
        .await
        .expect("server should have accepted a peer");
    let mut events_b = accepted.events;
    expect_connect(&mut events_b).await;

    ConnectedPair {
        host_a,
        peer_a,
        events_a,
        host_b,
        peer_b: accepted.peer,
        events_b,
    }
}
