//! `Host`: socket owner, peer registry, receive loop (spec.md §4.1).
//!
//! Mirrors the shape of `engine_server::server::GameServer` — a struct that
//! owns the socket(s) plus a tick counter, with a `run`-style receive loop
//! spawned onto the runtime and dispatch by leading packet byte.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Instant;

use anyhow::Context;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::alloc::{Allocator, AllocatorConfig};
use crate::config::{HostCapabilities, HostConfig, PeerConfig};
use crate::event::{ConnectionRequest, DisconnectReason, HostListener, PeerListener};
use crate::peer::Peer;
use crate::stats::HostStats;
use crate::wire::{decode_datagram, decode_packet_header, PacketType};

/// Process-wide owner of a UDP socket and the peers connected through it
/// (spec.md §3 "Host").
pub struct Host {
    socket: UdpSocket,
    config: HostConfig,
    capabilities: HostCapabilities,
    allocator: Arc<Allocator>,
    peers: DashMap<SocketAddr, Arc<Peer>>,
    listener: Arc<dyn HostListener>,
    stats: HostStats,
    started_at: Instant,
    /// Monotonic millisecond clock, sampled off `started_at` rather than
    /// wall-clock time so it is immune to clock adjustments.
    tick_epoch: Instant,
    dispose_token: CancellationToken,
    disposed: std::sync::atomic::AtomicBool,
}

impl Host {
    /// Binds the configured UDP endpoint and starts the receive loop.
    pub async fn new(
        config: HostConfig,
        capabilities: HostCapabilities,
        listener: Arc<dyn HostListener>,
    ) -> anyhow::Result<Arc<Self>> {
        let bind_addr: SocketAddr = if config.dual_mode {
            format!("[::]:{}", config.port).parse()?
        } else {
            format!("0.0.0.0:{}", config.port).parse()?
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("udp bind {bind_addr}"))?;
        if config.broadcast {
            socket.set_broadcast(true).context("enable broadcast")?;
        }

        let allocator = Arc::new(Allocator::new(AllocatorConfig {
            pooled_count: config.allocator_count,
            pooled_length: config.allocator_pooled_length,
            pooled_expand_length: config.allocator_pooled_expand_length,
            expand_length: config.allocator_expand_length,
            max_length: config.allocator_max_length,
        }));

        let host = Arc::new(Self {
            socket,
            config,
            capabilities,
            allocator,
            peers: DashMap::new(),
            listener,
            stats: HostStats::default(),
            started_at: Instant::now(),
            tick_epoch: Instant::now(),
            dispose_token: CancellationToken::new(),
            disposed: std::sync::atomic::AtomicBool::new(false),
        });

        // `receive_count` workers race `recv_from` on the same socket; tokio's
        // `UdpSocket::recv_from` takes `&self`, so this needs no SO_REUSEPORT
        // trick, just concurrent tasks sharing the one bound socket.
        for _ in 0..host.config.receive_count.max(1) {
            let receive_host = Arc::clone(&host);
            tokio::spawn(async move {
                receive_host.receive_loop().await;
            });
        }

        Ok(host)
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &HostCapabilities {
        &self.capabilities
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    pub fn stats(&self) -> &HostStats {
        &self.stats
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn dispose_token(&self) -> &CancellationToken {
        &self.dispose_token
    }

    /// Low-16-bit tick slice of the host's monotonic millisecond clock
    /// (spec.md §6 "Tick slice").
    pub fn tick_low16(&self) -> u16 {
        (self.tick_epoch.elapsed().as_millis() as u64) as u16
    }

    pub fn tick_ms(&self) -> u64 {
        self.tick_epoch.elapsed().as_millis() as u64
    }

    pub async fn send_datagram(&self, to: SocketAddr, bytes: &[u8]) -> anyhow::Result<()> {
        self.socket.send_to(bytes, to).await.context("udp send")?;
        self.stats.datagrams_sent.incr();
        self.stats.bytes_sent.add(bytes.len() as u64);
        Ok(())
    }

    /// Initiates an outbound connection (spec.md §4.1 `connect`).
    pub fn connect(
        self: &Arc<Self>,
        remote: SocketAddr,
        peer_config: PeerConfig,
        peer_listener: Arc<dyn PeerListener>,
        connect_payload: Option<Vec<u8>>,
    ) -> Arc<Peer> {
        let peer = Peer::new_outbound(Arc::downgrade(self), remote, peer_config, peer_listener);
        self.peers.insert(remote, Arc::clone(&peer));
        Peer::spawn_connect(Arc::clone(&peer), connect_payload);
        peer
    }

    /// Reciprocates a pending inbound `ConnectionRequest` (spec.md §4.1
    /// `accept`).
    pub fn accept(
        self: &Arc<Self>,
        request: &ConnectionRequest,
        peer_config: PeerConfig,
        peer_listener: Arc<dyn PeerListener>,
    ) -> Arc<Peer> {
        let peer = Peer::new_inbound(Arc::downgrade(self), request.remote, peer_config, peer_listener);
        self.peers.insert(request.remote, Arc::clone(&peer));
        Peer::spawn_accept(Arc::clone(&peer), request.clone());
        peer
    }

    /// Sends REJECT to a pending inbound request (spec.md §4.1 `reject`).
    pub async fn reject(&self, request: &ConnectionRequest, payload: Option<&[u8]>) -> anyhow::Result<()> {
        use crate::wire::{encode_datagram, DatagramHeader, PacketFlags};
        let header = DatagramHeader {
            ty: PacketType::Reject,
            crc_enabled: self.config.crc32,
            fragment: None,
            tick: None,
            extra_flags: PacketFlags::empty(),
        };
        let body = payload.unwrap_or(&[]);
        let datagram = encode_datagram(header, body);
        self.send_datagram(request.remote, &datagram).await
    }

    pub async fn send_unconnected(&self, remote: SocketAddr, data: &[u8]) -> anyhow::Result<()> {
        use crate::wire::{encode_datagram, DatagramHeader, PacketFlags};
        let header = DatagramHeader {
            ty: PacketType::Unconnected,
            crc_enabled: self.config.crc32,
            fragment: None,
            tick: None,
            extra_flags: PacketFlags::empty(),
        };
        let datagram = encode_datagram(header, data);
        self.send_datagram(remote, &datagram).await
    }

    pub async fn send_broadcast(&self, port: u16, data: &[u8]) -> anyhow::Result<()> {
        use crate::wire::{encode_datagram, DatagramHeader, PacketFlags};
        let header = DatagramHeader {
            ty: PacketType::Broadcast,
            crc_enabled: self.config.crc32,
            fragment: None,
            tick: None,
            extra_flags: PacketFlags::empty(),
        };
        let datagram = encode_datagram(header, data);
        let target: SocketAddr = format!("255.255.255.255:{port}").parse()?;
        self.send_datagram(target, &datagram).await
    }

    /// Fire-and-forget send to every connected peer except `excluded`.
    pub async fn send_all(&self, excluded: &[SocketAddr], data: &[u8]) {
        for entry in self.peers.iter() {
            if excluded.contains(entry.key()) {
                continue;
            }
            if let Err(err) = self.send_datagram(*entry.key(), data).await {
                self.listener.on_exception(Some(*entry.key()), &err.into());
            }
        }
    }

    pub(crate) fn remove_peer(&self, remote: &SocketAddr) {
        self.peers.remove(remote);
    }

    pub fn peer(&self, remote: &SocketAddr) -> Option<Arc<Peer>> {
        self.peers.get(remote).map(|e| e.clone())
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];
        loop {
            tokio::select! {
                _ = self.dispose_token.cancelled() => {
                    debug!("host receive loop cancelled");
                    return;
                }
                recv = self.socket.recv_from(&mut buf) => {
                    match recv {
                        Ok((n, remote)) => {
                            self.stats.datagrams_received.incr();
                            self.stats.bytes_received.add(n as u64);
                            self.handle_datagram(remote, &buf[..n]).await;
                        }
                        Err(err) => {
                            warn!(error = %err, "host socket recv error");
                            self.listener.on_exception(None, &anyhow::Error::from(err));
                        }
                    }
                }
            }
        }
    }

    async fn handle_datagram(self: &Arc<Self>, remote: SocketAddr, data: &[u8]) {
        let Some(&first_byte) = data.first() else {
            return;
        };
        let Ok((ty, _flags)) = decode_packet_header(first_byte) else {
            self.stats.malformed_packets.incr();
            return;
        };

        match ty {
            PacketType::Request => {
                self.stats.connection_requests_received.incr();
                match crate::peer::handshake::parse_request_verified(data, remote, self.config.crc32) {
                    Ok(request) => self.listener.on_receive_request(&request),
                    Err(err) => {
                        self.stats.malformed_packets.incr();
                        self.listener.on_exception(Some(remote), &err.into());
                    }
                }
            }
            PacketType::Unconnected => match decode_datagram(data, self.config.crc32) {
                Ok(decoded) => self.listener.on_receive_unconnected(remote, decoded.body),
                Err(err) => {
                    self.stats.malformed_packets.incr();
                    self.listener.on_exception(Some(remote), &err.into());
                }
            },
            PacketType::Broadcast => match decode_datagram(data, self.config.crc32) {
                Ok(decoded) => self.listener.on_receive_broadcast(remote, decoded.body),
                Err(err) => {
                    self.stats.malformed_packets.incr();
                    self.listener.on_exception(Some(remote), &err.into());
                }
            },
            PacketType::Connected | PacketType::Accept | PacketType::Reject => {
                if let Some(peer) = self.peers.get(&remote).map(|e| e.clone()) {
                    peer.on_receive_async(data.to_vec()).await;
                } else {
                    self.listener.on_receive_socket(remote, data);
                }
            }
            PacketType::Unused1 | PacketType::Unused2 => {
                self.listener.on_receive_socket(remote, data);
            }
        }
    }

    /// Immediately disposes every peer and the host itself (spec.md §4.1
    /// `dispose`).
    pub async fn dispose(self: &Arc<Self>) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let peers: Vec<Arc<Peer>> = self.peers.iter().map(|e| e.value().clone()).collect();
        for peer in peers {
            peer.dispose(DisconnectReason::Disposed).await;
        }
        self.dispose_token.cancel();
        self.listener.on_shutdown();
    }

    /// Gracefully disconnects every peer before tearing the socket down
    /// (spec.md §4.1 `shutdown`).
    pub async fn shutdown(self: &Arc<Self>) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let peers: Vec<Arc<Peer>> = self.peers.iter().map(|e| e.value().clone()).collect();
        for peer in peers {
            peer.disconnect().await;
        }
        self.dispose_token.cancel();
        self.listener.on_shutdown();
    }
}

pub(crate) type HostWeak = Weak<Host>;
