//! Public message/event surface: what an application hands to
//! [`crate::peer::Peer::send`] and what it gets back via the listener
//! contracts of spec.md §6.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::peer::Peer;
use std::sync::Arc;

/// A host-local millisecond tick, reconstructed on receive from the remote's
/// low-16-bit tick slice the way spec.md §9 "Clock reconstruction" describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HostTick(pub u64);

/// A message an application wants to send. `Peer::send` copies the flags it
/// carries into the wire `MessageFlags` (spec.md §4.3 step 2).
#[derive(Debug, Clone)]
pub struct Message {
    pub channel: u8,
    pub payload: Bytes,
    pub reliable: bool,
    pub ordered: bool,
    pub unique: bool,
    pub timed: bool,
}

impl Message {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            channel: 0,
            payload: payload.into(),
            reliable: false,
            ordered: false,
            unique: false,
            timed: false,
        }
    }

    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn reliable(mut self) -> Self {
        self.reliable = true;
        self
    }

    pub fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn timed(mut self) -> Self {
        self.timed = true;
        self
    }

    /// Convenience for the common "exactly-once, in-order" combination used
    /// throughout spec.md §8's scenarios.
    pub fn reliable_ordered_unique(payload: impl Into<Bytes>) -> Self {
        Self::new(payload).reliable().ordered().unique()
    }
}

/// A message delivered to [`PeerListener::on_receive`] (spec.md §3
/// `ReceivedMessage`).
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub payload: Bytes,
    pub channel: u8,
    pub attempt: u8,
    pub sequence: Option<u16>,
    pub was_duplicate: bool,
    pub remote_created_ticks: Option<u16>,
    pub remote_sent_ticks: Option<u16>,
    /// Host-local timestamp reconstructed from the remote's tick slice.
    pub timestamp: HostTick,
}

/// Reported via `on_disconnect` (spec.md §6/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Disconnected,
    Terminated,
    Timeout,
    Rejected,
    BadSignature,
    Exception,
    Disposed,
}

/// An inbound handshake REQUEST awaiting `Host::accept`/`Host::reject`
/// (spec.md §4.1/§4.6).
#[derive(Debug, Clone)]
pub struct ConnectionRequest {
    pub remote: SocketAddr,
    pub remote_key: Option<Vec<u8>>,
    pub remote_random: Option<Vec<u8>>,
    pub payload: Bytes,
}

impl ConnectionRequest {
    /// Whether the requester offered a key-exchange public key.
    pub fn encrypted(&self) -> bool {
        self.remote_key.is_some()
    }

    /// Whether the requester offered a random challenge to sign.
    pub fn authenticate(&self) -> bool {
        self.remote_random.as_ref().is_some_and(|r| !r.is_empty())
    }
}

/// Host-level callback contract (spec.md §6 "Host listener callbacks").
///
/// Kept synchronous, the way the teacher's `tracing` calls are synchronous
/// log points rather than awaited hooks: a listener that needs to do real
/// async work should hand off to a channel and return immediately.
pub trait HostListener: Send + Sync {
    fn on_receive_request(&self, _request: &ConnectionRequest) {}
    fn on_receive_unconnected(&self, _remote: SocketAddr, _data: &[u8]) {}
    fn on_receive_broadcast(&self, _remote: SocketAddr, _data: &[u8]) {}
    fn on_receive_socket(&self, _remote: SocketAddr, _data: &[u8]) {}
    fn on_exception(&self, _remote: Option<SocketAddr>, _error: &anyhow::Error) {}
    fn on_shutdown(&self) {}
}

/// Peer-level callback contract (spec.md §6 "Peer listener callbacks").
pub trait PeerListener: Send + Sync {
    fn on_connect(&self, _peer: &Arc<Peer>) {}
    fn on_disconnect(
        &self,
        _peer: &Arc<Peer>,
        _reason: DisconnectReason,
        _payload: Option<&[u8]>,
    ) {
    }
    fn on_receive(&self, _peer: &Arc<Peer>, _message: ReceivedMessage) {}
    fn on_update_rtt(&self, _peer: &Arc<Peer>, _rtt_ms: u16) {}
    fn on_exception(&self, _peer: &Arc<Peer>, _error: &anyhow::Error) {}
}

/// A no-op listener, handy for tests that only care about one side's events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl HostListener for NullListener {}
impl PeerListener for NullListener {}
