//! Handshake wire codec and state machine (spec.md §4.6).

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::crypto::KeyExchanger;
use crate::error::{Result, TransportError};
use crate::event::{ConnectionRequest, DisconnectReason};
use crate::wire::{decode_datagram, encode_datagram, DatagramHeader, PacketFlags, PacketType, Reader, Writer};

use super::{Peer, PeerState};

/// `key[key_length] || random[random_length] || app_payload` — shared shape
/// of REQUEST and ACCEPT bodies (spec.md §4.2).
fn split_handshake_body(body: &[u8]) -> Result<(&[u8], &[u8], &[u8])> {
    let mut r = Reader::new(body);
    let key_len = r.u16()? as usize;
    let random_len = r.u16()? as usize;
    let key = r.bytes(key_len)?;
    let random = r.bytes(random_len)?;
    let payload = r.rest();
    Ok((key, random, payload))
}

fn encode_handshake_body(key: &[u8], random: &[u8], app_payload: &[u8]) -> bytes::BytesMut {
    let mut w = Writer::with_capacity(4 + key.len() + random.len() + app_payload.len());
    w.u16(key.len() as u16);
    w.u16(random.len() as u16);
    w.bytes(key);
    w.bytes(random);
    w.bytes(app_payload);
    w.into_bytes_mut()
}

fn encode_handshake_packet(ty: PacketType, crc_enabled: bool, body: &[u8]) -> bytes::BytesMut {
    encode_datagram(
        DatagramHeader {
            ty,
            crc_enabled,
            fragment: None,
            tick: None,
            extra_flags: PacketFlags::empty(),
        },
        body,
    )
}

pub(crate) fn parse_request_verified(
    data: &[u8],
    remote: SocketAddr,
    verify_crc: bool,
) -> Result<ConnectionRequest> {
    let decoded = decode_datagram(data, verify_crc)?;
    let (key, random, payload) = split_handshake_body(decoded.body)?;
    Ok(ConnectionRequest {
        remote,
        remote_key: if key.is_empty() { None } else { Some(key.to_vec()) },
        remote_random: if random.is_empty() { None } else { Some(random.to_vec()) },
        payload: Bytes::copy_from_slice(payload),
    })
}

struct DecodedAccept {
    remote_key: Option<Vec<u8>>,
    signature: Option<Vec<u8>>,
    payload: Vec<u8>,
}

fn parse_accept(data: &[u8], verify_crc: bool) -> Result<DecodedAccept> {
    let decoded = decode_datagram(data, verify_crc)?;
    let (key, random, payload) = split_handshake_body(decoded.body)?;
    Ok(DecodedAccept {
        remote_key: if key.is_empty() { None } else { Some(key.to_vec()) },
        signature: if random.is_empty() { None } else { Some(random.to_vec()) },
        payload: payload.to_vec(),
    })
}

/// Drives the outbound side of the handshake: send REQUEST up to
/// `connect_attempts` times, waiting `connect_delay` between attempts, until
/// either ACCEPT/REJECT arrives or attempts are exhausted.
pub(crate) async fn run_connect(peer: Arc<Peer>, app_payload: Option<Vec<u8>>) {
    let Some(host) = peer.host() else { return };
    let crc_enabled = host.config().crc32;
    let encryption_enabled = host.config().encryption;

    let (our_key, exchanger): (Vec<u8>, Option<Box<dyn KeyExchanger>>) = if encryption_enabled {
        let exchanger = host.capabilities().key_exchanger_factory.new_exchanger();
        let key = exchanger.public_key();
        (key, Some(exchanger))
    } else {
        (Vec::new(), None)
    };

    let want_auth = peer.config.remote_public_key.is_some();
    let our_random = if want_auth {
        host.capabilities().csprng.random_vec(32)
    } else {
        Vec::new()
    };

    {
        let mut state = peer.connect.lock();
        state.exchanger = exchanger;
        state.our_random = our_random.clone();
    }

    let body = encode_handshake_body(&our_key, &our_random, app_payload.as_deref().unwrap_or(&[]));
    let packet = encode_handshake_packet(PacketType::Request, crc_enabled, &body);

    for attempt in 0..peer.config.connect_attempts {
        if peer.is_disposed() {
            return;
        }
        if let Err(err) = host.send_datagram(peer.remote, &packet).await {
            peer.listener.on_exception(&peer, &err);
        }

        let wait = tokio::time::sleep(peer.config.connect_delay());
        tokio::select! {
            _ = wait => {}
            _ = peer.dispose_token.cancelled() => return,
        }

        if peer.state() != PeerState::ConnectingOut {
            // A concurrent `on_receive_async` already advanced us past
            // CONNECTING_OUT (ACCEPT/REJECT arrived).
            return;
        }
        debug!(attempt, remote = %peer.remote, "connect attempt timed out, resending REQUEST");
    }

    if peer.state() == PeerState::ConnectingOut {
        warn!(remote = %peer.remote, "connect attempts exhausted");
        peer.terminate(DisconnectReason::Timeout, None).await;
    }
}

/// Handles an inbound ACCEPT packet on an outbound-connecting peer.
pub(crate) async fn handle_accept(peer: &Arc<Peer>, data: &[u8]) {
    if peer.state() != PeerState::ConnectingOut {
        return;
    }
    let Some(host) = peer.host() else { return };
    let crc_enabled = host.config().crc32;

    let accept = match parse_accept(data, crc_enabled) {
        Ok(a) => a,
        Err(err) => {
            peer.listener.on_exception(peer, &err.into());
            return;
        }
    };

    if let Some(expected_key) = &peer.config.remote_public_key {
        if let Some(sig) = &accept.signature {
            let our_random = peer.connect.lock().our_random.clone();
            if !host.capabilities().verifier.verify(expected_key, &our_random, sig) {
                peer.terminate(DisconnectReason::BadSignature, None).await;
                return;
            }
        } else {
            peer.terminate(DisconnectReason::BadSignature, None).await;
            return;
        }
    }

    let exchanger = peer.connect.lock().exchanger.take();
    if let (Some(exchanger), Some(remote_key)) = (exchanger, accept.remote_key.as_deref()) {
        match exchanger.diffie_hellman(remote_key) {
            Ok(shared) => {
                let encryptor = host.capabilities().encryptor_factory.derive(&shared);
                *peer.encryptor.lock() = Some(Arc::from(encryptor));
            }
            Err(err) => {
                peer.listener.on_exception(peer, &err.into());
                peer.terminate(DisconnectReason::Exception, None).await;
                return;
            }
        }
    }

    peer.set_state(PeerState::Connected);
    peer.connected.store(true, std::sync::atomic::Ordering::SeqCst);
    start_pinger(peer);
    peer.listener.on_connect(peer);
    let _ = accept.payload;
}

/// Handles an inbound REJECT packet.
pub(crate) async fn handle_reject(peer: &Arc<Peer>, data: &[u8]) {
    let Some(host) = peer.host() else { return };
    let decoded = match decode_datagram(data, host.config().crc32) {
        Ok(d) => d,
        Err(err) => {
            peer.listener.on_exception(peer, &err.into());
            return;
        }
    };

    if peer.state() == PeerState::Connected {
        peer.listener
            .on_exception(peer, &TransportError::Rejected.into());
        return;
    }

    let payload = decoded.body.to_vec();
    peer.terminate(DisconnectReason::Rejected, Some(payload)).await;
}

/// Builds and sends the ACCEPT reciprocating `request` (spec.md §4.6
/// "Inbound").
pub(crate) async fn run_accept(peer: Arc<Peer>, request: ConnectionRequest) {
    let Some(host) = peer.host() else { return };
    let crc_enabled = host.config().crc32;

    let our_key = host.capabilities().key_exchanger_factory.new_exchanger();

    let signature = if let Some(random) = &request.remote_random {
        if !random.is_empty() {
            host.capabilities().signer.sign(random)
        } else {
            Vec::new()
        }
    } else {
        Vec::new()
    };

    let key_bytes = if request.remote_key.is_some() {
        our_key.public_key()
    } else {
        Vec::new()
    };

    if let Some(remote_key) = &request.remote_key {
        match our_key.diffie_hellman(remote_key) {
            Ok(shared) => {
                let encryptor = host.capabilities().encryptor_factory.derive(&shared);
                *peer.encryptor.lock() = Some(Arc::from(encryptor));
            }
            Err(err) => {
                peer.listener.on_exception(&peer, &err.into());
                peer.terminate(DisconnectReason::Exception, None).await;
                return;
            }
        }
    }

    let body = encode_handshake_body(&key_bytes, &signature, &[]);
    let packet = encode_handshake_packet(PacketType::Accept, crc_enabled, &body);

    if let Err(err) = host.send_datagram(peer.remote, &packet).await {
        peer.listener.on_exception(&peer, &err);
        return;
    }

    peer.set_state(PeerState::Connected);
    peer.connected.store(true, std::sync::atomic::Ordering::SeqCst);
    start_pinger(&peer);
    peer.listener.on_connect(&peer);
}

fn start_pinger(peer: &Arc<Peer>) {
    let ping_delay = peer.config.ping_delay();
    let task_peer = Arc::clone(peer);
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(ping_delay) => {}
                _ = task_peer.dispose_token.cancelled() => return,
            }
            if task_peer.is_disposed() || task_peer.state() != PeerState::Connected {
                return;
            }
            super::outgoing::send_ping(&task_peer).await;
        }
    });
    peer.connect.lock().pinger = Some(handle);
}

pub(crate) fn stop_pinger(peer: &Peer) {
    if let Some(handle) = peer.connect.lock().pinger.take() {
        handle.abort();
    }
}
