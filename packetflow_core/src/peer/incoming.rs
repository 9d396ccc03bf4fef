//! Incoming pipeline: verify → reassemble → decrypt → decompress →
//! demultiplex → ordering engine → listener delivery (spec.md §4.4, §4.5).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::clock;
use crate::event::{DisconnectReason, ReceivedMessage};
use crate::wire::{for_each_message, DecodedMessage, MessageFlags, MessageType};

use super::channels::{sequence_gt, FragmentOutcome};
use super::outgoing::send_ack;
use super::Peer;

/// Entry point called by [`crate::host::Host`] for every datagram addressed
/// to an already-registered peer.
pub(crate) async fn on_receive_async(peer: &Arc<Peer>, data: Vec<u8>) {
    use crate::wire::PacketType;

    let Ok((ty, _)) = crate::wire::decode_packet_header(*data.first().unwrap_or(&0)) else {
        return;
    };

    match ty {
        PacketType::Accept => super::handshake::handle_accept(peer, &data).await,
        PacketType::Reject => super::handshake::handle_reject(peer, &data).await,
        PacketType::Connected => handle_connected(peer, &data).await,
        _ => {}
    }
}

async fn handle_connected(peer: &Arc<Peer>, data: &[u8]) {
    let Some(host) = peer.host() else { return };

    let decoded = match crate::wire::decode_datagram(data, host.config().crc32) {
        Ok(d) => d,
        Err(err) => {
            host.stats().malformed_packets.incr();
            peer.listener.on_exception(peer, &err.into());
            return;
        }
    };

    let remote_tick = decoded.tick;

    let reassembled: Option<bytes::BytesMut>;
    let body: &[u8] = if let Some(frag) = decoded.fragment {
        peer.stats.fragments_received.incr();
        let mut fragment_state = peer.fragment.lock();
        match fragment_state.integrate(frag.fragment_id, frag.part, frag.last_part, decoded.body) {
            FragmentOutcome::Pending | FragmentOutcome::Duplicate => return,
            FragmentOutcome::Malformed => {
                host.stats().malformed_packets.incr();
                return;
            }
            FragmentOutcome::Complete(whole) => {
                drop(fragment_state);
                reassembled = Some(whole);
                reassembled.as_deref().unwrap()
            }
        }
    } else {
        reassembled = None;
        decoded.body
    };

    let allocator = host.allocator();

    let mut decrypted_buf: Option<bytes::BytesMut> = None;
    let after_decrypt: &[u8] = if let Some(encryptor) = peer.encryptor.lock().clone() {
        match encryptor.decrypt(body) {
            Ok(plain) => {
                let mut buf = allocator.buffer(plain.len());
                buf.extend_from_slice(&plain);
                decrypted_buf = Some(buf);
                decrypted_buf.as_deref().unwrap()
            }
            Err(err) => {
                peer.listener.on_exception(peer, &err.into());
                return;
            }
        }
    } else {
        body
    };

    let mut decompressed_buf: Option<bytes::BytesMut> = None;
    let final_body: &[u8] = if decoded.flags.contains(crate::wire::PacketFlags::COMPRESSED) {
        match host.capabilities().compressor.decompress(after_decrypt) {
            Ok(plain) => {
                if let Some(buf) = decrypted_buf.take() {
                    allocator.recycle(buf);
                }
                let mut buf = allocator.buffer(plain.len());
                buf.extend_from_slice(&plain);
                decompressed_buf = Some(buf);
                decompressed_buf.as_deref().unwrap()
            }
            Err(err) => {
                peer.listener.on_exception(peer, &err.into());
                return;
            }
        }
    } else {
        after_decrypt
    };

    let combined = decoded.flags.contains(crate::wire::PacketFlags::COMBINED);
    let result = for_each_message(final_body, combined, |msg| {
        // Synchronous portion: dispatch is fanned out into async tasks below
        // so one blocked ordering-wait cannot stall sibling channels/messages
        // (spec.md §8 "Channel independence").
        dispatch_message(peer, msg, remote_tick);
        Ok(())
    });
    if let Err(err) = result {
        host.stats().malformed_packets.incr();
        peer.listener.on_exception(peer, &err.into());
    }

    if let Some(buf) = decompressed_buf.take() {
        allocator.recycle(buf);
    } else if let Some(buf) = decrypted_buf.take() {
        allocator.recycle(buf);
    }
}

fn dispatch_message(peer: &Arc<Peer>, msg: DecodedMessage<'_>, remote_tick: Option<u16>) {
    peer.stats.message_received.incr();

    match msg.ty {
        MessageType::Acknowledge => {
            handle_acknowledge(peer, &msg, remote_tick);
            return;
        }
        MessageType::Disconnect => {
            let peer = Arc::clone(peer);
            tokio::spawn(async move {
                tokio::time::sleep(peer.config.disconnect_delay()).await;
                peer.terminate(DisconnectReason::Terminated, None).await;
            });
            return;
        }
        MessageType::Ping => {
            return;
        }
        MessageType::Custom => {}
    }

    let channel = msg.channel;
    let unique = msg.flags.contains(MessageFlags::UNIQUE);
    let ordered = msg.flags.contains(MessageFlags::ORDERED);
    let reliable = msg.flags.contains(MessageFlags::RELIABLE);
    let sequence = msg.sequence;

    let mut was_duplicate = false;
    if unique {
        if let Some(seq) = sequence {
            was_duplicate = peer.unique.check_and_insert(channel, seq, peer.config.duplicate_timeout());
            if was_duplicate {
                peer.stats.message_receive_duplicated.incr();
            }
        }
    }

    if let Some(seq) = sequence {
        peer.seq.observe_receive(channel, seq);
    }

    if reliable {
        if let Some(seq) = sequence {
            send_ack(peer, channel, seq, msg.attempt);
        }
    }

    if was_duplicate {
        return;
    }

    let timestamp = remote_tick
        .map(|t| crate::event::HostTick(clock::reconstruct(t, peer.host_tick_ms())))
        .unwrap_or(crate::event::HostTick(peer.host_tick_ms()));

    let received = ReceivedMessage {
        payload: Bytes::copy_from_slice(msg.payload),
        channel,
        attempt: msg.attempt,
        sequence,
        was_duplicate,
        remote_created_ticks: msg.created_ticks,
        remote_sent_ticks: remote_tick,
        timestamp,
    };

    if unique && ordered {
        if let Some(seq) = sequence {
            spawn_ordered_delivery(Arc::clone(peer), channel, seq, reliable, received);
            return;
        }
    }

    peer.listener.on_receive(peer, received);
}

/// Runs the ordering engine for one message (spec.md §4.5). Spawned as its
/// own task so a reorder-gap stall on channel `a` never delays delivery on
/// channel `b`, or even other messages already in-order on channel `a`.
fn spawn_ordered_delivery(
    peer: Arc<Peer>,
    channel: u8,
    sequence: u16,
    reliable: bool,
    received: ReceivedMessage,
) {
    tokio::spawn(async move {
        let order = peer.order.channel(channel);

        if order.try_deliver(sequence) {
            peer.listener.on_receive(&peer, received);
            return;
        }

        let leads = sequence_gt(sequence, order.delivered());
        if !leads {
            // Late message: already superseded. Reliables are delivered
            // anyway (they were previously counted lost); unreliables drop.
            if reliable {
                peer.listener.on_receive(&peer, received);
            }
            return;
        }

        let delay_enabled = reliable
            && peer.config.ordered_delay_max > 0
            && peer.config.ordered_delay_timeout_ms > 0;
        if !delay_enabled {
            order.force_deliver(sequence);
            peer.listener.on_receive(&peer, received);
            return;
        }

        let timeout = Duration::from_millis(peer.config.ordered_delay_timeout_ms);
        for _ in 0..peer.config.ordered_delay_max {
            if peer.is_disposed() {
                return;
            }
            order.wait_for_stall(timeout).await;
            if order.try_deliver(sequence) {
                peer.listener.on_receive(&peer, received);
                return;
            }
            if !sequence_gt(sequence, order.delivered()) {
                // A force-delivery elsewhere already passed us; treat as
                // late now that the gap has closed around us.
                peer.listener.on_receive(&peer, received);
                return;
            }
        }

        order.force_deliver(sequence);
        peer.listener.on_receive(&peer, received);
    });
}

fn handle_acknowledge(peer: &Arc<Peer>, msg: &DecodedMessage<'_>, remote_tick: Option<u16>) {
    let (Some(channel), Some(sequence)) = (Some(msg.channel), msg.sequence) else {
        return;
    };

    let sent = peer.reliables.lock().remove(&(channel, sequence));
    let Some(sent) = sent else { return };
    sent.cancel.cancel();
    peer.stats.acks_received.incr();

    let is_first_attempt = msg.attempt == 0
        && sent.attempts_sent.load(std::sync::atomic::Ordering::SeqCst) == 1;
    if !is_first_attempt {
        return;
    }

    let rtt_ms = sent.created_at.elapsed().as_millis() as i64;
    let processing_delay_ms = match (remote_tick, msg.created_ticks) {
        (Some(sent_ticks), Some(created_ticks)) => {
            clock::wrapping_delta(sent_ticks, created_ticks) as i64
        }
        _ => 0,
    };
    let rtt_ms = (rtt_ms - processing_delay_ms).clamp(0, 32_768) as u16;

    peer.rtt_ms.store(rtt_ms, std::sync::atomic::Ordering::Relaxed);
    if let Some(sent_tick) = remote_tick {
        let local_tick = peer.host().map(|h| h.tick_low16()).unwrap_or(sent_tick);
        let delta = clock::wrapping_delta(local_tick, sent_tick);
        peer.time_delta.store(delta as u16, std::sync::atomic::Ordering::Relaxed);
    }
    peer.listener.on_update_rtt(peer, rtt_ms);
}
