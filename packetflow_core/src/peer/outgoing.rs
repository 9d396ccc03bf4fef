//! Outgoing pipeline: aggregate → compress → encrypt → fragment → send
//! (spec.md §4.3, §4.7).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::event::{DisconnectReason, Message};
use crate::wire::{
    encode_datagram, message_encoded_len, write_message, DatagramHeader, FragmentHeader,
    MessageFlags, MessageHeader, MessageType, PacketFlags, PacketType, Writer,
};

use super::Peer;

/// Handle for one outstanding reliable send (spec.md §3 `SentMessage`).
pub(crate) struct SentMessage {
    pub payload: Bytes,
    pub flags: MessageFlags,
    pub ty: MessageType,
    pub channel: u8,
    pub sequence: u16,
    pub attempts_sent: AtomicU8,
    pub created_at: Instant,
    pub cancel: CancellationToken,
}

/// One queued-but-not-yet-flushed message plus the bytes already rendered
/// for it, so flush only has to concatenate (spec.md §4.3 step 3).
struct QueuedMessage {
    encoded: Vec<u8>,
}

#[derive(Default)]
pub(crate) struct FlushState {
    queue: Vec<QueuedMessage>,
    flush_scheduled: bool,
}

/// Computes the `MessageFlags` for an outgoing message (spec.md §4.3 step 2).
fn compute_flags(peer: &Peer, msg: &Message) -> MessageFlags {
    let mut flags = MessageFlags::empty();
    if msg.timed {
        flags |= MessageFlags::TIMED;
    }
    if msg.reliable {
        flags |= MessageFlags::RELIABLE;
    }
    if msg.ordered {
        flags |= MessageFlags::ORDERED;
    }
    if msg.unique {
        flags |= MessageFlags::UNIQUE;
    }
    if msg.channel != 0 {
        flags |= MessageFlags::CHANNELED;
    }

    let forces_sequence = msg.reliable || msg.ordered || msg.unique;
    if forces_sequence {
        flags |= MessageFlags::SEQUENCED;
        peer.seq.reset_unsequenced_run(msg.channel);
    } else {
        let run = peer.seq.bump_unsequenced_run(msg.channel);
        if run as u32 > peer.config.unsequenced_max {
            flags |= MessageFlags::SEQUENCED;
            peer.seq.reset_unsequenced_run(msg.channel);
        }
    }
    flags
}

/// Enqueues `message` for the next flush cycle (spec.md §4.3 `send`).
/// Returns the allocated sequence, useful for correlating with `on_receive`.
///
/// Reliable messages skip the flush aggregator entirely: their own resend
/// loop owns every transmission, attempt 0 included (spec.md §4.3 "Reliable
/// messages run their own resend loop outside the flush path").
pub(crate) fn send(peer: &Arc<Peer>, message: Message) -> u16 {
    let flags = compute_flags(peer, &message);
    let sequence = if flags.contains(MessageFlags::SEQUENCED) {
        peer.seq.next_send(message.channel)
    } else {
        0
    };

    if message.reliable {
        spawn_resend_loop(
            Arc::clone(peer),
            message.payload,
            flags,
            MessageType::Custom,
            message.channel,
            sequence,
        );
    } else {
        let created_ticks = peer.host().map(|h| h.tick_low16()).unwrap_or(0);
        let header = MessageHeader {
            ty: MessageType::Custom,
            flags,
            created_ticks: Some(created_ticks),
            sequence: Some(sequence),
            attempt: 0,
            channel: message.channel,
        };
        enqueue(peer, header, &message.payload, created_ticks);
    }

    peer.stats.message_sent.incr();
    sequence
}

/// Sends a reliable PING on channel 0 (spec.md §4.6 "Pinger"). PING is always
/// RELIABLE, so it is always sent by the resend loop alone, never enqueued.
pub(crate) async fn send_ping(peer: &Arc<Peer>) {
    let sequence = peer.seq.next_send(0);
    let flags = MessageFlags::TIMED | MessageFlags::SEQUENCED | MessageFlags::RELIABLE;
    spawn_resend_loop(
        Arc::clone(peer),
        Bytes::new(),
        flags,
        MessageType::Ping,
        0,
        sequence,
    );
}

/// Sends an ACKNOWLEDGE correlating to `(channel, sequence, attempt)`
/// (spec.md §4.4 "If RELIABLE, immediately enqueue an ACKNOWLEDGE").
/// ACKNOWLEDGE carries `RELIABLE` purely to get the wire-format attempt
/// field written; it is never itself placed in the reliables map or resent.
pub(crate) fn send_ack(peer: &Arc<Peer>, channel: u8, sequence: u16, attempt: u8) {
    let created_ticks = peer.host().map(|h| h.tick_low16()).unwrap_or(0);
    let mut flags = MessageFlags::TIMED | MessageFlags::SEQUENCED | MessageFlags::RELIABLE;
    if channel != 0 {
        flags |= MessageFlags::CHANNELED;
    }
    let header = MessageHeader {
        ty: MessageType::Acknowledge,
        flags,
        created_ticks: Some(created_ticks),
        sequence: Some(sequence),
        attempt,
        channel,
    };
    enqueue(peer, header, &[], created_ticks);
}

/// Sends DISCONNECT immediately, bypassing the flush aggregator's delay so
/// the remote learns about the teardown as fast as possible.
pub(crate) async fn send_disconnect_now(peer: &Arc<Peer>) {
    let Some(host) = peer.host() else { return };
    let created_ticks = host.tick_low16();
    let header = MessageHeader {
        ty: MessageType::Disconnect,
        flags: MessageFlags::TIMED,
        created_ticks: Some(created_ticks),
        sequence: None,
        attempt: 0,
        channel: 0,
    };
    let mut w = Writer::new();
    write_message(&mut w, header, &[]);
    let body = w.into_bytes_mut();
    let _ = send_packet(peer, &host, &body, 1).await;
}

fn enqueue(peer: &Peer, header: MessageHeader, payload: &[u8], _created_ticks: u16) {
    let len = message_encoded_len(&header, payload.len());
    let mut w = Writer::with_capacity(len);
    write_message(&mut w, header, payload);
    let encoded = w.into_bytes_mut().to_vec();

    let mut flush = peer.flush.lock();
    flush.queue.push(QueuedMessage { encoded });
    let already_scheduled = flush.flush_scheduled;
    flush.flush_scheduled = true;
    drop(flush);

    if !already_scheduled {
        schedule_flush(peer);
    }
}

fn schedule_flush(peer: &Peer) {
    let Some(peer_arc) = peer.upgrade_self() else {
        return;
    };
    let delay = peer.config.send_delay();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = peer_arc.dispose_token.cancelled() => return,
        }
        flush(&peer_arc).await;
    });
}

/// Drains the queue into one logical packet and sends it (spec.md §4.3,
/// §4.7). A single queued message skips the COMBINED length prefix.
async fn flush(peer: &Arc<Peer>) {
    let Some(host) = peer.host() else { return };

    let queue = {
        let mut flush = peer.flush.lock();
        flush.flush_scheduled = false;
        std::mem::take(&mut flush.queue)
    };
    if queue.is_empty() {
        return;
    }

    let combined = queue.len() > 1;
    let mut body = Writer::new();
    if combined {
        for item in &queue {
            body.u32(item.encoded.len() as u32);
            body.bytes(&item.encoded);
        }
    } else {
        body.bytes(&queue[0].encoded);
    }
    let body = body.into_bytes_mut();

    if let Err(err) = send_packet(peer, &host, &body, if combined { queue.len() } else { 1 }).await
    {
        peer.listener.on_exception(peer, &err);
    }
}

/// Compresses, encrypts, fragments, and sends one logical CONNECTED packet.
async fn send_packet(
    peer: &Peer,
    host: &crate::host::Host,
    body: &bytes::BytesMut,
    message_count: usize,
) -> anyhow::Result<()> {
    let mut payload: Vec<u8> = body.to_vec();
    let mut extra_flags = PacketFlags::empty();
    if message_count > 1 {
        extra_flags |= PacketFlags::COMBINED;
    }

    if host.config().compression {
        payload = host.capabilities().compressor.compress(&payload);
        extra_flags |= PacketFlags::COMPRESSED;
    }

    if let Some(encryptor) = peer.encryptor.lock().clone() {
        payload = encryptor.encrypt(&payload)?;
    }

    let mtu = peer.config.mtu.max(64);
    // Reserve room for the fixed per-datagram overhead (header + CRC +
    // fragment header + tick slice); the true compressed/encrypted expansion
    // ratio is not known ahead of time (spec.md §9 open question), so this
    // reservation covers the framing only, not any algorithm-specific
    // overhead of the chosen compressor/encryptor.
    let overhead = 1 + 4 + 6 + 2;
    let part_len = mtu.saturating_sub(overhead).max(1);

    if payload.len() <= part_len {
        let tick = Some(host.tick_low16());
        let datagram = encode_datagram(
            DatagramHeader {
                ty: PacketType::Connected,
                crc_enabled: host.config().crc32,
                fragment: None,
                tick,
                extra_flags,
            },
            &payload,
        );
        host.send_datagram(peer.remote, &datagram).await?;
    } else {
        let fragment_id = peer.fragment_id_counter.fetch_add(1, Ordering::Relaxed);
        let parts: Vec<&[u8]> = payload.chunks(part_len).collect();
        let last_part = (parts.len() - 1) as u16;
        for (i, part) in parts.iter().enumerate() {
            let tick = Some(host.tick_low16());
            let datagram = encode_datagram(
                DatagramHeader {
                    ty: PacketType::Connected,
                    crc_enabled: host.config().crc32,
                    fragment: Some(FragmentHeader {
                        fragment_id,
                        part: i as u16,
                        last_part,
                    }),
                    tick,
                    extra_flags,
                },
                part,
            );
            host.send_datagram(peer.remote, &datagram).await?;
            peer.stats.fragments_sent.incr();
        }
    }
    Ok(())
}

/// Resend loop for one reliable message: emits with an increasing `attempt`
/// counter until acknowledged, disposed, or `resend_count` is exhausted
/// (spec.md §4.3 "Reliable messages run their own resend loop").
fn spawn_resend_loop(
    peer: Arc<Peer>,
    payload: Bytes,
    mut flags: MessageFlags,
    ty: MessageType,
    channel: u8,
    sequence: u16,
) {
    flags |= MessageFlags::RELIABLE;
    let cancel = CancellationToken::new();
    let sent = Arc::new(SentMessage {
        payload: payload.clone(),
        flags,
        ty,
        channel,
        sequence,
        attempts_sent: AtomicU8::new(0),
        created_at: Instant::now(),
        cancel: cancel.clone(),
    });
    peer.reliables.lock().insert((channel, sequence), sent.clone());

    tokio::spawn(async move {
        for attempt in 0..peer.config.resend_count {
            if peer.is_disposed() || cancel.is_cancelled() {
                return;
            }

            let Some(host) = peer.host() else { return };
            let created_ticks = host.tick_low16();
            let header = MessageHeader {
                ty: sent.ty,
                flags: sent.flags,
                created_ticks: Some(created_ticks),
                sequence: Some(sent.sequence),
                attempt: attempt as u8,
                channel: sent.channel,
            };
            sent.attempts_sent.fetch_add(1, Ordering::SeqCst);

            let mut w = Writer::new();
            write_message(&mut w, header, &sent.payload);
            let body = w.into_bytes_mut();
            if let Err(err) = send_packet(&peer, &host, &body, 1).await {
                peer.listener.on_exception(&peer, &err);
            }
            peer.stats.resend_count.incr();

            let rtt = peer.rtt_ms();
            let jitter = peer.config.resend_delay_jitter_ms;
            let delay_ms = (rtt as u64 + jitter)
                .clamp(peer.config.resend_delay_min_ms, peer.config.resend_delay_max_ms);
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(delay_ms)) => {}
                _ = cancel.cancelled() => return,
                _ = peer.dispose_token.cancelled() => return,
            }
        }

        if !cancel.is_cancelled() && peer.reliables.lock().remove(&(channel, sequence)).is_some() {
            warn!(remote = %peer.remote, channel, sequence, "reliable message exhausted resend attempts");
            peer.terminate(DisconnectReason::Timeout, None).await;
        }
    });
}

pub(crate) fn cancel_all_reliables(peer: &Peer) {
    let mut reliables = peer.reliables.lock();
    for (_, sent) in reliables.drain() {
        sent.cancel.cancel();
    }
}

pub(crate) type ReliablesMap = HashMap<(u8, u16), Arc<SentMessage>>;
