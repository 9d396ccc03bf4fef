//! Connection lifecycle: idempotent disposal, graceful disconnect, and
//! resend-exhaustion timeout (spec.md §4.6 "Termination", §8 scenario 2).
//! REJECT-during-handshake is covered in `handshake.rs`.

mod common;

use std::time::Duration;

use common::*;
use packetflow_core::prelude::*;

/// `Peer::dispose` called more than once must fire `on_disconnect` exactly
/// once (spec.md §4.6: termination is a one-shot transition to `DISPOSED`).
#[tokio::test(flavor = "multi_thread")]
async fn dispose_is_idempotent() {
    let mut pair = connect_pair(loopback_host_config(), fast_peer_config()).await;

    pair.peer_a.dispose(DisconnectReason::Disconnected).await;
    pair.peer_a.dispose(DisconnectReason::Disconnected).await;
    pair.peer_a.dispose(DisconnectReason::Timeout).await;

    let mut disconnects = 0;
    while let Some(PeerEvent::Disconnect(..)) = recv_timeout(&mut pair.events_a, 300).await {
        disconnects += 1;
    }
    assert_eq!(disconnects, 1, "on_disconnect must fire exactly once");

    pair.host_a.dispose().await;
    pair.host_b.dispose().await;
}

/// `Peer::disconnect` sends a disconnect notice and terminates locally with
/// `Disconnected`; the remote side observes its own `on_disconnect` once the
/// notice arrives (spec.md §4.6 "graceful disconnect").
#[tokio::test(flavor = "multi_thread")]
async fn graceful_disconnect_notifies_both_sides() {
    let mut pair = connect_pair(loopback_host_config(), fast_peer_config()).await;

    pair.peer_a.disconnect().await;

    match recv_timeout(&mut pair.events_a, 2_000).await {
        Some(PeerEvent::Disconnect(DisconnectReason::Disconnected, _)) => {}
        other => panic!("expected local Disconnect(Disconnected), got {other:?}"),
    }

    let mut saw_remote_disconnect = false;
    for _ in 0..5 {
        match recv_timeout(&mut pair.events_b, 2_000).await {
            Some(PeerEvent::Disconnect(..)) => {
                saw_remote_disconnect = true;
                break;
            }
            Some(_) => continue,
            None => break,
        }
    }
    assert!(saw_remote_disconnect, "remote side must also observe on_disconnect");

    pair.host_a.dispose().await;
    pair.host_b.dispose().await;
}

/// A peer that stops responding after connecting is torn down with
/// `on_disconnect(Timeout)` once the reliable resend loop exhausts
/// `resend_count` (spec.md §4.4 "Reliability").
#[tokio::test(flavor = "multi_thread")]
async fn unresponsive_peer_times_out() {
    let mut peer_cfg = fast_peer_config();
    peer_cfg.resend_count = 3;
    peer_cfg.resend_delay_min_ms = 20;
    peer_cfg.resend_delay_max_ms = 40;

    let mut pair = connect_pair(loopback_host_config(), peer_cfg).await;

    // Make host_b vanish without a graceful disconnect so its acks stop
    // arriving; host_a's outstanding reliable send must then time out.
    pair.host_b.dispose().await;
    let _ = recv_timeout(&mut pair.events_b, 300).await;

    pair.peer_a.send(Message::reliable_ordered_unique("are you there"));

    match recv_timeout(&mut pair.events_a, 5_000).await {
        Some(PeerEvent::Disconnect(DisconnectReason::Timeout, _)) => {}
        other => panic!("expected Disconnect(Timeout), got {other:?}"),
    }

    pair.host_a.dispose().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
}
