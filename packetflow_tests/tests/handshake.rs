//! Handshake scenarios (spec.md §8 "Handshake-completes", scenario 4, and
//! REJECT during handshake).

mod common;

use std::sync::Arc;

use common::*;
use packetflow_core::prelude::*;

/// For all `(crc32, encryption, authenticate)` combinations, a connect/accept
/// pair yields exactly one `on_connect` on each side.
#[tokio::test(flavor = "multi_thread")]
async fn handshake_completes_across_capability_combinations() {
    for crc32 in [false, true] {
        for encryption in [false, true] {
            for authenticate in [false, true] {
                let host_cfg = HostConfig {
                    crc32,
                    encryption,
                    ..loopback_host_config()
                };
                let (host_b, mut new_peers, _host_events) =
                    spawn_auto_accept_host(host_cfg.clone(), fast_peer_config()).await;
                let addr_b = host_b.local_addr().unwrap();

                let (host_a, _new_peers_a, _host_events_a) =
                    spawn_auto_accept_host(host_cfg, fast_peer_config()).await;

                let mut peer_cfg_a = fast_peer_config();
                if authenticate {
                    peer_cfg_a.remote_public_key = Some(host_b.capabilities().signer.public_key());
                }

                let (listener_a, mut events_a) = ChannelPeerListener::new();
                let _peer_a = host_a.connect(addr_b, peer_cfg_a, listener_a, None);

                expect_connect(&mut events_a).await;

                let accepted = recv_timeout(&mut new_peers, 5_000)
                    .await
                    .expect("server should have accepted a peer");
                let mut events_b = accepted.events;
                expect_connect(&mut events_b).await;

                assert!(accepted.peer.is_connected());

                host_a.dispose().await;
                host_b.dispose().await;
            }
        }
    }
}

/// Scenario 4: a mismatched `remote_public_key` causes `BadSignature` and no
/// `on_connect`.
#[tokio::test(flavor = "multi_thread")]
async fn mismatched_remote_public_key_yields_bad_signature() {
    let (host_b, mut new_peers, _host_events) =
        spawn_auto_accept_host(loopback_host_config(), fast_peer_config()).await;
    let addr_b = host_b.local_addr().unwrap();

    let (host_a, _new_peers_a, _host_events_a) =
        spawn_auto_accept_host(loopback_host_config(), fast_peer_config()).await;

    let mut peer_cfg_a = fast_peer_config();
    // A random 32-byte key that (overwhelmingly likely) does not match B's.
    peer_cfg_a.remote_public_key = Some(vec![0x42; 32]);

    let (listener_a, mut events_a) = ChannelPeerListener::new();
    let _peer_a = host_a.connect(addr_b, peer_cfg_a, listener_a, None);

    match recv_timeout(&mut events_a, 5_000).await {
        Some(PeerEvent::Disconnect(DisconnectReason::BadSignature, _)) => {}
        other => panic!("expected BadSignature disconnect, got {other:?}"),
    }

    // The server side should still have completed its half of the handshake
    // (it has no way to know A rejected the signature).
    let _ = recv_timeout(&mut new_peers, 1_000).await;

    host_a.dispose().await;
    host_b.dispose().await;
}

/// REJECT during handshake disposes the connecting peer and hands the
/// listener the reject payload.
#[tokio::test(flavor = "multi_thread")]
async fn reject_during_handshake_notifies_listener() {
    let reject_payload = b"go away".to_vec();
    let listener_b = AutoRejectListener::new(reject_payload.clone());
    let host_b = Host::new(loopback_host_config(), HostCapabilities::default(), listener_b.clone())
        .await
        .unwrap();
    listener_b.bind(Arc::downgrade(&host_b));
    let addr_b = host_b.local_addr().unwrap();

    let (host_a, _new_peers_a, _host_events_a) =
        spawn_auto_accept_host(loopback_host_config(), fast_peer_config()).await;

    let (listener_a, mut events_a) = ChannelPeerListener::new();
    let _peer_a = host_a.connect(addr_b, fast_peer_config(), listener_a, None);

    match recv_timeout(&mut events_a, 5_000).await {
        Some(PeerEvent::Disconnect(DisconnectReason::Rejected, payload)) => {
            assert_eq!(payload.as_deref(), Some(reject_payload.as_slice()));
        }
        other => panic!("expected Rejected disconnect, got {other:?}"),
    }

    host_a.dispose().await;
    host_b.dispose().await;
}
