//! Fragmentation round-trip (spec.md §8 "Fragmentation round-trip", scenario 3).

mod common;

use common::*;
use packetflow_core::prelude::*;
use rand::RngCore;

#[tokio::test(flavor = "multi_thread")]
async fn large_reliable_payload_round_trips_byte_identical() {
    let mut peer_cfg = fast_peer_config();
    peer_cfg.mtu = 1200;

    let mut pair = connect_pair(loopback_host_config(), peer_cfg).await;

    let mut payload = vec![0u8; 65 * 1024];
    rand::thread_rng().fill_bytes(&mut payload);

    pair.peer_a
        .send(Message::new(payload.clone()).channel(3).reliable().ordered().unique());

    match recv_timeout(&mut pair.events_b, 10_000).await {
        Some(PeerEvent::Receive(msg)) => {
            assert_eq!(msg.channel, 3);
            assert_eq!(msg.payload.len(), payload.len());
            assert_eq!(&msg.payload[..], &payload[..]);
        }
        other => panic!("expected Receive, got {other:?}"),
    }

    assert!(pair.peer_a.stats().fragments_sent.get() > 1);
    assert!(pair.peer_b.stats().fragments_received.get() > 1);

    pair.host_a.dispose().await;
    pair.host_b.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn multiple_fragmented_messages_all_arrive_intact() {
    let mut peer_cfg = fast_peer_config();
    peer_cfg.mtu = 1200;
    let mut pair = connect_pair(loopback_host_config(), peer_cfg).await;

    let mut payloads = Vec::new();
    for size in [4 * 1024usize, 16 * 1024, 40 * 1024] {
        let mut buf = vec![0u8; size];
        rand::thread_rng().fill_bytes(&mut buf);
        payloads.push(buf);
    }

    for payload in &payloads {
        pair.peer_a
            .send(Message::new(payload.clone()).reliable().ordered().unique());
    }

    for expected in &payloads {
        match recv_timeout(&mut pair.events_b, 10_000).await {
            Some(PeerEvent::Receive(msg)) => assert_eq!(&msg.payload[..], &expected[..]),
            other => panic!("expected Receive, got {other:?}"),
        }
    }

    pair.host_a.dispose().await;
    pair.host_b.dispose().await;
}
