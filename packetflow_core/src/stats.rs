//! Monotonically increasing counters, updated with relaxed atomics (spec.md
//! §9 "Statistics counters"). Readers accept transient inconsistency between
//! related counters, per the same note.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Aggregate counters owned by a [`crate::host::Host`].
#[derive(Debug, Default)]
pub struct HostStats {
    pub datagrams_sent: Counter,
    pub datagrams_received: Counter,
    pub bytes_sent: Counter,
    pub bytes_received: Counter,
    pub malformed_packets: Counter,
    pub connection_requests_received: Counter,
}

/// Per-peer counters, surfaced for diagnostics and the test suite's
/// duplicate-suppression assertion (spec.md §8 scenario 6). The per-channel
/// lost-message estimate lives on `Peer::lost_estimate` instead of here — it
/// is already tracked per-channel by `SequenceState` (spec.md §4.4), and a
/// single aggregate counter here would just be a second, unsynchronized copy
/// of the same number.
#[derive(Debug, Default)]
pub struct PeerStats {
    pub message_sent: Counter,
    pub message_received: Counter,
    pub message_receive_duplicated: Counter,
    pub fragments_sent: Counter,
    pub fragments_received: Counter,
    pub resend_count: Counter,
    pub acks_received: Counter,
}
