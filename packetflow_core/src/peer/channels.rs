//! Per-channel state: sequence counters, the ordering engine (spec.md §4.5),
//! duplicate suppression, and fragment reassembly (spec.md §4.4 step 3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU16, Ordering};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::Notify;

pub const CHANNEL_COUNT: usize = 256;

fn atomic_u16_array(len: usize) -> Box<[AtomicU16]> {
    (0..len).map(|_| AtomicU16::new(0)).collect()
}

fn atomic_i64_array(len: usize) -> Box<[AtomicI64]> {
    (0..len).map(|_| AtomicI64::new(0)).collect()
}

/// The three per-channel counter arrays named in spec.md §3/§5. Kept as
/// plain atomics (no surrounding mutex): every update here is a single
/// fetch-add/compare, so spec.md §5's "Atomics" bullet — which lists these
/// same counters — already covers thread-safety without a separate lock.
pub(crate) struct SequenceState {
    send: Box<[AtomicU16]>,
    recv: Box<[AtomicU16]>,
    unseq: Box<[AtomicU16]>,
    lost: Box<[AtomicI64]>,
}

impl SequenceState {
    pub fn new() -> Self {
        Self {
            send: atomic_u16_array(CHANNEL_COUNT),
            recv: atomic_u16_array(CHANNEL_COUNT),
            unseq: atomic_u16_array(CHANNEL_COUNT),
            lost: atomic_i64_array(CHANNEL_COUNT),
        }
    }

    /// Allocates the next send sequence for `channel` (spec.md §4.3 step 1).
    pub fn next_send(&self, channel: u8) -> u16 {
        self.send[channel as usize].fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Increments and returns the channel's unsequenced run counter, used to
    /// decide when to force SEQUENCED (spec.md §4.3 step 2).
    pub fn bump_unsequenced_run(&self, channel: u8) -> u16 {
        self.unseq[channel as usize].fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset_unsequenced_run(&self, channel: u8) {
        self.unseq[channel as usize].store(0, Ordering::Relaxed);
    }

    /// Updates the lost-message estimator for `channel` given an observed
    /// sequence number (spec.md §4.4 "Update per-channel lost-message
    /// estimator"). Returns the (possibly updated) expected-next sequence.
    pub fn observe_receive(&self, channel: u8, observed: u16) {
        let recv = &self.recv[channel as usize];
        let expected = recv.load(Ordering::Relaxed).wrapping_add(1);
        if observed == expected {
            recv.store(observed, Ordering::Relaxed);
        } else if sequence_gt(observed, expected) {
            let gap = observed.wrapping_sub(expected) as i64;
            self.lost[channel as usize].fetch_add(gap, Ordering::Relaxed);
            recv.store(observed, Ordering::Relaxed);
        } else if sequence_gt(expected, observed.wrapping_add(1)) {
            self.lost[channel as usize].fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn lost(&self, channel: u8) -> i64 {
        self.lost[channel as usize].load(Ordering::Relaxed)
    }
}

/// `a > b` under 16-bit sequence-number wraparound (half the space is
/// "ahead", half is "behind" — standard serial-number arithmetic).
pub fn sequence_gt(a: u16, b: u16) -> bool {
    let diff = a.wrapping_sub(b);
    diff != 0 && diff < 0x8000
}

/// Ordering engine state for one channel (spec.md §4.5). `stall` is the
/// "one-shot notifier, replaced on each notification" of spec.md §9 —
/// modeled here as a persistent `Notify`, which already wakes all current
/// waiters on `notify_waiters()` while letting later callers re-subscribe.
pub(crate) struct OrderedChannel {
    delivered: AtomicU16,
    stall: Notify,
}

impl Default for OrderedChannel {
    fn default() -> Self {
        Self {
            delivered: AtomicU16::new(0),
            stall: Notify::new(),
        }
    }
}

impl OrderedChannel {
    pub fn delivered(&self) -> u16 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Attempts to advance delivery to `seq`, succeeding only if `seq` is
    /// exactly the next expected sequence. Wakes any stalled waiters.
    pub fn try_deliver(&self, seq: u16) -> bool {
        let expected = self.delivered.load(Ordering::Relaxed).wrapping_add(1);
        if seq == expected {
            self.delivered.store(seq, Ordering::Relaxed);
            self.stall.notify_waiters();
            true
        } else {
            false
        }
    }

    /// Forces delivery regardless of order (used for the late-message and
    /// final-timeout paths of spec.md §4.5).
    pub fn force_deliver(&self, seq: u16) {
        if sequence_gt(seq, self.delivered.load(Ordering::Relaxed)) {
            self.delivered.store(seq, Ordering::Relaxed);
        }
        self.stall.notify_waiters();
    }

    pub async fn wait_for_stall(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.stall.notified())
            .await
            .is_ok()
    }
}

pub(crate) struct OrderState {
    channels: Vec<OrderedChannel>,
}

impl OrderState {
    pub fn new() -> Self {
        Self {
            channels: (0..CHANNEL_COUNT).map(|_| OrderedChannel::default()).collect(),
        }
    }

    pub fn channel(&self, ch: u8) -> &OrderedChannel {
        &self.channels[ch as usize]
    }
}

/// Duplicate-suppression set: `(channel, sequence)` pairs seen within the
/// last `duplicate_timeout` (spec.md §3/§9). Eviction is lazy — swept on
/// insert rather than via a per-entry timer task, since spec.md §9 only
/// requires that stale entries be *removable*, not immediately removed.
pub(crate) struct UniqueSet {
    seen: Mutex<HashMap<(u8, u16), Instant>>,
}

impl UniqueSet {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if `(channel, sequence)` was already present (a
    /// duplicate); otherwise records it and returns `false`.
    pub fn check_and_insert(&self, channel: u8, sequence: u16, timeout: Duration) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock();
        seen.retain(|_, inserted_at| now.duration_since(*inserted_at) < timeout);
        let key = (channel, sequence);
        if seen.contains_key(&key) {
            true
        } else {
            seen.insert(key, now);
            false
        }
    }
}

/// Exactly one in-progress fragment reassembly per peer (spec.md §3
/// "Fragment reassembly"). `parts[last_part]` may be shorter than the
/// others; all other slots, once filled, must share the same length.
pub(crate) struct FragmentState {
    fragment_id: Option<u16>,
    last_part: u16,
    part_len: Option<usize>,
    parts: Vec<Option<BytesMut>>,
    received_count: u16,
    pub(crate) last_activity: Instant,
}

pub(crate) enum FragmentOutcome {
    /// Still waiting on more parts.
    Pending,
    /// This part completed a fresh (or in-progress) reassembly.
    Complete(BytesMut),
    /// The part was invalid (wrong length, out of range, or a duplicate of
    /// an already-received part).
    Duplicate,
    Malformed,
}

impl FragmentState {
    pub fn new() -> Self {
        Self {
            fragment_id: None,
            last_part: 0,
            part_len: None,
            parts: Vec::new(),
            received_count: 0,
            last_activity: Instant::now(),
        }
    }

    /// Integrates one fragment part. `fragment_id`/`part`/`last_part` come
    /// from the wire `FragmentHeader`.
    pub fn integrate(
        &mut self,
        fragment_id: u16,
        part: u16,
        last_part: u16,
        data: &[u8],
    ) -> FragmentOutcome {
        self.last_activity = Instant::now();

        if part > last_part {
            return FragmentOutcome::Malformed;
        }

        if self.fragment_id != Some(fragment_id) {
            // First part of a new fragment_id replaces any in-progress one
            // (spec.md §4.4 step 3).
            self.fragment_id = Some(fragment_id);
            self.last_part = last_part;
            self.part_len = None;
            self.parts = vec![None; last_part as usize + 1];
            self.received_count = 0;
        } else if last_part != self.last_part {
            return FragmentOutcome::Malformed;
        }

        let idx = part as usize;
        if idx >= self.parts.len() || self.parts[idx].is_some() {
            return FragmentOutcome::Duplicate;
        }

        if part != self.last_part {
            match self.part_len {
                Some(len) if len != data.len() => return FragmentOutcome::Malformed,
                None => self.part_len = Some(data.len()),
                _ => {}
            }
        }

        self.parts[idx] = Some(BytesMut::from(data));
        self.received_count += 1;

        if self.received_count as usize == self.parts.len() {
            let mut whole = BytesMut::new();
            for slot in self.parts.drain(..) {
                whole.extend_from_slice(&slot.expect("all slots filled"));
            }
            self.fragment_id = None;
            FragmentOutcome::Complete(whole)
        } else {
            FragmentOutcome::Pending
        }
    }

    pub fn clear_if_stale(&mut self, timeout: Duration) -> bool {
        if self.fragment_id.is_some() && self.last_activity.elapsed() >= timeout {
            self.fragment_id = None;
            self.parts.clear();
            self.received_count = 0;
            true
        } else {
            false
        }
    }
}
