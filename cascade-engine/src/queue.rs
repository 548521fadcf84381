//! Stale marker queue with per-key mutual exclusion.
//!
//! Each shard tracks pending markers (ordered finest-level-first so draining
//! is bottom-up), keys currently being recomputed, and keys deferred after a
//! failed attempt. Raising a key that is in flight keeps it pending, so a
//! marker raised while its recomputation runs is never lost. A key is handed
//! out at most once at a time. Failed keys sit out the rest of the pass and
//! return to pending on [`StaleQueue::rearm`], so one failing key never
//! blocks the keys behind it.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use core_types::level::Level;
use core_types::types::StreamId;
use parking_lot::Mutex;

const SHARD_COUNT: usize = 16;

/// One pending recomputation. Field order drives the draining order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StaleKey {
    pub level: Level,
    pub slot_start_ns: i64,
    pub stream: StreamId,
}

#[derive(Default)]
struct Shard {
    pending: BTreeSet<StaleKey>,
    in_flight: HashSet<StaleKey>,
    deferred: BTreeSet<StaleKey>,
}

pub struct StaleQueue {
    shards: Vec<Mutex<Shard>>,
    raised: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub deferred: usize,
    pub raised: u64,
    pub completed: u64,
    pub retried: u64,
}

impl Default for StaleQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl StaleQueue {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(Shard::default()))
                .collect(),
            raised: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &StaleKey) -> &Mutex<Shard> {
        let mut hash = 0u64;
        for chunk in key.stream.as_bytes().chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            hash ^= u64::from_le_bytes(word);
        }
        &self.shards[(hash as usize) % SHARD_COUNT]
    }

    /// Mark a key stale. Idempotent; returns whether it was newly pending.
    pub fn raise(&self, key: StaleKey) -> bool {
        let inserted = self.shard(&key).lock().pending.insert(key);
        if inserted {
            self.raised.fetch_add(1, Ordering::Relaxed);
        }
        inserted
    }

    /// Take the smallest pending key not currently in flight, if any.
    pub fn acquire(self: &Arc<Self>) -> Option<StaleLease> {
        loop {
            let mut candidate: Option<StaleKey> = None;
            for shard in &self.shards {
                let guard = shard.lock();
                if let Some(key) = guard
                    .pending
                    .iter()
                    .find(|key| !guard.in_flight.contains(key))
                {
                    if candidate.map_or(true, |best| *key < best) {
                        candidate = Some(*key);
                    }
                }
            }
            let key = candidate?;
            let mut guard = self.shard(&key).lock();
            if guard.pending.remove(&key) && guard.in_flight.insert(key) {
                return Some(StaleLease {
                    queue: Arc::clone(self),
                    key,
                    settled: false,
                });
            }
            // Lost the race for this key; scan again.
        }
    }

    /// Move deferred keys back to pending for the next pass.
    pub fn rearm(&self) -> usize {
        let mut rearmed = 0;
        for shard in &self.shards {
            let mut guard = shard.lock();
            while let Some(key) = guard.deferred.pop_first() {
                if guard.pending.insert(key) {
                    rearmed += 1;
                }
            }
        }
        rearmed
    }

    /// No pending or in-flight work. Deferred keys do not count; they wait
    /// for the next pass.
    pub fn is_idle(&self) -> bool {
        self.shards.iter().all(|shard| {
            let guard = shard.lock();
            guard.pending.is_empty() && guard.in_flight.is_empty()
        })
    }

    pub fn snapshot(&self) -> QueueStats {
        let mut pending = 0;
        let mut in_flight = 0;
        let mut deferred = 0;
        for shard in &self.shards {
            let guard = shard.lock();
            pending += guard.pending.len();
            in_flight += guard.in_flight.len();
            deferred += guard.deferred.len();
        }
        QueueStats {
            pending,
            in_flight,
            deferred,
            raised: self.raised.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
        }
    }

    fn settle(&self, key: StaleKey, failed: bool) {
        let mut guard = self.shard(&key).lock();
        guard.in_flight.remove(&key);
        if failed {
            guard.deferred.insert(key);
            self.retried.fetch_add(1, Ordering::Relaxed);
        } else {
            guard.deferred.remove(&key);
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Exclusive hold on one stale key. Dropping without [`StaleLease::complete`]
/// defers the key like a failure.
pub struct StaleLease {
    queue: Arc<StaleQueue>,
    key: StaleKey,
    settled: bool,
}

impl StaleLease {
    pub fn key(&self) -> StaleKey {
        self.key
    }

    /// Recomputation succeeded; the marker is cleared.
    pub fn complete(mut self) {
        self.settled = true;
        self.queue.settle(self.key, false);
    }

    /// Recomputation failed; the marker survives for the next pass.
    pub fn fail(mut self) {
        self.settled = true;
        self.queue.settle(self.key, true);
    }
}

impl Drop for StaleLease {
    fn drop(&mut self) {
        if !self.settled {
            self.queue.settle(self.key, true);
        }
    }
}
