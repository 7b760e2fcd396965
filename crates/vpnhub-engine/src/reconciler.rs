//! Counter reconciliation.
//!
//! Daemons report cumulative byte counters that restart from zero when the
//! daemon (or the session) restarts. The reconciler remembers the last
//! reading of every connection under each [`SessionKey`] and turns each new
//! reading into a delta. Concurrent connections of one identity are
//! tracked apart, so one of them ending never looks like a reset.
//!
//! Cache updates are staged: [`Reconciler::compute`] never mutates the
//! cache, and the pass calls [`Reconciler::commit`] only after its ledger
//! transaction committed. A failed pass therefore leaves the cache where
//! it was and the next pass credits the same bytes again.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;

use vpnhub_entity::traffic::{SessionKey, TrafficSnapshot};

/// Committed passes a key may go unseen before its counters are dropped.
pub const EVICT_AFTER_IDLE_PASSES: u32 = 60;

/// Last cumulative counters seen for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterReading {
    /// Bytes received from the client.
    pub rx: u64,
    /// Bytes sent to the client.
    pub tx: u64,
}

#[derive(Debug, Default)]
struct KeyCounters {
    connections: HashMap<String, CounterReading>,
    idle_passes: u32,
}

/// Bytes attributable to one key since the previous committed reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterDelta {
    /// Cache key.
    pub key: SessionKey,
    /// Per-connection readings to store once the pass commits.
    pub current: HashMap<String, CounterReading>,
    /// Upload delta (from `rx`), summed over connections.
    pub upload: u64,
    /// Download delta (from `tx`), summed over connections.
    pub download: u64,
}

impl CounterDelta {
    /// Whether there is nothing to credit.
    pub fn is_zero(&self) -> bool {
        self.upload == 0 && self.download == 0
    }
}

/// Delta for one counter. A counter that went backwards was reset, and its
/// whole current value is new traffic.
pub fn counter_delta(current: u64, last: u64) -> u64 {
    if current >= last { current - last } else { current }
}

/// Per-key, per-connection counter cache.
#[derive(Debug, Default)]
pub struct Reconciler {
    cache: DashMap<SessionKey, KeyCounters>,
}

impl Reconciler {
    /// Create an empty reconciler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute deltas for this cycle's readings without touching the cache.
    ///
    /// Every reading yields a delta, including zero deltas, so the cache
    /// is refreshed for all of them on commit. A connection with no cached
    /// reading is new and credits its whole counter.
    pub fn compute<'a>(
        &self,
        snapshots: impl IntoIterator<Item = &'a TrafficSnapshot>,
    ) -> Vec<CounterDelta> {
        snapshots
            .into_iter()
            .map(|snapshot| {
                let key = snapshot.key();
                let mut current: HashMap<String, CounterReading> = HashMap::new();
                for counters in snapshot.connection_counters() {
                    let reading = current.entry(counters.connection_id).or_default();
                    reading.rx = reading.rx.saturating_add(counters.rx);
                    reading.tx = reading.tx.saturating_add(counters.tx);
                }

                let cached = self.cache.get(&key);
                let (mut upload, mut download) = (0u64, 0u64);
                for (connection_id, reading) in &current {
                    let last = cached
                        .as_ref()
                        .and_then(|entry| entry.connections.get(connection_id).copied())
                        .unwrap_or_default();
                    upload = upload.saturating_add(counter_delta(reading.rx, last.rx));
                    download = download.saturating_add(counter_delta(reading.tx, last.tx));
                }

                CounterDelta {
                    key,
                    current,
                    upload,
                    download,
                }
            })
            .collect()
    }

    /// Store the readings of a committed pass.
    ///
    /// Connections missing from a key's new reading are forgotten. Keys
    /// absent from the pass age by one; after [`EVICT_AFTER_IDLE_PASSES`]
    /// they are dropped.
    pub fn commit(&self, deltas: &[CounterDelta]) {
        let seen: HashSet<&SessionKey> = deltas.iter().map(|d| &d.key).collect();
        self.cache.retain(|key, entry| {
            if seen.contains(key) {
                return true;
            }
            entry.idle_passes += 1;
            entry.idle_passes < EVICT_AFTER_IDLE_PASSES
        });

        for delta in deltas {
            self.cache.insert(
                delta.key.clone(),
                KeyCounters {
                    connections: delta.current.clone(),
                    idle_passes: 0,
                },
            );
        }
    }

    /// Forget a key.
    pub fn purge(&self, key: &SessionKey) {
        self.cache.remove(key);
    }

    /// Last committed totals for a key, summed over its connections.
    pub fn last(&self, key: &SessionKey) -> Option<CounterReading> {
        self.cache.get(key).map(|entry| {
            entry
                .connections
                .values()
                .fold(CounterReading::default(), |sum, r| CounterReading {
                    rx: sum.rx.saturating_add(r.rx),
                    tx: sum.tx.saturating_add(r.tx),
                })
        })
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
