//! Session lifecycle tracking from stateless polling.
//!
//! Each pass hands the tracker the set of sessions that are live right
//! now. Diffing that set against the tracked map yields connects,
//! heartbeats, misses and disconnects. Like the reconciler, the tracker
//! only updates its map when the pass commits.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use vpnhub_core::types::AccountId;
use vpnhub_entity::traffic::SessionKey;

/// Consecutive polls a tracked session may be absent before it is closed.
pub const DISCONNECT_AFTER_MISSED_POLLS: u32 = 1;

/// In-process mirror of one open session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    /// Owning account.
    pub account_id: AccountId,
    /// When the session was first seen.
    pub start_time: DateTime<Utc>,
    /// Client origin address.
    pub origin_ip: String,
    /// Consecutive polls the session has been absent.
    pub missed_polls: u32,
}

/// A session observed live in this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSession {
    /// Cache key.
    pub key: SessionKey,
    /// Account the identity resolved to.
    pub account_id: AccountId,
    /// Client origin address.
    pub origin_ip: String,
}

/// A lifecycle change derived from one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Newly live: open a record.
    Connect(LiveSession),
    /// Still live: refresh last-seen.
    Heartbeat {
        /// Cache key.
        key: SessionKey,
        /// Owning account.
        account_id: AccountId,
    },
    /// Absent, but within the grace window.
    Missed {
        /// Cache key.
        key: SessionKey,
        /// Misses including this one.
        missed_polls: u32,
    },
    /// Absent for too long: close the record.
    Disconnect {
        /// Cache key.
        key: SessionKey,
        /// Owning account.
        account_id: AccountId,
    },
}

/// The transitions of one poll.
#[derive(Debug, Clone)]
pub struct SessionTransitions {
    /// Poll time.
    pub at: DateTime<Utc>,
    /// Changes, live sessions first.
    pub items: Vec<Transition>,
}

impl SessionTransitions {
    /// Number of transitions matching `pred`.
    pub fn count(&self, pred: impl Fn(&Transition) -> bool) -> usize {
        self.items.iter().filter(|t| pred(t)).count()
    }
}

/// Map of sessions the engine currently believes are open.
#[derive(Debug, Default)]
pub struct SessionTracker {
    active: DashMap<SessionKey, ActiveSession>,
}

impl SessionTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff this poll's live sessions against the tracked map.
    pub fn diff(&self, live: &[LiveSession], now: DateTime<Utc>) -> SessionTransitions {
        let mut items = Vec::with_capacity(live.len());
        let mut seen = HashSet::with_capacity(live.len());

        for session in live {
            if !seen.insert(&session.key) {
                continue;
            }
            if self.active.contains_key(&session.key) {
                items.push(Transition::Heartbeat {
                    key: session.key.clone(),
                    account_id: session.account_id,
                });
            } else {
                items.push(Transition::Connect(session.clone()));
            }
        }

        for entry in self.active.iter() {
            if seen.contains(entry.key()) {
                continue;
            }
            let missed_polls = entry.missed_polls + 1;
            if missed_polls >= DISCONNECT_AFTER_MISSED_POLLS {
                items.push(Transition::Disconnect {
                    key: entry.key().clone(),
                    account_id: entry.account_id,
                });
            } else {
                items.push(Transition::Missed {
                    key: entry.key().clone(),
                    missed_polls,
                });
            }
        }

        SessionTransitions { at: now, items }
    }

    /// Apply the transitions of a committed pass.
    pub fn commit(&self, transitions: &SessionTransitions) {
        for transition in &transitions.items {
            match transition {
                Transition::Connect(session) => {
                    self.active.insert(
                        session.key.clone(),
                        ActiveSession {
                            account_id: session.account_id,
                            start_time: transitions.at,
                            origin_ip: session.origin_ip.clone(),
                            missed_polls: 0,
                        },
                    );
                }
                Transition::Heartbeat { key, .. } => {
                    if let Some(mut entry) = self.active.get_mut(key) {
                        entry.missed_polls = 0;
                    }
                }
                Transition::Missed { key, missed_polls } => {
                    if let Some(mut entry) = self.active.get_mut(key) {
                        entry.missed_polls = *missed_polls;
                    }
                }
                Transition::Disconnect { key, .. } => {
                    self.active.remove(key);
                }
            }
        }
    }

    /// Forget a key.
    pub fn purge(&self, key: &SessionKey) {
        self.active.remove(key);
    }

    /// Snapshot of the tracked sessions.
    pub fn active(&self) -> Vec<(SessionKey, ActiveSession)> {
        self.active
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Number of tracked sessions.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
