//! Per-cycle traffic snapshot.

use serde::{Deserialize, Serialize};

use super::protocol::VpnProtocol;

/// Key of all in-process per-session state: protocol plus identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    /// Protocol backend.
    pub protocol: VpnProtocol,
    /// Username (OpenVPN) or peer public key (WireGuard).
    pub identity: String,
}

impl SessionKey {
    /// Build a key.
    pub fn new(protocol: VpnProtocol, identity: impl Into<String>) -> Self {
        Self {
            protocol,
            identity: identity.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.protocol, self.identity)
    }
}

/// Cumulative counters of one tunnel connection.
///
/// An identity may hold several concurrent connections (an OpenVPN user
/// logged in from two devices). Each one counts from zero on its own, so
/// deltas are taken per connection and summed per identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCounters {
    /// Stable id of the connection within its daemon (empty when the
    /// backend has one connection per identity).
    pub connection_id: String,
    /// Cumulative bytes received from the client.
    pub rx: u64,
    /// Cumulative bytes sent to the client.
    pub tx: u64,
}

/// One cycle's reading for one session from one backend.
///
/// Counters are cumulative and seen from the daemon: `rx` is what the
/// daemon received from the client, `tx` is what it sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSnapshot {
    /// Username or peer public key.
    pub identity: String,
    /// Backend that produced the reading.
    pub protocol: VpnProtocol,
    /// Cumulative bytes received from the client.
    pub cumulative_rx: u64,
    /// Cumulative bytes sent to the client.
    pub cumulative_tx: u64,
    /// Client address without port; empty when unknown.
    pub origin_ip: String,
    /// Whether the backend considers the session connected.
    pub liveness: bool,
    /// Per-connection counters; the totals above are their sums.
    #[serde(default)]
    pub connections: Vec<ConnectionCounters>,
}

impl TrafficSnapshot {
    /// The cache key for this snapshot.
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.protocol, self.identity.clone())
    }

    /// Counters per connection.
    ///
    /// A snapshot built without a breakdown is one unnamed connection
    /// carrying the totals.
    pub fn connection_counters(&self) -> Vec<ConnectionCounters> {
        if self.connections.is_empty() {
            return vec![ConnectionCounters {
                connection_id: String::new(),
                rx: self.cumulative_rx,
                tx: self.cumulative_tx,
            }];
        }
        self.connections.clone()
    }

    /// Whether this reading counts as a live session this cycle.
    pub fn is_live(&self) -> bool {
        self.protocol.presence_is_liveness() || self.liveness
    }
}
