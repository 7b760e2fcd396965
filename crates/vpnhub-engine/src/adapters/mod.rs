//! Status source adapters.
//!
//! Every adapter turns one daemon's view of its connected clients into a
//! [`SnapshotMap`]. Adapters never fail a pass: unreachable daemons,
//! missing files and malformed rows all degrade to fewer (or no) entries.

pub mod openvpn;
pub mod openvpn_mgmt;
pub mod openvpn_status;
pub mod wireguard;

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;

use vpnhub_entity::traffic::{TrafficSnapshot, VpnProtocol};

pub use openvpn::OpenVpnSource;
pub use openvpn_mgmt::ManagementClient;
pub use openvpn_status::StatusLogSource;
pub use wireguard::{WgCli, WgPeer, WireGuardControl, WireGuardSource};

/// One cycle's readings from one backend, keyed by identity.
pub type SnapshotMap = HashMap<String, TrafficSnapshot>;

/// A backend that reports cumulative per-session counters.
#[async_trait]
pub trait StatusSource: Send + Sync + std::fmt::Debug {
    /// Protocol of every snapshot this source yields.
    fn protocol(&self) -> VpnProtocol;

    /// Read the current sessions. Returns an empty map on failure.
    async fn snapshot(&self) -> SnapshotMap;
}

/// Add a reading to `map`, folding duplicate identities together.
///
/// A username may hold several concurrent OpenVPN connections. Their
/// totals are summed, while each connection keeps its own counters so a
/// connection ending is never mistaken for a counter reset.
pub(crate) fn merge_snapshot(map: &mut SnapshotMap, snapshot: TrafficSnapshot) {
    match map.get_mut(&snapshot.identity) {
        Some(existing) => {
            existing.connections = existing.connection_counters();
            existing.connections.extend(snapshot.connection_counters());
            existing.cumulative_rx = existing.cumulative_rx.saturating_add(snapshot.cumulative_rx);
            existing.cumulative_tx = existing.cumulative_tx.saturating_add(snapshot.cumulative_tx);
            existing.liveness |= snapshot.liveness;
            if existing.origin_ip.is_empty() {
                existing.origin_ip = snapshot.origin_ip;
            }
        }
        None => {
            map.insert(snapshot.identity.clone(), snapshot);
        }
    }
}

/// Strip the port from a daemon-reported address.
///
/// `a.b.c.d:p` -> `a.b.c.d`, `[x::y]:p` -> `x::y`. A bare IPv6 address is
/// returned whole; `x::y:p` only loses its suffix when the full text is
/// not itself a valid address. `(none)` and empty input yield an empty
/// string.
pub(crate) fn host_without_port(addr: &str) -> String {
    let addr = addr.trim();
    if addr.is_empty() || addr == "(none)" {
        return String::new();
    }
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some((host, _)) = rest.split_once(']') {
            return host.to_string();
        }
    }
    if addr.parse::<IpAddr>().is_ok() {
        return addr.to_string();
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            host.to_string()
        }
        _ => addr.to_string(),
    }
}
