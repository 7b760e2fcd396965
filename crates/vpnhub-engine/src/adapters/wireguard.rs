//! WireGuard status source and peer control.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

use vpnhub_core::config::WireGuardConfig;
use vpnhub_core::error::AppError;
use vpnhub_core::result::AppResult;
use vpnhub_entity::traffic::{TrafficSnapshot, VpnProtocol};

use super::{SnapshotMap, StatusSource, host_without_port, merge_snapshot};

/// One peer as reported by the WireGuard interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgPeer {
    /// Peer public key.
    pub public_key: String,
    /// Last seen endpoint (`host:port`, or `(none)`).
    pub endpoint: String,
    /// Cumulative bytes received from the peer.
    pub rx_bytes: u64,
    /// Cumulative bytes sent to the peer.
    pub tx_bytes: u64,
    /// Unix time of the latest handshake (`0` = never).
    pub latest_handshake: i64,
    /// Whether the peer counts as connected.
    pub live: bool,
}

/// Control surface of a WireGuard interface.
#[async_trait]
pub trait WireGuardControl: Send + Sync + std::fmt::Debug {
    /// List every configured peer with its counters.
    async fn list_peers(&self) -> AppResult<Vec<WgPeer>>;

    /// Remove a peer, dropping its session.
    async fn remove_peer(&self, public_key: &str) -> AppResult<()>;
}

/// Status source over a [`WireGuardControl`].
#[derive(Debug, Clone)]
pub struct WireGuardSource {
    control: Arc<dyn WireGuardControl>,
}

impl WireGuardSource {
    /// Wrap a peer control.
    pub fn new(control: Arc<dyn WireGuardControl>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl StatusSource for WireGuardSource {
    fn protocol(&self) -> VpnProtocol {
        VpnProtocol::WireGuard
    }

    async fn snapshot(&self) -> SnapshotMap {
        let peers = match self.control.list_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                warn!(error = %e, "WireGuard peer listing failed");
                return SnapshotMap::new();
            }
        };

        let mut map = SnapshotMap::new();
        for peer in peers {
            merge_snapshot(
                &mut map,
                TrafficSnapshot {
                    origin_ip: host_without_port(&peer.endpoint),
                    identity: peer.public_key,
                    protocol: VpnProtocol::WireGuard,
                    cumulative_rx: peer.rx_bytes,
                    cumulative_tx: peer.tx_bytes,
                    liveness: peer.live,
                    connections: Vec::new(),
                },
            );
        }
        map
    }
}

/// [`WireGuardControl`] driving the `wg` command-line tool.
#[derive(Debug, Clone)]
pub struct WgCli {
    binary: String,
    interface: String,
    handshake_timeout: Duration,
    command_timeout: Duration,
}

impl WgCli {
    /// Build from the `[wireguard]` configuration section.
    pub fn from_config(config: &WireGuardConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            interface: config.interface.clone(),
            handshake_timeout: Duration::from_secs(config.handshake_timeout_seconds),
            command_timeout: config.command_timeout(),
        }
    }

    async fn run(&self, args: &[&str]) -> AppResult<String> {
        let mut command = Command::new(&self.binary);
        command.args(args).kill_on_drop(true);

        let output = time::timeout(self.command_timeout, command.output())
            .await
            .map_err(|_| {
                AppError::timeout(format!(
                    "'{} {}' timed out after {}ms",
                    self.binary,
                    args.join(" "),
                    self.command_timeout.as_millis()
                ))
            })??;

        if !output.status.success() {
            return Err(AppError::external_service(format!(
                "'{} {}' exited with {}: {}",
                self.binary,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl WireGuardControl for WgCli {
    async fn list_peers(&self) -> AppResult<Vec<WgPeer>> {
        let dump = self.run(&["show", &self.interface, "dump"]).await?;
        let peers = parse_dump(
            &dump,
            Utc::now().timestamp(),
            self.handshake_timeout.as_secs() as i64,
        );
        debug!(interface = %self.interface, peers = peers.len(), "Listed WireGuard peers");
        Ok(peers)
    }

    async fn remove_peer(&self, public_key: &str) -> AppResult<()> {
        self.run(&["set", &self.interface, "peer", public_key, "remove"])
            .await
            .map(|_| ())
    }
}

/// Parse `wg show <iface> dump` output.
///
/// The first line describes the interface itself (4 fields); every peer
/// line has 8 tab-separated fields: public key, preshared key, endpoint,
/// allowed IPs, latest handshake, rx, tx, persistent keepalive.
pub fn parse_dump(output: &str, now: i64, handshake_timeout_secs: i64) -> Vec<WgPeer> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 8 {
                return None;
            }
            let latest_handshake = fields[4].parse::<i64>().ok()?;
            let rx_bytes = fields[5].parse::<u64>().ok()?;
            let tx_bytes = fields[6].parse::<u64>().ok()?;
            let live = latest_handshake > 0 && now - latest_handshake <= handshake_timeout_secs;
            Some(WgPeer {
                public_key: fields[0].to_string(),
                endpoint: fields[2].to_string(),
                rx_bytes,
                tx_bytes,
                latest_handshake,
                live,
            })
        })
        .collect()
}
