//! OpenVPN status-log parser.
//!
//! OpenVPN rewrites its `--status` file every few seconds. Two layouts are
//! understood:
//!
//! * version 1: an `OpenVPN CLIENT LIST` section with a
//!   `Common Name,Real Address,Bytes Received,Bytes Sent,...` header,
//!   terminated by `ROUTING TABLE`;
//! * version 2/3: `CLIENT_LIST` rows (comma or tab separated), the same
//!   rows the management interface returns for `status 2`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use vpnhub_entity::traffic::{ConnectionCounters, TrafficSnapshot, VpnProtocol};

use super::{SnapshotMap, StatusSource, host_without_port, merge_snapshot};

/// Marker token of a version 2/3 client row.
const CLIENT_LIST: &str = "CLIENT_LIST";

/// Placeholder OpenVPN prints for an unauthenticated or unknown name.
const UNDEF: &str = "UNDEF";

/// Status source reading the OpenVPN status file.
#[derive(Debug, Clone)]
pub struct StatusLogSource {
    path: PathBuf,
}

impl StatusLogSource {
    /// Read from the status file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the status file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StatusSource for StatusLogSource {
    fn protocol(&self) -> VpnProtocol {
        VpnProtocol::OpenVpn
    }

    async fn snapshot(&self) -> SnapshotMap {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let map = parse_status_log(&content);
                debug!(path = %self.path.display(), sessions = map.len(), "Parsed OpenVPN status log");
                map
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "OpenVPN status log unreadable");
                SnapshotMap::new()
            }
        }
    }
}

/// Parse a whole status file, detecting its version.
pub fn parse_status_log(content: &str) -> SnapshotMap {
    let is_v2 = content.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with(CLIENT_LIST) || line.starts_with("HEADER")
    });
    if is_v2 {
        parse_client_list_lines(content.lines())
    } else {
        parse_v1(content)
    }
}

/// Parse `CLIENT_LIST` rows, ignoring every other line.
pub(crate) fn parse_client_list_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> SnapshotMap {
    let mut map = SnapshotMap::new();
    for line in lines {
        if let Some(snapshot) = parse_client_list_row(line) {
            merge_snapshot(&mut map, snapshot);
        }
    }
    map
}

/// Parse one version 2/3 client row.
///
/// Layout: `CLIENT_LIST,cn,real_addr,virt,virt6,rx,tx,since,since_t,username,...`.
fn parse_client_list_row(line: &str) -> Option<TrafficSnapshot> {
    let line = line.trim_end_matches(['\r', '\n']);
    let sep = if line.contains('\t') { '\t' } else { ',' };
    let fields: Vec<&str> = line.split(sep).collect();
    if fields.first().copied() != Some(CLIENT_LIST) || fields.len() < 7 {
        return None;
    }

    let rx = fields[5].trim().parse::<u64>().ok()?;
    let tx = fields[6].trim().parse::<u64>().ok()?;
    let identity = select_identity(fields.get(9).copied(), fields[1])?;
    let since = fields.get(8).or(fields.get(7)).copied();

    Some(connection_snapshot(identity, fields[2], since, rx, tx))
}

/// Parse the `OpenVPN CLIENT LIST` section of a version 1 file.
fn parse_v1(content: &str) -> SnapshotMap {
    let mut map = SnapshotMap::new();
    let mut in_rows = false;

    for line in content.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with("ROUTING TABLE") {
            break;
        }
        if line.starts_with("Common Name,") {
            in_rows = true;
            continue;
        }
        if !in_rows {
            continue;
        }

        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 4 {
            continue;
        }
        let (Ok(rx), Ok(tx)) = (
            fields[2].trim().parse::<u64>(),
            fields[3].trim().parse::<u64>(),
        ) else {
            continue;
        };
        let Some(identity) = select_identity(None, fields[0]) else {
            continue;
        };

        merge_snapshot(
            &mut map,
            connection_snapshot(identity, fields[1], fields.get(4).copied(), rx, tx),
        );
    }
    map
}

/// Snapshot of a single client row.
///
/// The real address (with its source port) and the connect time together
/// name the connection, so a reconnect from the same device starts a new
/// counter instead of continuing the old one.
fn connection_snapshot(
    identity: String,
    real_addr: &str,
    since: Option<&str>,
    rx: u64,
    tx: u64,
) -> TrafficSnapshot {
    let real_addr = real_addr.trim();
    let connection_id = match since.map(str::trim).filter(|s| !s.is_empty()) {
        Some(since) => format!("{real_addr}@{since}"),
        None => real_addr.to_string(),
    };
    TrafficSnapshot {
        identity,
        protocol: VpnProtocol::OpenVpn,
        cumulative_rx: rx,
        cumulative_tx: tx,
        origin_ip: host_without_port(real_addr),
        liveness: true,
        connections: vec![ConnectionCounters {
            connection_id,
            rx,
            tx,
        }],
    }
}

/// Prefer the username column, fall back to the common name.
fn select_identity(username: Option<&str>, common_name: &str) -> Option<String> {
    let usable = |s: &&str| !s.is_empty() && *s != UNDEF;
    username
        .map(str::trim)
        .filter(usable)
        .or_else(|| Some(common_name.trim()).filter(usable))
        .map(str::to_string)
}
