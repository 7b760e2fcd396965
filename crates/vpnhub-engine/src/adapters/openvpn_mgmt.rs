//! OpenVPN management-interface client.
//!
//! Every command runs over a fresh loopback TCP connection: connect, skip
//! the `>INFO` greeting and any other real-time `>` notifications, send
//! the command, read until its terminator, then send `quit`. The whole
//! exchange is bounded by the configured timeout.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, warn};

use vpnhub_core::config::OpenVpnConfig;
use vpnhub_core::error::AppError;
use vpnhub_core::result::AppResult;
use vpnhub_entity::traffic::VpnProtocol;

use super::openvpn_status::parse_client_list_lines;
use super::{SnapshotMap, StatusSource};

/// Client for the OpenVPN `--management` TCP interface.
#[derive(Debug, Clone)]
pub struct ManagementClient {
    addr: String,
    timeout: Duration,
}

impl ManagementClient {
    /// Create a client for `addr` (`host:port`).
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Create a client from the `[openvpn]` configuration section.
    pub fn from_config(config: &OpenVpnConfig) -> Self {
        Self::new(config.management_addr(), config.command_timeout())
    }

    /// Management interface address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// List connected clients via `status 2`.
    pub async fn list_sessions(&self) -> SnapshotMap {
        match self.command("status 2", is_end_or_error).await {
            Ok(lines) => {
                if let Some(err) = lines.iter().find(|l| l.starts_with("ERROR:")) {
                    warn!(addr = %self.addr, response = %err, "OpenVPN rejected status query");
                    return SnapshotMap::new();
                }
                parse_client_list_lines(lines.iter().map(String::as_str))
            }
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "OpenVPN status query failed");
                SnapshotMap::new()
            }
        }
    }

    /// Disconnect the client with `identity` via `kill`.
    ///
    /// Returns `true` only if OpenVPN answered `SUCCESS`.
    pub async fn kill(&self, identity: &str) -> bool {
        match self.command(&format!("kill {identity}"), is_kill_reply).await {
            Ok(lines) => {
                let killed = lines.iter().any(|l| l.contains("SUCCESS"));
                if !killed {
                    warn!(addr = %self.addr, identity, response = ?lines, "OpenVPN kill not acknowledged");
                }
                killed
            }
            Err(e) => {
                warn!(addr = %self.addr, identity, error = %e, "OpenVPN kill failed");
                false
            }
        }
    }

    /// Whether the interface answers a `version` query.
    pub async fn is_available(&self) -> bool {
        match self.command("version", is_end_or_error).await {
            Ok(lines) => !lines.is_empty(),
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "OpenVPN management interface unavailable");
                false
            }
        }
    }

    async fn command(&self, command: &str, done: fn(&str) -> bool) -> AppResult<Vec<String>> {
        time::timeout(self.timeout, self.exchange(command, done))
            .await
            .map_err(|_| {
                AppError::timeout(format!(
                    "management command '{command}' timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })?
    }

    async fn exchange(&self, command: &str, done: fn(&str) -> bool) -> AppResult<Vec<String>> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(format!("{command}\n").as_bytes()).await?;
        debug!(addr = %self.addr, command, "Sent management command");

        let mut response = Vec::new();
        let read = async {
            while let Some(line) = lines.next_line().await? {
                let line = line.trim_end_matches('\r');
                if line.starts_with('>') {
                    continue;
                }
                let finished = done(line);
                response.push(line.to_string());
                if finished {
                    break;
                }
            }
            Ok::<_, std::io::Error>(())
        }
        .await;

        if let Err(e) = writer.write_all(b"quit\n").await {
            debug!(addr = %self.addr, error = %e, "Failed to send quit");
        }
        read?;
        Ok(response)
    }
}

#[async_trait]
impl StatusSource for ManagementClient {
    fn protocol(&self) -> VpnProtocol {
        VpnProtocol::OpenVpn
    }

    async fn snapshot(&self) -> SnapshotMap {
        self.list_sessions().await
    }
}

fn is_end_or_error(line: &str) -> bool {
    line == "END" || line.starts_with("ERROR:")
}

fn is_kill_reply(line: &str) -> bool {
    line.starts_with("SUCCESS:") || line.starts_with("ERROR:")
}
