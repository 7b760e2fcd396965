//! OpenVPN status source configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the engine reads OpenVPN session state from.
///
/// The management interface is preferred; the status log is read only
/// when the management interface does not answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenVpnConfig {
    /// Whether OpenVPN sessions are polled at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Management interface host (loopback).
    #[serde(default = "default_management_host")]
    pub management_host: String,
    /// Management interface port.
    #[serde(default = "default_management_port")]
    pub management_port: u16,
    /// Deadline for one management command, connect to close.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    /// Path of the daemon's `--status` file, if one is written.
    #[serde(default)]
    pub status_log_path: Option<String>,
}

impl OpenVpnConfig {
    /// `host:port` of the management interface.
    pub fn management_addr(&self) -> String {
        format!("{}:{}", self.management_host, self.management_port)
    }

    /// Deadline for one management command.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl Default for OpenVpnConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            management_host: default_management_host(),
            management_port: default_management_port(),
            command_timeout_ms: default_command_timeout(),
            status_log_path: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_management_host() -> String {
    "127.0.0.1".to_string()
}

fn default_management_port() -> u16 {
    7505
}

fn default_command_timeout() -> u64 {
    3000
}
