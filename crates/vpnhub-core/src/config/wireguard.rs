//! WireGuard status source configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the `wg` command-line collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireGuardConfig {
    /// Whether WireGuard peers are polled at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interface name passed to `wg show` / `wg set`.
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Path or name of the `wg` binary.
    #[serde(default = "default_binary")]
    pub binary: String,
    /// A peer counts as connected if its last handshake is this recent.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,
    /// Deadline for one `wg` invocation.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

impl WireGuardConfig {
    /// Deadline for one `wg` invocation.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl Default for WireGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interface: default_interface(),
            binary: default_binary(),
            handshake_timeout_seconds: default_handshake_timeout(),
            command_timeout_ms: default_command_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interface() -> String {
    "wg0".to_string()
}

fn default_binary() -> String {
    "wg".to_string()
}

fn default_handshake_timeout() -> u64 {
    180
}

fn default_command_timeout() -> u64 {
    3000
}
