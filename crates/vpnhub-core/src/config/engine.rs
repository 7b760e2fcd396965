//! Reconciliation engine configuration.

use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

/// Scheduling and policy settings for the traffic engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between reconciliation passes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Seconds between expiry-only sweeps.
    #[serde(default = "default_expiry_sweep_interval")]
    pub expiry_sweep_interval_seconds: u64,
    /// Fixed UTC offset applied to expiry timestamps stored without a zone.
    #[serde(default)]
    pub expiry_utc_offset_minutes: i32,
    /// Close session records left open by a previous process on startup.
    #[serde(default = "default_true")]
    pub run_startup_recovery: bool,
}

impl EngineConfig {
    /// Interval of the reconciliation loop.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Interval of the expiry sweep loop.
    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_interval_seconds)
    }

    /// The zone naive expiry timestamps are interpreted in.
    ///
    /// Returns `None` when the configured offset is out of range.
    pub fn expiry_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.expiry_utc_offset_minutes.checked_mul(60)?)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            expiry_sweep_interval_seconds: default_expiry_sweep_interval(),
            expiry_utc_offset_minutes: 0,
            run_startup_recovery: true,
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}

fn default_expiry_sweep_interval() -> u64 {
    300
}

fn default_true() -> bool {
    true
}
