//! Command-line interface.

use clap::{Parser, Subcommand};

/// VPNHub traffic reconciliation and session-enforcement engine.
#[derive(Debug, Parser)]
#[command(name = "vpnhub-engine", version, about)]
pub struct Cli {
    /// Directory holding `default.toml` and environment overlays.
    #[arg(long, global = true)]
    pub config_dir: Option<String>,

    /// Environment overlay to load (`<config-dir>/<env>.toml`).
    #[arg(long, global = true)]
    pub env: Option<String>,

    /// Command to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Engine commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run both engine loops until interrupted.
    Run,
    /// Run a single reconciliation pass and expiry sweep, then exit.
    Once,
    /// Apply pending database migrations.
    Migrate,
    /// Probe the database and status sources and print what they report.
    Check,
}

impl Cli {
    /// Config directory: flag, then `VPNHUB_CONFIG_DIR`, then `config`.
    pub fn config_dir(&self) -> String {
        self.config_dir
            .clone()
            .or_else(|| std::env::var("VPNHUB_CONFIG_DIR").ok())
            .unwrap_or_else(|| "config".to_string())
    }

    /// Environment name: flag, then `VPNHUB_ENV`, then `development`.
    pub fn env(&self) -> String {
        self.env
            .clone()
            .or_else(|| std::env::var("VPNHUB_ENV").ok())
            .unwrap_or_else(|| "development".to_string())
    }
}
