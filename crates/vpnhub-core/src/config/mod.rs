//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod database;
pub mod engine;
pub mod logging;
pub mod openvpn;
pub mod wireguard;

use serde::{Deserialize, Serialize};

pub use self::database::DatabaseConfig;
pub use self::engine::EngineConfig;
pub use self::logging::LoggingConfig;
pub use self::openvpn::OpenVpnConfig;
pub use self::wireguard::WireGuardConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay) and
/// `VPNHUB__*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database connection settings.
    pub database: DatabaseConfig,
    /// Reconciliation engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// OpenVPN status source settings.
    #[serde(default)]
    pub openvpn: OpenVpnConfig,
    /// WireGuard status source settings.
    #[serde(default)]
    pub wireguard: WireGuardConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from the default `config/` directory.
    pub fn load(env: &str) -> Result<Self, AppError> {
        Self::load_from("config", env)
    }

    /// Load configuration from TOML files in `dir`.
    ///
    /// Merges `<dir>/default.toml` with an environment-specific overlay
    /// `<dir>/<env>.toml` and environment variables prefixed with `VPNHUB`.
    pub fn load_from(dir: &str, env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(&format!("{dir}/default")).required(false))
            .add_source(config::File::with_name(&format!("{dir}/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("VPNHUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.database.url.trim().is_empty() {
            return Err(AppError::configuration("database.url must not be empty"));
        }
        if self.engine.poll_interval_seconds == 0 {
            return Err(AppError::configuration(
                "engine.poll_interval_seconds must be greater than zero",
            ));
        }
        if self.engine.expiry_sweep_interval_seconds == 0 {
            return Err(AppError::configuration(
                "engine.expiry_sweep_interval_seconds must be greater than zero",
            ));
        }
        if self.engine.expiry_offset().is_none() {
            return Err(AppError::configuration(format!(
                "engine.expiry_utc_offset_minutes out of range: {}",
                self.engine.expiry_utc_offset_minutes
            )));
        }
        if self.openvpn.enabled && self.openvpn.command_timeout_ms == 0 {
            return Err(AppError::configuration(
                "openvpn.command_timeout_ms must be greater than zero",
            ));
        }
        if self.wireguard.enabled && self.wireguard.interface.trim().is_empty() {
            return Err(AppError::configuration(
                "wireguard.interface must not be empty when WireGuard is enabled",
            ));
        }
        Ok(())
    }
}
