//! Account status enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Access status of a VPN account.
///
/// The engine only ever moves an account out of [`AccountStatus::Active`];
/// re-activation is an administrative action outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Account may connect and is subject to policy checks.
    Active,
    /// Data quota exhausted.
    Suspended,
    /// Expiry date passed.
    Expired,
    /// Disabled by an administrator.
    Disabled,
}

impl AccountStatus {
    /// Whether accounts in this status may hold VPN sessions.
    pub fn can_connect(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether the engine may move an account from `self` to `next`.
    pub fn can_transition_to(&self, next: AccountStatus) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Suspended) | (Self::Active, Self::Expired)
        )
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Expired => "expired",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = vpnhub_core::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "expired" => Ok(Self::Expired),
            "disabled" => Ok(Self::Disabled),
            _ => Err(vpnhub_core::AppError::validation(format!(
                "Invalid account status: '{s}'. Expected one of: active, suspended, expired, disabled"
            ))),
        }
    }
}
