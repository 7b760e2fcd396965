//! Account entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use vpnhub_core::types::AccountId;

use super::status::AccountStatus;
use crate::traffic::VpnProtocol;

/// Bytes in one quota gigabyte.
pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// A VPN account governed by quota and expiry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Unique login name; also the OpenVPN session identity.
    pub username: String,
    /// Whether the account may use OpenVPN.
    pub openvpn_enabled: bool,
    /// Whether the account may use WireGuard.
    pub wireguard_enabled: bool,
    /// WireGuard peer public key, if a peer was provisioned.
    pub wg_public_key: Option<String>,
    /// Lifetime bytes received from the client.
    pub upload_bytes: i64,
    /// Lifetime bytes sent to the client.
    pub download_bytes: i64,
    /// Data quota in gigabytes (`0` = unlimited).
    pub quota_gb: f64,
    /// Expiry as written by the admin API; parsed by the policy engine.
    pub expire_at: Option<String>,
    /// Access status.
    pub status: AccountStatus,
    /// Last poll that saw the account connected.
    pub last_connection: Option<DateTime<Utc>>,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Lifetime upload plus download.
    pub fn usage_bytes(&self) -> u64 {
        (self.upload_bytes.max(0) as u64).saturating_add(self.download_bytes.max(0) as u64)
    }

    /// Quota in bytes, or `None` when unlimited.
    pub fn quota_bytes(&self) -> Option<f64> {
        (self.quota_gb > 0.0).then(|| self.quota_gb * BYTES_PER_GB)
    }

    /// Whether lifetime usage has reached a non-zero quota.
    pub fn quota_exhausted(&self) -> bool {
        self.quota_bytes()
            .is_some_and(|quota| self.usage_bytes() as f64 >= quota)
    }

    /// The identity this account's sessions carry on `protocol`.
    pub fn identity(&self, protocol: VpnProtocol) -> Option<&str> {
        match protocol {
            VpnProtocol::OpenVpn => Some(self.username.as_str()),
            VpnProtocol::WireGuard => self.wg_public_key.as_deref(),
        }
    }
}

/// Data required to create a new account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    /// Desired username.
    pub username: String,
    /// OpenVPN access.
    pub openvpn_enabled: bool,
    /// WireGuard access.
    pub wireguard_enabled: bool,
    /// WireGuard peer public key.
    pub wg_public_key: Option<String>,
    /// Quota in gigabytes (`0` = unlimited).
    pub quota_gb: f64,
    /// Expiry timestamp text.
    pub expire_at: Option<String>,
    /// Starting upload total.
    pub upload_bytes: i64,
    /// Starting download total.
    pub download_bytes: i64,
}

impl NewAccount {
    /// An active OpenVPN-only account with no quota and no expiry.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            openvpn_enabled: true,
            wireguard_enabled: false,
            wg_public_key: None,
            quota_gb: 0.0,
            expire_at: None,
            upload_bytes: 0,
            download_bytes: 0,
        }
    }

    /// Enable WireGuard with the given peer key.
    pub fn with_wireguard(mut self, public_key: impl Into<String>) -> Self {
        self.wireguard_enabled = true;
        self.wg_public_key = Some(public_key.into());
        self
    }

    /// Set the quota in gigabytes.
    pub fn with_quota_gb(mut self, quota_gb: f64) -> Self {
        self.quota_gb = quota_gb;
        self
    }

    /// Set the expiry text.
    pub fn with_expiry(mut self, expire_at: impl Into<String>) -> Self {
        self.expire_at = Some(expire_at.into());
        self
    }

    /// Set starting usage totals.
    pub fn with_usage(mut self, upload_bytes: i64, download_bytes: i64) -> Self {
        self.upload_bytes = upload_bytes;
        self.download_bytes = download_bytes;
        self
    }

    /// Materialize the account with a fresh id, as the database would.
    pub fn into_account(self, now: DateTime<Utc>) -> Account {
        Account {
            id: AccountId::new(),
            username: self.username,
            openvpn_enabled: self.openvpn_enabled,
            wireguard_enabled: self.wireguard_enabled,
            wg_public_key: self.wg_public_key,
            upload_bytes: self.upload_bytes,
            download_bytes: self.download_bytes,
            quota_gb: self.quota_gb,
            expire_at: self.expire_at,
            status: AccountStatus::Active,
            last_connection: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: i64 = 1024 * 1024 * 1024;

    #[test]
    fn test_zero_quota_is_unlimited() {
        let account = NewAccount::new("alice")
            .with_usage(500 * GB, 500 * GB)
            .into_account(Utc::now());
        assert!(account.quota_bytes().is_none());
        assert!(!account.quota_exhausted());
    }

    #[test]
    fn test_quota_reached_at_exact_limit() {
        let account = NewAccount::new("bob")
            .with_quota_gb(10.0)
            .with_usage(4 * GB, 6 * GB)
            .into_account(Utc::now());
        assert!(account.quota_exhausted());
    }
}
