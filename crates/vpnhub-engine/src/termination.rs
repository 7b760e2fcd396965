//! Post-commit session termination.
//!
//! Terminations are plain values collected while the enforcing
//! transaction is open and dispatched only after it committed. Dispatch is
//! best-effort: failures are logged and never undo the committed status.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use vpnhub_core::error::AppError;
use vpnhub_core::result::AppResult;
use vpnhub_core::types::AccountId;
use vpnhub_entity::account::{Account, AccountStatus};
use vpnhub_entity::traffic::{SessionKey, VpnProtocol};

use crate::adapters::{ManagementClient, WireGuardControl};

/// How to cut off one protocol session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationStrategy {
    /// `kill <identity>` on the OpenVPN management interface.
    OpenVpnKill {
        /// Username to kill.
        identity: String,
    },
    /// Remove the peer from the WireGuard interface.
    WireGuardRemovePeer {
        /// Peer public key.
        public_key: String,
    },
}

/// An account whose sessions must be terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountTermination {
    /// Account id.
    pub account_id: AccountId,
    /// Username (OpenVPN identity).
    pub username: String,
    /// OpenVPN access flag.
    pub openvpn_enabled: bool,
    /// WireGuard access flag.
    pub wireguard_enabled: bool,
    /// WireGuard peer key.
    pub wg_public_key: Option<String>,
    /// Status committed for the account.
    pub new_status: AccountStatus,
}

impl AccountTermination {
    /// Capture what termination needs from an account.
    pub fn from_account(account: &Account, new_status: AccountStatus) -> Self {
        Self {
            account_id: account.id,
            username: account.username.clone(),
            openvpn_enabled: account.openvpn_enabled,
            wireguard_enabled: account.wireguard_enabled,
            wg_public_key: account.wg_public_key.clone(),
            new_status,
        }
    }

    /// Strategies selected by the account's protocol flags.
    pub fn strategies(&self) -> Vec<TerminationStrategy> {
        let mut strategies = Vec::with_capacity(2);
        if self.openvpn_enabled {
            strategies.push(TerminationStrategy::OpenVpnKill {
                identity: self.username.clone(),
            });
        }
        if self.wireguard_enabled {
            if let Some(key) = &self.wg_public_key {
                strategies.push(TerminationStrategy::WireGuardRemovePeer {
                    public_key: key.clone(),
                });
            }
        }
        strategies
    }

    /// In-process cache keys belonging to the account.
    pub fn session_keys(&self) -> Vec<SessionKey> {
        let mut keys = vec![SessionKey::new(VpnProtocol::OpenVpn, self.username.as_str())];
        if let Some(key) = &self.wg_public_key {
            keys.push(SessionKey::new(VpnProtocol::WireGuard, key.as_str()));
        }
        keys
    }
}

/// Outcome counts of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Strategies executed successfully.
    pub succeeded: usize,
    /// Strategies that failed.
    pub failed: usize,
    /// Strategies with no configured backend.
    pub skipped: usize,
}

/// Executes termination strategies against the tunnel daemons.
#[derive(Debug, Clone, Default)]
pub struct TerminationDispatcher {
    openvpn: Option<ManagementClient>,
    wireguard: Option<Arc<dyn WireGuardControl>>,
}

impl TerminationDispatcher {
    /// Create a dispatcher over the configured backends.
    pub fn new(
        openvpn: Option<ManagementClient>,
        wireguard: Option<Arc<dyn WireGuardControl>>,
    ) -> Self {
        Self { openvpn, wireguard }
    }

    /// Terminate every account in `terminations`.
    pub async fn dispatch(&self, terminations: &[AccountTermination]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for termination in terminations {
            for strategy in termination.strategies() {
                match self.execute(&strategy).await {
                    Ok(true) => {
                        report.succeeded += 1;
                        info!(
                            account_id = %termination.account_id,
                            username = %termination.username,
                            status = %termination.new_status,
                            ?strategy,
                            "Terminated session"
                        );
                    }
                    Ok(false) => {
                        report.skipped += 1;
                        debug!(?strategy, "No backend configured for termination");
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            account_id = %termination.account_id,
                            username = %termination.username,
                            ?strategy,
                            error = %e,
                            "Session termination failed"
                        );
                    }
                }
            }
        }
        report
    }

    /// Run one strategy; `Ok(false)` when its backend is not configured.
    async fn execute(&self, strategy: &TerminationStrategy) -> AppResult<bool> {
        match strategy {
            TerminationStrategy::OpenVpnKill { identity } => match &self.openvpn {
                Some(client) => {
                    if client.kill(identity).await {
                        Ok(true)
                    } else {
                        Err(AppError::external_service(format!(
                            "OpenVPN did not kill '{identity}'"
                        )))
                    }
                }
                None => Ok(false),
            },
            TerminationStrategy::WireGuardRemovePeer { public_key } => match &self.wireguard {
                Some(control) => control.remove_peer(public_key).await.map(|()| true),
                None => Ok(false),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio::sync::Mutex;
    use vpnhub_entity::account::NewAccount;

    use super::*;
    use crate::adapters::WgPeer;

    #[derive(Debug, Default)]
    struct RecordingWg {
        removed: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl WireGuardControl for RecordingWg {
        async fn list_peers(&self) -> AppResult<Vec<WgPeer>> {
            Ok(Vec::new())
        }

        async fn remove_peer(&self, public_key: &str) -> AppResult<()> {
            self.removed.lock().await.push(public_key.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_strategies_follow_flags() {
        let account = NewAccount::new("alice")
            .with_wireguard("key=")
            .into_account(Utc::now());
        let termination = AccountTermination::from_account(&account, AccountStatus::Suspended);
        assert_eq!(
            termination.strategies(),
            vec![
                TerminationStrategy::OpenVpnKill {
                    identity: "alice".into()
                },
                TerminationStrategy::WireGuardRemovePeer {
                    public_key: "key=".into()
                },
            ]
        );

        let mut wg_only = termination.clone();
        wg_only.openvpn_enabled = false;
        assert_eq!(wg_only.strategies().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_skips_unconfigured_and_reports_failures() {
        let wg = Arc::new(RecordingWg::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap().to_string();
        drop(listener);

        let dispatcher = TerminationDispatcher::new(
            Some(ManagementClient::new(dead, std::time::Duration::from_millis(200))),
            Some(wg.clone()),
        );
        let account = NewAccount::new("bob")
            .with_wireguard("bobkey=")
            .into_account(Utc::now());
        let report = dispatcher
            .dispatch(&[AccountTermination::from_account(
                &account,
                AccountStatus::Expired,
            )])
            .await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(*wg.removed.lock().await, vec!["bobkey=".to_string()]);

        let none = TerminationDispatcher::default()
            .dispatch(&[AccountTermination::from_account(
                &account,
                AccountStatus::Expired,
            )])
            .await;
        assert_eq!(none.skipped, 2);
    }
}
