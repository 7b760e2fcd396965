//! OpenVPN source selection.

use async_trait::async_trait;
use tracing::debug;

use vpnhub_core::config::OpenVpnConfig;
use vpnhub_entity::traffic::VpnProtocol;

use super::{ManagementClient, SnapshotMap, StatusLogSource, StatusSource};

/// OpenVPN status source preferring the management interface.
///
/// Each cycle probes the interface with `version`; when it does not answer
/// the status log is read instead, if one is configured.
#[derive(Debug, Clone)]
pub struct OpenVpnSource {
    management: ManagementClient,
    status_log: Option<StatusLogSource>,
}

impl OpenVpnSource {
    /// Combine a management client with an optional status-log fallback.
    pub fn new(management: ManagementClient, status_log: Option<StatusLogSource>) -> Self {
        Self {
            management,
            status_log,
        }
    }

    /// Build from the `[openvpn]` configuration section.
    pub fn from_config(config: &OpenVpnConfig) -> Self {
        Self::new(
            ManagementClient::from_config(config),
            config.status_log_path.as_deref().map(StatusLogSource::new),
        )
    }

    /// The management client, also used for kills.
    pub fn management(&self) -> &ManagementClient {
        &self.management
    }
}

#[async_trait]
impl StatusSource for OpenVpnSource {
    fn protocol(&self) -> VpnProtocol {
        VpnProtocol::OpenVpn
    }

    async fn snapshot(&self) -> SnapshotMap {
        if self.management.is_available().await {
            return self.management.list_sessions().await;
        }
        match &self.status_log {
            Some(log) => {
                debug!(path = %log.path().display(), "Falling back to OpenVPN status log");
                log.snapshot().await
            }
            None => SnapshotMap::new(),
        }
    }
}
