//! Session log entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use vpnhub_core::types::{AccountId, SessionRecordId};

use crate::traffic::VpnProtocol;

/// One contiguous connected period for one account on one protocol.
///
/// A record is open while `disconnected_at` is `None`. At most one open
/// record exists per `(account_id, protocol)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionRecord {
    /// Unique record identifier.
    pub id: SessionRecordId,
    /// The account that connected.
    pub account_id: AccountId,
    /// Protocol the session ran over.
    pub protocol: VpnProtocol,
    /// Client origin address as reported by the daemon (may be empty).
    pub client_ip: String,
    /// When the tracker first saw the session.
    pub connected_at: DateTime<Utc>,
    /// When the tracker closed the session.
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Check whether the record is still open.
    pub fn is_open(&self) -> bool {
        self.disconnected_at.is_none()
    }

    /// Connected duration, if the record is closed.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.disconnected_at.map(|end| end - self.connected_at)
    }
}
