//! PostgreSQL ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use vpnhub_core::error::{AppError, ErrorKind};
use vpnhub_core::result::AppResult;
use vpnhub_core::types::AccountId;
use vpnhub_entity::account::{Account, AccountStatus};
use vpnhub_entity::traffic::VpnProtocol;

use super::{Ledger, LedgerTx};
use crate::repositories::{account, session_log};

/// Ledger backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    /// Create a ledger over `pool`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin transaction", e)
        })?;
        Ok(Box::new(PgLedgerTx { tx }))
    }
}

/// An open PostgreSQL transaction; rolled back on drop.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn find_account(
        &mut self,
        protocol: VpnProtocol,
        identity: &str,
    ) -> AppResult<Option<Account>> {
        account::find_by_identity(&mut *self.tx, protocol, identity).await
    }

    async fn credit_traffic(
        &mut self,
        id: AccountId,
        upload: u64,
        download: u64,
    ) -> AppResult<()> {
        account::add_traffic(&mut *self.tx, id, upload, download).await
    }

    async fn touch_last_connection(&mut self, id: AccountId, at: DateTime<Utc>) -> AppResult<()> {
        account::touch_last_connection(&mut *self.tx, id, at).await
    }

    async fn open_session(
        &mut self,
        id: AccountId,
        protocol: VpnProtocol,
        client_ip: &str,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        let stray = session_log::close_open_for_key(&mut *self.tx, id, protocol, at).await?;
        if stray > 0 {
            debug!(account_id = %id, %protocol, stray, "Closed stray open session records");
        }
        session_log::insert_open(&mut *self.tx, id, protocol, client_ip, at).await?;
        Ok(())
    }

    async fn close_latest_session(
        &mut self,
        id: AccountId,
        protocol: VpnProtocol,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        session_log::close_latest(&mut *self.tx, id, protocol, at).await
    }

    async fn close_open_sessions_for_account(
        &mut self,
        id: AccountId,
        at: DateTime<Utc>,
    ) -> AppResult<u64> {
        session_log::close_open_for_account(&mut *self.tx, id, at).await
    }

    async fn close_all_open_sessions(&mut self, at: DateTime<Utc>) -> AppResult<u64> {
        session_log::close_all_open(&mut *self.tx, at).await
    }

    async fn active_accounts(&mut self) -> AppResult<Vec<Account>> {
        account::lock_active(&mut *self.tx).await
    }

    async fn set_status(&mut self, id: AccountId, status: AccountStatus) -> AppResult<bool> {
        account::transition_from_active(&mut *self.tx, id, status).await
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit transaction", e)
        })
    }
}
