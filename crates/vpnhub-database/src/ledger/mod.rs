//! Transactional persistence seam used by a reconciliation pass.
//!
//! A pass opens exactly one [`LedgerTx`], performs every mutation through
//! it, and finishes with [`LedgerTx::commit`]. Dropping a transaction
//! without committing discards its writes. `commit` consumes the
//! transaction, so nothing can run against it afterwards.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vpnhub_core::result::AppResult;
use vpnhub_core::types::AccountId;
use vpnhub_entity::account::{Account, AccountStatus};
use vpnhub_entity::traffic::VpnProtocol;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

/// Source of pass-scoped transactions.
#[async_trait]
pub trait Ledger: Send + Sync + std::fmt::Debug {
    /// Begin a new transaction.
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>>;
}

/// One open transaction against the account and session-log store.
#[async_trait]
pub trait LedgerTx: Send {
    /// Resolve a session identity to its account.
    async fn find_account(
        &mut self,
        protocol: VpnProtocol,
        identity: &str,
    ) -> AppResult<Option<Account>>;

    /// Add deltas to an account's lifetime totals.
    async fn credit_traffic(&mut self, id: AccountId, upload: u64, download: u64)
    -> AppResult<()>;

    /// Record that the account was seen connected at `at`.
    async fn touch_last_connection(&mut self, id: AccountId, at: DateTime<Utc>) -> AppResult<()>;

    /// Open a session record, closing any stray open record for the key first.
    async fn open_session(
        &mut self,
        id: AccountId,
        protocol: VpnProtocol,
        client_ip: &str,
        at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Close the most recently opened record for the key.
    async fn close_latest_session(
        &mut self,
        id: AccountId,
        protocol: VpnProtocol,
        at: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Close every open record of an account.
    async fn close_open_sessions_for_account(
        &mut self,
        id: AccountId,
        at: DateTime<Utc>,
    ) -> AppResult<u64>;

    /// Close every open record left in the store.
    async fn close_all_open_sessions(&mut self, at: DateTime<Utc>) -> AppResult<u64>;

    /// Lock and return all active accounts.
    async fn active_accounts(&mut self) -> AppResult<Vec<Account>>;

    /// Move an active account to `status`; `false` if it was not active.
    async fn set_status(&mut self, id: AccountId, status: AccountStatus) -> AppResult<bool>;

    /// Commit all writes and release the transaction.
    async fn commit(self: Box<Self>) -> AppResult<()>;
}
