//! In-process ledger with the same transactional behaviour as Postgres.
//!
//! A transaction holds the store lock for its whole lifetime and mutates a
//! working copy. `commit` writes the copy back; dropping the transaction
//! discards it. Used by tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use vpnhub_core::error::AppError;
use vpnhub_core::result::AppResult;
use vpnhub_core::types::{AccountId, SessionRecordId};
use vpnhub_entity::account::{Account, AccountStatus, NewAccount};
use vpnhub_entity::session::SessionRecord;
use vpnhub_entity::traffic::VpnProtocol;

use super::{Ledger, LedgerTx};

#[derive(Debug, Clone, Default)]
struct State {
    accounts: BTreeMap<AccountId, Account>,
    sessions: Vec<SessionRecord>,
}

impl State {
    fn close_open(&mut self, at: DateTime<Utc>, pred: impl Fn(&SessionRecord) -> bool) -> u64 {
        let mut closed = 0;
        for record in self.sessions.iter_mut().filter(|r| r.is_open() && pred(r)) {
            record.disconnected_at = Some(at);
            closed += 1;
        }
        closed
    }
}

/// Ledger kept entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<State>>,
    fail_next_commit: Arc<AtomicBool>,
    commits: Arc<AtomicU64>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an account and return it.
    pub async fn insert_account(&self, new: NewAccount) -> Account {
        let account = new.into_account(Utc::now());
        self.state
            .lock()
            .await
            .accounts
            .insert(account.id, account.clone());
        account
    }

    /// Insert an open session record as a previous process would have left it.
    pub async fn insert_open_session(
        &self,
        account_id: AccountId,
        protocol: VpnProtocol,
        connected_at: DateTime<Utc>,
    ) -> SessionRecord {
        let record = SessionRecord {
            id: SessionRecordId::new(),
            account_id,
            protocol,
            client_ip: String::new(),
            connected_at,
            disconnected_at: None,
        };
        self.state.lock().await.sessions.push(record.clone());
        record
    }

    /// Apply an out-of-band change to an account, as the admin API would.
    pub async fn update_account(&self, id: AccountId, f: impl FnOnce(&mut Account)) -> bool {
        match self.state.lock().await.accounts.get_mut(&id) {
            Some(account) => {
                f(account);
                account.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Committed state of one account.
    pub async fn account(&self, id: AccountId) -> Option<Account> {
        self.state.lock().await.accounts.get(&id).cloned()
    }

    /// All committed session records in insertion order.
    pub async fn sessions(&self) -> Vec<SessionRecord> {
        self.state.lock().await.sessions.clone()
    }

    /// Committed open session records.
    pub async fn open_sessions(&self) -> Vec<SessionRecord> {
        self.state
            .lock()
            .await
            .sessions
            .iter()
            .filter(|r| r.is_open())
            .cloned()
            .collect()
    }

    /// Make the next commit fail and roll back.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Whether a transaction currently holds the store.
    pub fn in_transaction(&self) -> bool {
        self.state.try_lock().is_err()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryLedgerTx {
            guard,
            working,
            ledger: self.clone(),
        }))
    }
}

/// An open in-memory transaction.
pub struct MemoryLedgerTx {
    guard: OwnedMutexGuard<State>,
    working: State,
    ledger: MemoryLedger,
}

impl MemoryLedgerTx {
    fn account_mut(&mut self, id: AccountId) -> AppResult<&mut Account> {
        self.working
            .accounts
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Account {id} not found")))
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn find_account(
        &mut self,
        protocol: VpnProtocol,
        identity: &str,
    ) -> AppResult<Option<Account>> {
        Ok(self
            .working
            .accounts
            .values()
            .find(|a| a.identity(protocol) == Some(identity))
            .cloned())
    }

    async fn credit_traffic(
        &mut self,
        id: AccountId,
        upload: u64,
        download: u64,
    ) -> AppResult<()> {
        let account = self.account_mut(id)?;
        let upload = i64::try_from(upload).unwrap_or(i64::MAX);
        let download = i64::try_from(download).unwrap_or(i64::MAX);
        account.upload_bytes = account.upload_bytes.saturating_add(upload);
        account.download_bytes = account.download_bytes.saturating_add(download);
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn touch_last_connection(&mut self, id: AccountId, at: DateTime<Utc>) -> AppResult<()> {
        self.account_mut(id)?.last_connection = Some(at);
        Ok(())
    }

    async fn open_session(
        &mut self,
        id: AccountId,
        protocol: VpnProtocol,
        client_ip: &str,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.account_mut(id)?;
        self.working
            .close_open(at, |r| r.account_id == id && r.protocol == protocol);
        self.working.sessions.push(SessionRecord {
            id: SessionRecordId::new(),
            account_id: id,
            protocol,
            client_ip: client_ip.to_string(),
            connected_at: at,
            disconnected_at: None,
        });
        Ok(())
    }

    async fn close_latest_session(
        &mut self,
        id: AccountId,
        protocol: VpnProtocol,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let latest = self
            .working
            .sessions
            .iter_mut()
            .filter(|r| r.is_open() && r.account_id == id && r.protocol == protocol)
            .max_by_key(|r| r.connected_at);
        match latest {
            Some(record) => {
                record.disconnected_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close_open_sessions_for_account(
        &mut self,
        id: AccountId,
        at: DateTime<Utc>,
    ) -> AppResult<u64> {
        Ok(self.working.close_open(at, |r| r.account_id == id))
    }

    async fn close_all_open_sessions(&mut self, at: DateTime<Utc>) -> AppResult<u64> {
        Ok(self.working.close_open(at, |_| true))
    }

    async fn active_accounts(&mut self) -> AppResult<Vec<Account>> {
        Ok(self
            .working
            .accounts
            .values()
            .filter(|a| a.status == AccountStatus::Active)
            .cloned()
            .collect())
    }

    async fn set_status(&mut self, id: AccountId, status: AccountStatus) -> AppResult<bool> {
        let account = self.account_mut(id)?;
        if account.status != AccountStatus::Active || !account.status.can_transition_to(status) {
            return Ok(false);
        }
        account.status = status;
        account.updated_at = Utc::now();
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryLedgerTx {
            mut guard,
            working,
            ledger,
        } = *self;
        if ledger.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(AppError::database("Commit rejected by store"));
        }
        *guard = working;
        ledger.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let ledger = MemoryLedger::new();
        let account = ledger.insert_account(NewAccount::new("alice")).await;

        let mut tx = ledger.begin().await.unwrap();
        tx.credit_traffic(account.id, 100, 200).await.unwrap();
        assert!(ledger.in_transaction());
        tx.commit().await.unwrap();

        let stored = ledger.account(account.id).await.unwrap();
        assert_eq!(stored.upload_bytes, 100);
        assert_eq!(stored.download_bytes, 200);
        assert_eq!(ledger.commits(), 1);
        assert!(!ledger.in_transaction());
    }

    #[tokio::test]
    async fn test_drop_discards_writes() {
        let ledger = MemoryLedger::new();
        let account = ledger.insert_account(NewAccount::new("bob")).await;

        {
            let mut tx = ledger.begin().await.unwrap();
            tx.credit_traffic(account.id, 5, 5).await.unwrap();
        }

        let stored = ledger.account(account.id).await.unwrap();
        assert_eq!(stored.upload_bytes, 0);
        assert_eq!(ledger.commits(), 0);
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back() {
        let ledger = MemoryLedger::new();
        let account = ledger.insert_account(NewAccount::new("carol")).await;
        ledger.fail_next_commit();

        let mut tx = ledger.begin().await.unwrap();
        tx.set_status(account.id, AccountStatus::Suspended)
            .await
            .unwrap();
        assert!(tx.commit().await.is_err());

        let stored = ledger.account(account.id).await.unwrap();
        assert_eq!(stored.status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn test_open_session_keeps_one_open_record() {
        let ledger = MemoryLedger::new();
        let account = ledger.insert_account(NewAccount::new("dave")).await;
        let t0 = Utc::now();
        ledger
            .insert_open_session(account.id, VpnProtocol::OpenVpn, t0)
            .await;

        let mut tx = ledger.begin().await.unwrap();
        tx.open_session(account.id, VpnProtocol::OpenVpn, "10.0.0.2", t0)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let open = ledger.open_sessions().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].client_ip, "10.0.0.2");
        assert_eq!(ledger.sessions().await.len(), 2);
    }

    #[tokio::test]
    async fn test_close_latest_targets_newest_record() {
        let ledger = MemoryLedger::new();
        let account = ledger.insert_account(NewAccount::new("erin")).await;
        let older = Utc::now() - chrono::Duration::minutes(10);
        let newer = Utc::now();
        let first = ledger
            .insert_open_session(account.id, VpnProtocol::OpenVpn, older)
            .await;
        let second = ledger
            .insert_open_session(account.id, VpnProtocol::OpenVpn, newer)
            .await;

        let mut tx = ledger.begin().await.unwrap();
        assert!(
            tx.close_latest_session(account.id, VpnProtocol::OpenVpn, Utc::now())
                .await
                .unwrap()
        );
        tx.commit().await.unwrap();

        let open = ledger.open_sessions().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, first.id);
        assert_ne!(open[0].id, second.id);
    }

    #[tokio::test]
    async fn test_status_is_forward_only() {
        let ledger = MemoryLedger::new();
        let account = ledger.insert_account(NewAccount::new("frank")).await;

        let mut tx = ledger.begin().await.unwrap();
        assert!(
            tx.set_status(account.id, AccountStatus::Expired)
                .await
                .unwrap()
        );
        assert!(
            !tx.set_status(account.id, AccountStatus::Suspended)
                .await
                .unwrap()
        );
        assert!(
            !tx.set_status(account.id, AccountStatus::Active)
                .await
                .unwrap()
        );
        assert!(tx.active_accounts().await.unwrap().is_empty());
        tx.commit().await.unwrap();

        let stored = ledger.account(account.id).await.unwrap();
        assert_eq!(stored.status, AccountStatus::Expired);
    }

    #[tokio::test]
    async fn test_find_account_by_protocol_identity() {
        let ledger = MemoryLedger::new();
        let account = ledger
            .insert_account(NewAccount::new("gina").with_wireguard("peerkey="))
            .await;

        let mut tx = ledger.begin().await.unwrap();
        let by_key = tx
            .find_account(VpnProtocol::WireGuard, "peerkey=")
            .await
            .unwrap();
        assert_eq!(by_key.map(|a| a.id), Some(account.id));
        assert!(
            tx.find_account(VpnProtocol::WireGuard, "gina")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            tx.find_account(VpnProtocol::OpenVpn, "gina")
                .await
                .unwrap()
                .is_some()
        );
    }
}
