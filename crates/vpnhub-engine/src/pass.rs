//! Reconciliation and expiry passes.
//!
//! A full pass runs: collect snapshots -> begin transaction -> resolve
//! accounts -> compute deltas -> credit traffic -> persist session
//! transitions -> apply policy -> commit -> advance in-process caches ->
//! dispatch terminations.
//! Terminations are an outbox: they are gathered while the transaction is
//! open and executed only after `commit` consumed it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use vpnhub_core::result::AppResult;
use vpnhub_database::ledger::{Ledger, LedgerTx};
use vpnhub_entity::account::Account;
use vpnhub_entity::traffic::{SessionKey, TrafficSnapshot};

use crate::adapters::StatusSource;
use crate::policy::{PolicyEngine, PolicyMode};
use crate::reconciler::Reconciler;
use crate::termination::{AccountTermination, DispatchReport, TerminationDispatcher};
use crate::tracker::{LiveSession, SessionTracker, Transition};

/// Summary of one pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    /// Snapshots collected from all sources.
    pub snapshots: usize,
    /// Snapshots whose identity matched no account.
    pub unknown_identities: usize,
    /// Sessions whose traffic was credited.
    pub credited: usize,
    /// Upload bytes credited.
    pub upload_bytes: u64,
    /// Download bytes credited.
    pub download_bytes: u64,
    /// Sessions opened.
    pub connects: usize,
    /// Sessions still live.
    pub heartbeats: usize,
    /// Sessions closed.
    pub disconnects: usize,
    /// Accounts moved out of `active`.
    pub terminations: Vec<AccountTermination>,
    /// Termination results.
    pub dispatch: DispatchReport,
}

/// Everything one pass needs, shared by both engine loops.
#[derive(Debug)]
pub struct ReconciliationPass {
    ledger: Arc<dyn Ledger>,
    sources: Vec<Arc<dyn StatusSource>>,
    reconciler: Reconciler,
    tracker: SessionTracker,
    policy: PolicyEngine,
    dispatcher: TerminationDispatcher,
    /// Serializes passes so cache updates apply in commit order.
    running: Mutex<()>,
}

impl ReconciliationPass {
    /// Assemble a pass.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        sources: Vec<Arc<dyn StatusSource>>,
        policy: PolicyEngine,
        dispatcher: TerminationDispatcher,
    ) -> Self {
        Self {
            ledger,
            sources,
            reconciler: Reconciler::new(),
            tracker: SessionTracker::new(),
            policy,
            dispatcher,
            running: Mutex::new(()),
        }
    }

    /// Counter cache.
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Session map.
    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    /// Close session records left open by a previous process.
    ///
    /// The tracker starts empty, so any open record in the store belongs
    /// to no tracked session and would never be closed otherwise.
    pub async fn startup_recovery(&self) -> AppResult<u64> {
        let _running = self.running.lock().await;
        let mut tx = self.ledger.begin().await?;
        let closed = tx.close_all_open_sessions(Utc::now()).await?;
        tx.commit().await?;

        if closed > 0 {
            info!(closed, "Startup recovery closed orphaned session records");
        } else {
            info!("Startup recovery: no orphaned session records");
        }
        Ok(closed)
    }

    /// Run one full reconciliation pass.
    pub async fn run_full(&self) -> AppResult<PassReport> {
        let _running = self.running.lock().await;
        let snapshots = self.collect().await;
        let now = Utc::now();
        let mut report = PassReport {
            snapshots: snapshots.len(),
            ..PassReport::default()
        };

        let mut tx = self.ledger.begin().await?;
        let accounts = resolve(tx.as_mut(), &snapshots, &mut report).await?;

        // Identities without an account are neither credited nor cached.
        let deltas = self
            .reconciler
            .compute(snapshots.iter().filter(|s| accounts.contains_key(&s.key())));

        for delta in deltas.iter().filter(|d| !d.is_zero()) {
            let Some(account) = accounts.get(&delta.key) else {
                continue;
            };
            tx.credit_traffic(account.id, delta.upload, delta.download)
                .await?;
            report.credited += 1;
            report.upload_bytes += delta.upload;
            report.download_bytes += delta.download;
        }

        let live: Vec<LiveSession> = snapshots
            .iter()
            .filter(|s| s.is_live())
            .filter_map(|s| {
                let key = s.key();
                accounts.get(&key).map(|account| LiveSession {
                    key,
                    account_id: account.id,
                    origin_ip: s.origin_ip.clone(),
                })
            })
            .collect();
        let transitions = self.tracker.diff(&live, now);

        for transition in &transitions.items {
            match transition {
                Transition::Connect(session) => {
                    tx.open_session(
                        session.account_id,
                        session.key.protocol,
                        &session.origin_ip,
                        now,
                    )
                    .await?;
                    tx.touch_last_connection(session.account_id, now).await?;
                    report.connects += 1;
                    debug!(key = %session.key, "Session connected");
                }
                Transition::Heartbeat { account_id, .. } => {
                    tx.touch_last_connection(*account_id, now).await?;
                    report.heartbeats += 1;
                }
                Transition::Missed { key, missed_polls } => {
                    debug!(%key, missed_polls, "Session missing from poll");
                }
                Transition::Disconnect { key, account_id } => {
                    if !tx.close_latest_session(*account_id, key.protocol, now).await? {
                        warn!(%key, "No open session record to close");
                    }
                    report.disconnects += 1;
                    debug!(%key, "Session disconnected");
                }
            }
        }

        let outbox = self
            .enforce(tx.as_mut(), PolicyMode::Full, now)
            .await?;

        tx.commit().await?;
        self.reconciler.commit(&deltas);
        self.tracker.commit(&transitions);

        report.dispatch = self.terminate(&outbox).await;
        report.terminations = outbox;

        info!(
            snapshots = report.snapshots,
            credited = report.credited,
            upload_bytes = report.upload_bytes,
            download_bytes = report.download_bytes,
            connects = report.connects,
            disconnects = report.disconnects,
            terminations = report.terminations.len(),
            "Reconciliation pass completed"
        );
        Ok(report)
    }

    /// Run one expiry sweep.
    pub async fn run_expiry_sweep(&self) -> AppResult<PassReport> {
        let _running = self.running.lock().await;
        let now = Utc::now();

        let mut tx = self.ledger.begin().await?;
        let outbox = self
            .enforce(tx.as_mut(), PolicyMode::ExpiryOnly, now)
            .await?;
        tx.commit().await?;

        let mut report = PassReport {
            dispatch: self.terminate(&outbox).await,
            ..PassReport::default()
        };
        report.terminations = outbox;

        if !report.terminations.is_empty() {
            info!(expired = report.terminations.len(), "Expiry sweep completed");
        }
        Ok(report)
    }

    async fn collect(&self) -> Vec<TrafficSnapshot> {
        let mut snapshots = Vec::new();
        for source in &self.sources {
            let map = source.snapshot().await;
            debug!(protocol = %source.protocol(), sessions = map.len(), "Collected snapshot");
            snapshots.extend(map.into_values());
        }
        snapshots
    }

    /// Apply policy inside `tx` and return the termination outbox.
    async fn enforce(
        &self,
        tx: &mut dyn LedgerTx,
        mode: PolicyMode,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<AccountTermination>> {
        let accounts = tx.active_accounts().await?;
        let mut outbox = Vec::new();

        for decision in self.policy.evaluate_all(&accounts, mode, now) {
            let account = &decision.account;
            if !tx.set_status(account.id, decision.new_status).await? {
                continue;
            }
            let closed = tx.close_open_sessions_for_account(account.id, now).await?;
            info!(
                account_id = %account.id,
                username = %account.username,
                status = %decision.new_status,
                reason = ?decision.reason,
                closed_sessions = closed,
                "Account access revoked"
            );
            outbox.push(AccountTermination::from_account(
                account,
                decision.new_status,
            ));
        }
        Ok(outbox)
    }

    /// Dispatch committed terminations and forget the accounts' keys.
    async fn terminate(&self, outbox: &[AccountTermination]) -> DispatchReport {
        if outbox.is_empty() {
            return DispatchReport::default();
        }
        let report = self.dispatcher.dispatch(outbox).await;
        for termination in outbox {
            for key in termination.session_keys() {
                self.reconciler.purge(&key);
                self.tracker.purge(&key);
            }
        }
        report
    }
}

/// Resolve every snapshot identity to its account.
async fn resolve(
    tx: &mut dyn LedgerTx,
    snapshots: &[TrafficSnapshot],
    report: &mut PassReport,
) -> AppResult<HashMap<SessionKey, Account>> {
    let mut accounts = HashMap::with_capacity(snapshots.len());
    for snapshot in snapshots {
        match tx.find_account(snapshot.protocol, &snapshot.identity).await? {
            Some(account) => {
                accounts.insert(snapshot.key(), account);
            }
            None => {
                report.unknown_identities += 1;
                debug!(
                    protocol = %snapshot.protocol,
                    identity = %snapshot.identity,
                    "Snapshot identity matches no account"
                );
            }
        }
    }
    Ok(accounts)
}
