//! End-to-end reconciliation passes against the in-memory ledger.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use vpnhub_database::MemoryLedger;
use vpnhub_engine::EngineScheduler;
use vpnhub_entity::account::{AccountStatus, NewAccount};
use vpnhub_entity::traffic::{SessionKey, VpnProtocol};

use common::{FakeOpenVpn, FakeWireGuard, GB, build_pass};

#[tokio::test]
async fn test_quota_breach_suspends_and_kills_after_commit() {
    let ledger = MemoryLedger::new();
    let account = ledger
        .insert_account(
            NewAccount::new("alice")
                .with_quota_gb(10.0)
                .with_usage(GB * 19 / 2, 0),
        )
        .await;
    let openvpn = FakeOpenVpn::start(ledger.clone()).await;
    openvpn.connect("alice", GB as u64, 0, "203.0.113.10:41234");
    let pass = build_pass(&ledger, Some(&openvpn), None);

    let report = pass.run_full().await.unwrap();

    let stored = ledger.account(account.id).await.unwrap();
    assert_eq!(stored.status, AccountStatus::Suspended);
    assert_eq!(stored.upload_bytes, GB * 19 / 2 + GB);
    assert_eq!(report.terminations.len(), 1);
    assert_eq!(report.dispatch.succeeded, 1);

    let kills = openvpn.kills();
    assert_eq!(kills.len(), 1);
    assert_eq!(kills[0].identity, "alice");
    assert!(!kills[0].ledger_in_transaction);
    assert_eq!(kills[0].commits_at_kill, 1);

    assert!(ledger.open_sessions().await.is_empty());
    let key = SessionKey::new(VpnProtocol::OpenVpn, "alice");
    assert!(pass.reconciler().last(&key).is_none());
    assert!(pass.tracker().is_empty());
}

#[tokio::test]
async fn test_counter_reset_credits_post_reset_value() {
    let ledger = MemoryLedger::new();
    let account = ledger.insert_account(NewAccount::new("bob")).await;
    let openvpn = FakeOpenVpn::start(ledger.clone()).await;
    let pass = build_pass(&ledger, Some(&openvpn), None);

    openvpn.connect("bob", 500_000_000, 0, "203.0.113.11:1194");
    pass.run_full().await.unwrap();
    openvpn.connect("bob", 1_000, 0, "203.0.113.11:1194");
    let report = pass.run_full().await.unwrap();

    assert_eq!(report.upload_bytes, 1_000);
    let stored = ledger.account(account.id).await.unwrap();
    assert_eq!(stored.upload_bytes, 500_001_000);
}

#[tokio::test]
async fn test_unchanged_counters_credit_nothing_twice() {
    let ledger = MemoryLedger::new();
    let account = ledger.insert_account(NewAccount::new("carol")).await;
    let openvpn = FakeOpenVpn::start(ledger.clone()).await;
    openvpn.connect("carol", 4_000, 8_000, "203.0.113.12:1194");
    let pass = build_pass(&ledger, Some(&openvpn), None);

    pass.run_full().await.unwrap();
    let second = pass.run_full().await.unwrap();

    assert_eq!(second.credited, 0);
    assert_eq!(second.heartbeats, 1);
    let stored = ledger.account(account.id).await.unwrap();
    assert_eq!((stored.upload_bytes, stored.download_bytes), (4_000, 8_000));
    assert!(stored.last_connection.is_some());
}

#[tokio::test]
async fn test_absent_session_is_closed_on_next_poll() {
    let ledger = MemoryLedger::new();
    let account = ledger.insert_account(NewAccount::new("dave")).await;
    let openvpn = FakeOpenVpn::start(ledger.clone()).await;
    openvpn.connect("dave", 10, 10, "203.0.113.13:1194");
    let pass = build_pass(&ledger, Some(&openvpn), None);

    pass.run_full().await.unwrap();
    let open = ledger.open_sessions().await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].client_ip, "203.0.113.13");

    openvpn.disconnect("dave");
    let before = Utc::now();
    let report = pass.run_full().await.unwrap();

    assert_eq!(report.disconnects, 1);
    assert!(pass.tracker().is_empty());
    let sessions = ledger.sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].account_id, account.id);
    assert!(sessions[0].disconnected_at.unwrap() >= before);
}

#[tokio::test]
async fn test_expiry_sweep_expires_once() {
    let ledger = MemoryLedger::new();
    let account = ledger
        .insert_account(
            NewAccount::new("erin")
                .with_wireguard("erinkey=")
                .with_expiry("2020-01-01 00:00:00"),
        )
        .await;
    let wireguard = FakeWireGuard::new(ledger.clone());
    let pass = build_pass(&ledger, None, Some(Arc::clone(&wireguard)));

    let first = pass.run_expiry_sweep().await.unwrap();
    assert_eq!(first.terminations.len(), 1);
    assert_eq!(
        ledger.account(account.id).await.unwrap().status,
        AccountStatus::Expired
    );
    let removed = wireguard.removed();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].identity, "erinkey=");
    assert!(!removed[0].ledger_in_transaction);

    let second = pass.run_expiry_sweep().await.unwrap();
    assert!(second.terminations.is_empty());
    assert_eq!(wireguard.removed().len(), 1);
}

#[tokio::test]
async fn test_unreachable_management_disconnects_on_first_miss() {
    let ledger = MemoryLedger::new();
    ledger.insert_account(NewAccount::new("frank")).await;
    let openvpn = FakeOpenVpn::start(ledger.clone()).await;
    openvpn.connect("frank", 1, 1, "203.0.113.14:1194");
    let pass = build_pass(&ledger, Some(&openvpn), None);

    pass.run_full().await.unwrap();
    assert_eq!(ledger.open_sessions().await.len(), 1);

    openvpn.shutdown().await;
    let report = pass.run_full().await.unwrap();

    assert_eq!(report.snapshots, 0);
    assert_eq!(report.disconnects, 1);
    assert!(ledger.open_sessions().await.is_empty());
}

#[tokio::test]
async fn test_failed_commit_loses_no_traffic() {
    let ledger = MemoryLedger::new();
    let account = ledger.insert_account(NewAccount::new("gina")).await;
    let openvpn = FakeOpenVpn::start(ledger.clone()).await;
    openvpn.connect("gina", 700, 300, "203.0.113.15:1194");
    let pass = build_pass(&ledger, Some(&openvpn), None);

    ledger.fail_next_commit();
    assert!(pass.run_full().await.is_err());
    assert_eq!(ledger.account(account.id).await.unwrap().upload_bytes, 0);
    assert!(pass.reconciler().is_empty());
    assert!(pass.tracker().is_empty());

    pass.run_full().await.unwrap();
    pass.run_full().await.unwrap();
    let stored = ledger.account(account.id).await.unwrap();
    assert_eq!((stored.upload_bytes, stored.download_bytes), (700, 300));
    assert_eq!(ledger.open_sessions().await.len(), 1);
}

#[tokio::test]
async fn test_unknown_identity_is_neither_credited_nor_cached() {
    let ledger = MemoryLedger::new();
    let openvpn = FakeOpenVpn::start(ledger.clone()).await;
    openvpn.connect("stranger", 50, 50, "203.0.113.16:1194");
    let pass = build_pass(&ledger, Some(&openvpn), None);

    let report = pass.run_full().await.unwrap();

    assert_eq!(report.unknown_identities, 1);
    assert_eq!(report.credited, 0);
    assert_eq!(report.connects, 0);
    assert!(ledger.sessions().await.is_empty());
    let key = SessionKey::new(VpnProtocol::OpenVpn, "stranger");
    assert!(pass.reconciler().last(&key).is_none());
    assert!(pass.reconciler().is_empty());
}

#[tokio::test]
async fn test_ending_one_of_two_logins_credits_only_new_traffic() {
    const MB: u64 = 1024 * 1024;
    let ledger = MemoryLedger::new();
    let account = ledger
        .insert_account(NewAccount::new("alice").with_quota_gb(60.0))
        .await;
    let openvpn = FakeOpenVpn::start(ledger.clone()).await;
    openvpn.connect("alice", 50 * GB as u64, 0, "203.0.113.10:41234");
    openvpn.connect("alice", GB as u64, 0, "198.51.100.7:50311");
    let pass = build_pass(&ledger, Some(&openvpn), None);

    let first = pass.run_full().await.unwrap();
    assert_eq!(first.upload_bytes, 51 * GB as u64);

    openvpn.disconnect_from("alice", "198.51.100.7:50311");
    openvpn.connect("alice", 50 * GB as u64 + MB, 0, "203.0.113.10:41234");
    let second = pass.run_full().await.unwrap();

    assert_eq!(second.upload_bytes, MB);
    let stored = ledger.account(account.id).await.unwrap();
    assert_eq!(stored.upload_bytes, 51 * GB + MB as i64);
    assert_eq!(stored.status, AccountStatus::Active);
    assert!(openvpn.kills().is_empty());
}

#[tokio::test]
async fn test_wireguard_liveness_gates_sessions_not_traffic() {
    let ledger = MemoryLedger::new();
    let live = ledger
        .insert_account(NewAccount::new("hank").with_wireguard("hankkey="))
        .await;
    let idle = ledger
        .insert_account(NewAccount::new("iris").with_wireguard("iriskey="))
        .await;
    let wireguard = FakeWireGuard::new(ledger.clone());
    wireguard.set_peer("hankkey=", 100, 200, true);
    wireguard.set_peer("iriskey=", 300, 400, false);
    let pass = build_pass(&ledger, None, Some(Arc::clone(&wireguard)));

    let report = pass.run_full().await.unwrap();

    assert_eq!(report.connects, 1);
    assert_eq!(report.credited, 2);
    let open = ledger.open_sessions().await;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].account_id, live.id);
    assert_eq!(open[0].protocol, VpnProtocol::WireGuard);
    assert_eq!(open[0].client_ip, "198.51.100.20");
    assert_eq!(ledger.account(idle.id).await.unwrap().upload_bytes, 300);
}

#[tokio::test]
async fn test_startup_recovery_closes_orphans() {
    let ledger = MemoryLedger::new();
    let account = ledger.insert_account(NewAccount::new("jack")).await;
    ledger
        .insert_open_session(account.id, VpnProtocol::OpenVpn, Utc::now())
        .await;
    ledger
        .insert_open_session(account.id, VpnProtocol::WireGuard, Utc::now())
        .await;
    let pass = build_pass(&ledger, None, None);

    assert_eq!(pass.startup_recovery().await.unwrap(), 2);
    assert!(ledger.open_sessions().await.is_empty());
}

#[tokio::test]
async fn test_status_changes_are_monotonic_across_passes() {
    let ledger = MemoryLedger::new();
    let account = ledger
        .insert_account(NewAccount::new("kate").with_quota_gb(1.0))
        .await;
    let openvpn = FakeOpenVpn::start(ledger.clone()).await;
    openvpn.connect("kate", 2 * GB as u64, 0, "203.0.113.17:1194");
    let pass = build_pass(&ledger, Some(&openvpn), None);

    pass.run_full().await.unwrap();
    ledger
        .update_account(account.id, |a| a.expire_at = Some("2020-01-01".into()))
        .await;
    let sweep = pass.run_expiry_sweep().await.unwrap();

    assert!(sweep.terminations.is_empty());
    assert_eq!(
        ledger.account(account.id).await.unwrap().status,
        AccountStatus::Suspended
    );
}

#[tokio::test]
async fn test_scheduler_runs_both_loops_until_stopped() {
    let ledger = MemoryLedger::new();
    ledger.insert_account(NewAccount::new("liam")).await;
    let pass = Arc::new(build_pass(&ledger, None, None));
    let scheduler =
        EngineScheduler::new(pass, Duration::from_secs(3600), Duration::from_secs(3600));
    let (stop_tx, stop_rx) = watch::channel(false);

    let handles = scheduler.start(stop_rx);
    tokio::time::timeout(Duration::from_secs(5), async {
        while ledger.commits() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    stop_tx.send(true).unwrap();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(ledger.commits(), 2);
}
