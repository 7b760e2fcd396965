//! Account queries used by the reconciliation pass.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use vpnhub_core::result::AppResult;
use vpnhub_core::types::AccountId;
use vpnhub_entity::account::{Account, AccountStatus};
use vpnhub_entity::traffic::VpnProtocol;

use super::{db_error, to_bigint};

/// Resolve the account a session identity belongs to.
///
/// OpenVPN sessions carry the username, WireGuard peers their public key.
pub async fn find_by_identity<'e, E: PgExecutor<'e>>(
    executor: E,
    protocol: VpnProtocol,
    identity: &str,
) -> AppResult<Option<Account>> {
    let sql = match protocol {
        VpnProtocol::OpenVpn => "SELECT * FROM accounts WHERE username = $1",
        VpnProtocol::WireGuard => "SELECT * FROM accounts WHERE wg_public_key = $1",
    };
    sqlx::query_as::<_, Account>(sql)
        .bind(identity)
        .fetch_optional(executor)
        .await
        .map_err(db_error("Failed to resolve account identity"))
}

/// Add upload and download deltas to the lifetime totals.
pub async fn add_traffic<'e, E: PgExecutor<'e>>(
    executor: E,
    id: AccountId,
    upload: u64,
    download: u64,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE accounts SET upload_bytes = upload_bytes + $2, \
         download_bytes = download_bytes + $3, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(to_bigint(upload))
    .bind(to_bigint(download))
    .execute(executor)
    .await
    .map_err(db_error("Failed to credit traffic"))?;
    Ok(())
}

/// Stamp the last time the account was seen connected.
pub async fn touch_last_connection<'e, E: PgExecutor<'e>>(
    executor: E,
    id: AccountId,
    at: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query("UPDATE accounts SET last_connection = $2 WHERE id = $1")
        .bind(id)
        .bind(at)
        .execute(executor)
        .await
        .map_err(db_error("Failed to update last connection"))?;
    Ok(())
}

/// Lock and return every active account.
///
/// Rows are locked in id order so the two engine loops cannot deadlock.
pub async fn lock_active<'e, E: PgExecutor<'e>>(executor: E) -> AppResult<Vec<Account>> {
    sqlx::query_as::<_, Account>(
        "SELECT * FROM accounts WHERE status = 'active' ORDER BY id FOR UPDATE",
    )
    .fetch_all(executor)
    .await
    .map_err(db_error("Failed to lock active accounts"))
}

/// Move an active account to `status`.
///
/// Returns `false` when the account was no longer active, which keeps
/// transitions forward-only.
pub async fn transition_from_active<'e, E: PgExecutor<'e>>(
    executor: E,
    id: AccountId,
    status: AccountStatus,
) -> AppResult<bool> {
    let result = sqlx::query(
        "UPDATE accounts SET status = $2, updated_at = NOW() \
         WHERE id = $1 AND status = 'active'",
    )
    .bind(id)
    .bind(status)
    .execute(executor)
    .await
    .map_err(db_error("Failed to update account status"))?;
    Ok(result.rows_affected() == 1)
}

/// Count accounts per status.
pub async fn count_by_status<'e, E: PgExecutor<'e>>(
    executor: E,
) -> AppResult<Vec<(AccountStatus, i64)>> {
    sqlx::query_as::<_, (AccountStatus, i64)>(
        "SELECT status, COUNT(*) FROM accounts GROUP BY status ORDER BY status",
    )
    .fetch_all(executor)
    .await
    .map_err(db_error("Failed to count accounts"))
}
