//! Session log queries.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use vpnhub_core::result::AppResult;
use vpnhub_core::types::{AccountId, SessionRecordId};
use vpnhub_entity::session::SessionRecord;
use vpnhub_entity::traffic::VpnProtocol;

use super::db_error;

/// Insert a new open session record.
pub async fn insert_open<'e, E: PgExecutor<'e>>(
    executor: E,
    account_id: AccountId,
    protocol: VpnProtocol,
    client_ip: &str,
    connected_at: DateTime<Utc>,
) -> AppResult<SessionRecord> {
    sqlx::query_as::<_, SessionRecord>(
        "INSERT INTO session_logs (id, account_id, protocol, client_ip, connected_at) \
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(SessionRecordId::new())
    .bind(account_id)
    .bind(protocol)
    .bind(client_ip)
    .bind(connected_at)
    .fetch_one(executor)
    .await
    .map_err(db_error("Failed to open session record"))
}

/// Close every open record for an account on one protocol.
pub async fn close_open_for_key<'e, E: PgExecutor<'e>>(
    executor: E,
    account_id: AccountId,
    protocol: VpnProtocol,
    at: DateTime<Utc>,
) -> AppResult<u64> {
    let result = sqlx::query(
        "UPDATE session_logs SET disconnected_at = $3 \
         WHERE account_id = $1 AND protocol = $2 AND disconnected_at IS NULL",
    )
    .bind(account_id)
    .bind(protocol)
    .bind(at)
    .execute(executor)
    .await
    .map_err(db_error("Failed to close open session records"))?;
    Ok(result.rows_affected())
}

/// Close the most recently opened record for an account on one protocol.
pub async fn close_latest<'e, E: PgExecutor<'e>>(
    executor: E,
    account_id: AccountId,
    protocol: VpnProtocol,
    at: DateTime<Utc>,
) -> AppResult<bool> {
    let result = sqlx::query(
        "UPDATE session_logs SET disconnected_at = $3 WHERE id = ( \
             SELECT id FROM session_logs \
             WHERE account_id = $1 AND protocol = $2 AND disconnected_at IS NULL \
             ORDER BY connected_at DESC LIMIT 1)",
    )
    .bind(account_id)
    .bind(protocol)
    .bind(at)
    .execute(executor)
    .await
    .map_err(db_error("Failed to close session record"))?;
    Ok(result.rows_affected() == 1)
}

/// Close every open record of an account across protocols.
pub async fn close_open_for_account<'e, E: PgExecutor<'e>>(
    executor: E,
    account_id: AccountId,
    at: DateTime<Utc>,
) -> AppResult<u64> {
    let result = sqlx::query(
        "UPDATE session_logs SET disconnected_at = $2 \
         WHERE account_id = $1 AND disconnected_at IS NULL",
    )
    .bind(account_id)
    .bind(at)
    .execute(executor)
    .await
    .map_err(db_error("Failed to close account session records"))?;
    Ok(result.rows_affected())
}

/// Close every open record in the table.
pub async fn close_all_open<'e, E: PgExecutor<'e>>(
    executor: E,
    at: DateTime<Utc>,
) -> AppResult<u64> {
    let result =
        sqlx::query("UPDATE session_logs SET disconnected_at = $1 WHERE disconnected_at IS NULL")
            .bind(at)
            .execute(executor)
            .await
            .map_err(db_error("Failed to close orphaned session records"))?;
    Ok(result.rows_affected())
}

/// Count open records.
pub async fn count_open<'e, E: PgExecutor<'e>>(executor: E) -> AppResult<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM session_logs WHERE disconnected_at IS NULL")
        .fetch_one(executor)
        .await
        .map_err(db_error("Failed to count open session records"))
}
