//! Repository functions for VPNHub entities.
//!
//! Each function is generic over [`sqlx::PgExecutor`] so the same query
//! runs against the pool or inside a pass transaction.

pub mod account;
pub mod session_log;

use vpnhub_core::error::{AppError, ErrorKind};

/// Wrap a sqlx error at the repository boundary.
pub(crate) fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| AppError::with_source(ErrorKind::Database, context, e)
}

/// Clamp an unsigned byte count into a `BIGINT` column.
pub(crate) fn to_bigint(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}
