//! # vpnhub-database
//!
//! PostgreSQL connection management, migrations, and the repositories
//! behind the [`Ledger`] seam the reconciliation engine writes through.
//! [`MemoryLedger`] offers the same transactional behaviour in-process.

pub mod connection;
pub mod ledger;
pub mod migration;
pub mod repositories;

pub use connection::DatabasePool;
pub use ledger::{Ledger, LedgerTx, MemoryLedger, PgLedger};
