//! # vpnhub-entity
//!
//! Domain models for VPNHub: persisted accounts and session records, and
//! the ephemeral per-cycle traffic snapshots produced by status sources.

pub mod account;
pub mod session;
pub mod traffic;

pub use account::{Account, AccountStatus};
pub use session::SessionRecord;
pub use traffic::{SessionKey, TrafficSnapshot, VpnProtocol};
