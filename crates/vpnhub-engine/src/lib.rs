//! # vpnhub-engine
//!
//! The background traffic engine. Each reconciliation pass polls the
//! configured status sources, credits counter deltas, tracks session
//! lifecycle, applies quota and expiry policy inside one ledger
//! transaction, and terminates violating sessions once that transaction
//! has committed.

pub mod adapters;
pub mod pass;
pub mod policy;
pub mod reconciler;
pub mod scheduler;
pub mod termination;
pub mod tracker;

pub use adapters::{SnapshotMap, StatusSource};
pub use pass::{PassReport, ReconciliationPass};
pub use policy::{PolicyDecision, PolicyEngine, PolicyMode};
pub use reconciler::Reconciler;
pub use scheduler::EngineScheduler;
pub use termination::{AccountTermination, TerminationDispatcher, TerminationStrategy};
pub use tracker::{DISCONNECT_AFTER_MISSED_POLLS, SessionTracker};
