//! Ephemeral traffic readings produced by status sources.

pub mod protocol;
pub mod snapshot;

pub use protocol::VpnProtocol;
pub use snapshot::{ConnectionCounters, SessionKey, TrafficSnapshot};
