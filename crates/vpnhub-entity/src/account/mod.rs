//! VPN account entity.

pub mod model;
pub mod status;

pub use model::{Account, BYTES_PER_GB, NewAccount};
pub use status::AccountStatus;
