//! # vpnhub-core
//!
//! Core crate for VPNHub. Contains configuration schemas, typed
//! identifiers, and the unified error system shared by the engine,
//! the database layer, and the binary.
//!
//! This crate has **no** internal dependencies on other VPNHub crates.

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
