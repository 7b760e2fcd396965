//! Convenience result type alias for VPNHub.

use crate::error::AppError;

/// A specialized `Result` type for VPNHub operations.
pub type AppResult<T> = Result<T, AppError>;
