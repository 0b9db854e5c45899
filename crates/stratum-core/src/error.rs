//! Common error types for stratum.
//!
//! These errors are produced by the pure parts of the system: identifier
//! parsing, the resource algebra, and maintenance validation.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the stratum system.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// A resource is malformed.
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    /// An operation cannot be applied to a resource bundle.
    #[error("{0}")]
    OperationFailed(String),

    /// A maintenance schedule or machine list is malformed.
    #[error("{0}")]
    InvalidMaintenance(String),
}
