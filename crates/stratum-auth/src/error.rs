//! Authentication and authorization error types.

use thiserror::Error;

/// A result type using `AuthError`.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur during authentication or authorization.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No `Authorization` header was sent.
    #[error("Missing 'Authorization' request header")]
    MissingCredentials,

    /// The `Authorization` header could not be decoded.
    #[error("Malformed 'Authorization' request header: {0}")]
    MalformedCredentials(String),

    /// The principal is unknown or the secret does not match.
    #[error("Authentication failed for principal '{0}'")]
    InvalidCredentials(String),

    /// The authenticated principal may not perform the action.
    #[error("{0}")]
    Unauthorized(String),

    /// A credentials or ACL file could not be loaded.
    #[error("failed to load {what}: {reason}")]
    Load {
        /// Which file.
        what: &'static str,
        /// Why it failed.
        reason: String,
    },

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Returns `true` if the client may retry with different credentials.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::MissingCredentials | Self::MalformedCredentials(_) | Self::InvalidCredentials(_)
        )
    }

    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::MissingCredentials
            | Self::MalformedCredentials(_)
            | Self::InvalidCredentials(_)
            | Self::Unauthorized(_) => 401,
            Self::Load { .. } | Self::Internal(_) => 500,
        }
    }
}
