//! Error types for the master.
//!
//! This module defines every error a master operation can return to a
//! caller. Registrar failures are not among them: they abort the process.

use stratum_core::{AgentId, CoreError, FrameworkId};
use thiserror::Error;

/// A result type using `MasterError`.
pub type Result<T> = std::result::Result<T, MasterError>;

/// Errors that can occur in master operations.
#[derive(Debug, Error)]
pub enum MasterError {
    /// This master is not the elected leader.
    #[error("Not the leading master")]
    NotLeader,

    /// The registry has not been recovered yet.
    #[error("Master has not finished recovery")]
    NotRecovered,

    /// Scheduler calls over HTTP are disabled while framework authentication is on.
    #[error("HTTP schedulers are not supported when authentication is required")]
    AuthenticationRequired,

    /// The call names a framework the master does not know.
    #[error("Framework cannot be found")]
    FrameworkNotFound(FrameworkId),

    /// The framework exists but has no open event stream.
    #[error("Framework is not subscribed")]
    FrameworkNotSubscribed(FrameworkId),

    /// An operator request names a framework the master does not know.
    #[error("No framework found with specified ID")]
    NoSuchFramework(FrameworkId),

    /// An operator request names an agent the master does not know.
    #[error("No slave found with specified ID")]
    AgentNotFound(AgentId),

    /// A scheduler call failed semantic validation.
    #[error("Failed to validate Scheduler::Call: {0}")]
    InvalidCall(String),

    /// A resource operation failed validation against its agent.
    #[error("Invalid {kind} operation: {message}")]
    InvalidOperation {
        /// The operation type, e.g. `RESERVE`.
        kind: &'static str,
        /// Why validation failed.
        message: String,
    },

    /// A request was rejected because of the current master state.
    #[error("{0}")]
    Rejected(String),

    /// The allocator refused to apply an operation.
    #[error("{0}")]
    Conflict(String),

    /// The caller may not perform the action.
    #[error("{0}")]
    Unauthorized(String),

    /// A pure validation rule failed.
    #[error("{0}")]
    Core(#[from] CoreError),

    /// Authentication or authorization could not be evaluated.
    #[error("{0}")]
    Auth(#[from] stratum_auth::AuthError),

    /// The coordinator task is gone.
    #[error("master is shutting down")]
    Stopped,

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MasterError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::NotLeader | Self::NotRecovered | Self::Stopped => 503,
            Self::AuthenticationRequired | Self::Unauthorized(_) => 401,
            Self::FrameworkNotSubscribed(_) => 403,
            Self::FrameworkNotFound(_)
            | Self::NoSuchFramework(_)
            | Self::AgentNotFound(_)
            | Self::InvalidCall(_)
            | Self::InvalidOperation { .. }
            | Self::Rejected(_)
            | Self::Core(_) => 400,
            Self::Conflict(_) => 409,
            Self::Auth(e) => e.http_status_code(),
            Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::NotLeader | Self::NotRecovered | Self::Stopped | Self::Conflict(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        let framework_id = FrameworkId::new("f1").unwrap();
        let agent_id = AgentId::new("a1").unwrap();

        assert_eq!(MasterError::NotLeader.http_status_code(), 503);
        assert_eq!(MasterError::NotRecovered.http_status_code(), 503);
        assert_eq!(MasterError::AuthenticationRequired.http_status_code(), 401);
        assert_eq!(
            MasterError::FrameworkNotFound(framework_id.clone()).http_status_code(),
            400
        );
        assert_eq!(
            MasterError::FrameworkNotSubscribed(framework_id).http_status_code(),
            403
        );
        assert_eq!(MasterError::AgentNotFound(agent_id).http_status_code(), 400);
        assert_eq!(
            MasterError::Conflict("no".into()).http_status_code(),
            409
        );
        assert_eq!(
            MasterError::Auth(stratum_auth::AuthError::MissingCredentials).http_status_code(),
            401
        );
    }

    #[test]
    fn error_messages() {
        let err = MasterError::InvalidOperation {
            kind: "CREATE",
            message: "bad".into(),
        };
        assert_eq!(err.to_string(), "Invalid CREATE operation: bad");
        assert_eq!(
            MasterError::InvalidCall("Expecting 'accept' to be present".into()).to_string(),
            "Failed to validate Scheduler::Call: Expecting 'accept' to be present"
        );
    }

    #[test]
    fn retriable() {
        assert!(MasterError::NotLeader.is_retriable());
        assert!(!MasterError::Rejected("x".into()).is_retriable());
    }
}
