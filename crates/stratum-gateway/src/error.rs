//! API error types and responses.
//!
//! Every failure leaves the gateway as `{"error":{"code":…,"message":…}}`
//! with the status code the master assigned to it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use stratum_auth::AuthError;
use stratum_master::MasterError;

/// API error type that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid credentials, or a denied action.
    #[error("{0}")]
    Unauthorized(String),

    /// The caller is known but may not use this endpoint right now.
    #[error("{0}")]
    Forbidden(String),

    /// The request conflicts with the current state.
    #[error("{0}")]
    Conflict(String),

    /// Invalid request body or parameters.
    #[error("{0}")]
    BadRequest(String),

    /// The endpoint does not serve this method.
    #[error("{0}")]
    MethodNotAllowed(String),

    /// The request body has an unsupported encoding.
    #[error("{0}")]
    UnsupportedMediaType(String),

    /// No acceptable response encoding.
    #[error("{0}")]
    NotAcceptable(String),

    /// The master cannot serve requests yet.
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

/// Error details.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::BadRequest(_) => "bad_request",
            Self::MethodNotAllowed(_) => "method_not_allowed",
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
            Self::NotAcceptable(_) => "not_acceptable",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };

        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials
            | AuthError::MalformedCredentials(_)
            | AuthError::InvalidCredentials(_)
            | AuthError::Unauthorized(_) => Self::Unauthorized(err.to_string()),
            AuthError::Load { .. } | AuthError::Internal(_) => {
                tracing::error!(error = %err, "Auth internal error");
                Self::Internal("authentication service error".to_string())
            }
        }
    }
}

impl From<MasterError> for ApiError {
    fn from(err: MasterError) -> Self {
        match err {
            MasterError::NotLeader | MasterError::NotRecovered | MasterError::Stopped => {
                Self::ServiceUnavailable(err.to_string())
            }
            MasterError::AuthenticationRequired | MasterError::Unauthorized(_) => {
                Self::Unauthorized(err.to_string())
            }
            MasterError::FrameworkNotSubscribed(_) => Self::Forbidden(err.to_string()),
            MasterError::Conflict(_) => Self::Conflict(err.to_string()),
            MasterError::FrameworkNotFound(_)
            | MasterError::NoSuchFramework(_)
            | MasterError::AgentNotFound(_)
            | MasterError::InvalidCall(_)
            | MasterError::InvalidOperation { .. }
            | MasterError::Rejected(_)
            | MasterError::Core(_) => Self::BadRequest(err.to_string()),
            MasterError::Auth(auth_err) => Self::from(auth_err),
            MasterError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                Self::Internal(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use stratum_master::FrameworkId;

    use super::*;

    #[test]
    fn error_status_codes() {
        assert_eq!(
            ApiError::Unauthorized("no".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("no".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Conflict("test".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::MethodNotAllowed("test".into()).status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            ApiError::NotAcceptable("test".into()).status_code(),
            StatusCode::NOT_ACCEPTABLE
        );
        assert_eq!(
            ApiError::Internal("test".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn master_errors_keep_their_status() {
        let cases = [
            (MasterError::NotLeader, StatusCode::SERVICE_UNAVAILABLE),
            (MasterError::AuthenticationRequired, StatusCode::UNAUTHORIZED),
            (
                MasterError::FrameworkNotFound(FrameworkId::new("f1").unwrap()),
                StatusCode::BAD_REQUEST,
            ),
            (
                MasterError::FrameworkNotSubscribed(FrameworkId::new("f1").unwrap()),
                StatusCode::FORBIDDEN,
            ),
            (MasterError::Conflict("busy".into()), StatusCode::CONFLICT),
        ];

        for (err, status) in cases {
            let expected = err.http_status_code();
            let api = ApiError::from(err);
            assert_eq!(api.status_code(), status);
            assert_eq!(api.status_code().as_u16(), expected);
        }
    }

    #[test]
    fn master_message_is_preserved() {
        let api = ApiError::from(MasterError::FrameworkNotFound(
            FrameworkId::new("f1").unwrap(),
        ));
        assert_eq!(api.to_string(), "Framework cannot be found");
        assert_eq!(api.code(), "bad_request");
    }
}
