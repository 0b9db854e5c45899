//! JSON responses with optional JSONP padding.

use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// The `jsonp` query parameter of reporting endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct JsonpQuery {
    /// Callback to wrap the response in.
    #[serde(default)]
    pub jsonp: Option<String>,
}

/// Reply with `value` as JSON, or as `callback(<json>);` when a callback
/// is given.
///
/// # Errors
///
/// Returns an internal error if the value cannot be serialized.
pub fn reply<T: Serialize>(value: &T, callback: Option<&str>) -> Result<Response, ApiError> {
    let Some(callback) = callback.filter(|c| !c.is_empty()) else {
        return Ok(Json(value).into_response());
    };

    let json = serde_json::to_string(value).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "text/javascript")],
        format!("{callback}({json});"),
    )
        .into_response())
}
