//! Maintenance endpoints.
//!
//! Operators install a schedule, which puts the named machines in DRAINING
//! mode, then take machines down and bring them back up.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::response::Response;
use serde::de::DeserializeOwned;

use stratum_core::{MachineId, Schedule};

use crate::error::ApiError;
use crate::jsonp;
use crate::state::GatewayState;

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Answer for methods other than GET and POST on the schedule.
pub async fn expecting_get_or_post(method: Method) -> ApiError {
    ApiError::BadRequest(format!("Expecting GET or POST, got '{method}'"))
}

/// Answer for methods other than POST on machine transitions.
pub async fn expecting_post(method: Method) -> ApiError {
    ApiError::BadRequest(format!("Expecting POST, got '{method}'"))
}

/// Answer for methods other than GET on the status.
pub async fn expecting_get(method: Method) -> ApiError {
    ApiError::BadRequest(format!("Expecting GET, got '{method}'"))
}

/// `GET /master/maintenance/schedule`
///
/// # Errors
///
/// Returns 503 if the master stopped.
pub async fn get_schedule(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let schedule = state.master.schedule().await?;
    jsonp::reply(&schedule, params.get("jsonp").map(String::as_str))
}

/// `POST /master/maintenance/schedule`
///
/// # Errors
///
/// Returns 400 if the body is not a valid schedule.
pub async fn update_schedule(
    State(state): State<Arc<GatewayState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let schedule: Schedule = parse_body(&body)?;
    state.master.update_schedule(schedule).await?;
    Ok(StatusCode::OK)
}

/// `POST /master/machine/down`
///
/// # Errors
///
/// Returns 400 if a machine is not DRAINING.
pub async fn machine_down(
    State(state): State<Arc<GatewayState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let ids: Vec<MachineId> = parse_body(&body)?;
    state.master.start_maintenance(ids).await?;
    Ok(StatusCode::OK)
}

/// `POST /master/machine/up`
///
/// # Errors
///
/// Returns 400 if a machine is not DOWN.
pub async fn machine_up(
    State(state): State<Arc<GatewayState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let ids: Vec<MachineId> = parse_body(&body)?;
    state.master.stop_maintenance(ids).await?;
    Ok(StatusCode::OK)
}

/// `GET /master/maintenance/status`
///
/// # Errors
///
/// Returns 503 if the master stopped.
pub async fn status(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let status = state.master.maintenance_status().await?;
    jsonp::reply(&status, params.get("jsonp").map(String::as_str))
}
