//! Internal API endpoints.
//!
//! Agents use these to join the cluster and report back. They are not part
//! of the operator or scheduler API and do not authenticate.
//!
//! # Security
//!
//! Internal endpoints should be protected by network policies that only allow
//! traffic from agent hosts.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use stratum_core::AgentId;
use stratum_master::{AgentRegistration, ExecutorMessage, StatusUpdate};

use crate::error::ApiError;
use crate::state::GatewayState;

/// Response for a registered agent.
#[derive(Debug, Serialize)]
pub struct RegisteredResponse {
    /// The agent's id.
    pub id: AgentId,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Register an agent.
///
/// # Errors
///
/// Returns 400 for a malformed registration, a DOWN machine, or an id that
/// is already registered.
pub async fn register_agent(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<AgentRegistration>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let registration = body(payload)?;
    let id = state.master.register_agent(registration).await?;
    Ok((StatusCode::CREATED, Json(RegisteredResponse { id })))
}

/// Accept a task status update from an agent.
///
/// # Errors
///
/// Returns 400 for a malformed update.
pub async fn status_update(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let update = body(payload)?;
    tracing::debug!(
        framework_id = %update.framework_id,
        task_id = %update.status.task_id,
        state = ?update.status.state,
        "Received status update"
    );
    state.master.status_update(update).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Forward an executor's message to its framework.
///
/// # Errors
///
/// Returns 400 for a malformed message.
pub async fn executor_message(
    State(state): State<Arc<GatewayState>>,
    payload: Result<Json<ExecutorMessage>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let message = body(payload)?;
    state.master.executor_message(message).await?;
    Ok(StatusCode::ACCEPTED)
}
