//! Read-only reporting endpoints.
//!
//! Every endpoint honors `?jsonp=<callback>`. Malformed pagination
//! parameters are ignored.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Response;
use serde::Serialize;

use stratum_master::{AgentSummary, TaskOrder, TaskQuery, TaskSummary};

use crate::error::ApiError;
use crate::jsonp;
use crate::state::GatewayState;

type Params = Query<HashMap<String, String>>;

fn callback(params: &HashMap<String, String>) -> Option<&str> {
    params.get("jsonp").map(String::as_str)
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Whether this master leads.
    pub elected: bool,
    /// Whether the maintenance registry has been recovered.
    pub recovered: bool,
}

/// Response of the agents listing.
#[derive(Debug, Serialize)]
pub struct AgentsResponse {
    /// Registered agents.
    pub slaves: Vec<AgentSummary>,
}

/// Response of the tasks listing.
#[derive(Debug, Serialize)]
pub struct TasksResponse {
    /// The requested page of tasks.
    pub tasks: Vec<TaskSummary>,
}

/// `GET /master/health`
///
/// # Errors
///
/// Fails only if the response cannot be serialized.
pub async fn health(
    State(state): State<Arc<GatewayState>>,
    Query(params): Params,
) -> Result<Response, ApiError> {
    let response = HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        elected: state.master.is_elected(),
        recovered: state.master.is_recovered(),
    };
    jsonp::reply(&response, callback(&params))
}

/// `GET /master/frameworks`
///
/// # Errors
///
/// Returns 503 if the master stopped.
pub async fn frameworks(
    State(state): State<Arc<GatewayState>>,
    Query(params): Params,
) -> Result<Response, ApiError> {
    let snapshot = state.master.frameworks().await?;
    jsonp::reply(&snapshot, callback(&params))
}

/// `GET /master/slaves`
///
/// # Errors
///
/// Returns 503 if the master stopped.
pub async fn agents(
    State(state): State<Arc<GatewayState>>,
    Query(params): Params,
) -> Result<Response, ApiError> {
    let slaves = state.master.agents().await?;
    jsonp::reply(&AgentsResponse { slaves }, callback(&params))
}

/// Pagination from query parameters, falling back to defaults for anything
/// missing or malformed.
fn task_query(params: &HashMap<String, String>, default_limit: usize) -> TaskQuery {
    let number = |name: &str| params.get(name).and_then(|v| v.parse::<usize>().ok());
    let order = match params.get("order").map(String::as_str) {
        Some("desc") => TaskOrder::Desc,
        _ => TaskOrder::Asc,
    };

    TaskQuery {
        limit: number("limit").unwrap_or(default_limit),
        offset: number("offset").unwrap_or(0),
        order,
    }
}

/// `GET /master/tasks`
///
/// # Errors
///
/// Returns 503 if the master stopped.
pub async fn tasks(
    State(state): State<Arc<GatewayState>>,
    Query(params): Params,
) -> Result<Response, ApiError> {
    let query = task_query(&params, state.config.task_limit);
    let tasks = state.master.tasks(query).await?;
    jsonp::reply(&TasksResponse { tasks }, callback(&params))
}
