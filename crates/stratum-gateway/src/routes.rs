//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;

use axum::extract::Request;
use axum::routing::{any, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{internal, listing, maintenance, operations, scheduler};
use crate::state::GatewayState;

/// Create the master router with all routes and middleware.
///
/// # Routes
///
/// ## Scheduler API
/// - `POST /master/api/v1/scheduler` - Scheduler calls; SUBSCRIBE streams events
///
/// ## Operator
/// - `POST /master/reserve` - Dynamically reserve resources
/// - `POST /master/unreserve` - Release reserved resources
/// - `POST /master/create-volumes` - Create persistent volumes
/// - `POST /master/destroy-volumes` - Destroy persistent volumes
/// - `POST /master/teardown` - Remove a framework
///
/// ## Maintenance
/// - `GET|POST /master/maintenance/schedule` - Read or replace the schedule
/// - `POST /master/machine/down` - Take DRAINING machines down
/// - `POST /master/machine/up` - Bring DOWN machines back up
/// - `GET /master/maintenance/status` - DRAINING and DOWN machines
///
/// ## Reporting
/// - `GET /master/health`
/// - `GET /master/frameworks`
/// - `GET /master/slaves`
/// - `GET /master/tasks`
///
/// ## Internal
/// - `POST /internal/agents` - Register an agent
/// - `POST /internal/status` - Task status update from an agent
/// - `POST /internal/messages` - Executor message for a framework
pub fn create_router(state: GatewayState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let timeout = state.config.request_timeout();

    let state = Arc::new(state);

    Router::new()
        // Scheduler API; the handler answers wrong methods itself
        .route("/master/api/v1/scheduler", any(scheduler::scheduler))
        // Operator
        .route(
            "/master/reserve",
            post(operations::reserve).fallback(operations::expecting_post),
        )
        .route(
            "/master/unreserve",
            post(operations::unreserve).fallback(operations::expecting_post),
        )
        .route(
            "/master/create-volumes",
            post(operations::create_volumes).fallback(operations::expecting_post),
        )
        .route(
            "/master/destroy-volumes",
            post(operations::destroy_volumes).fallback(operations::expecting_post),
        )
        .route(
            "/master/teardown",
            post(operations::teardown).fallback(operations::expecting_post),
        )
        // Maintenance
        .route(
            "/master/maintenance/schedule",
            get(maintenance::get_schedule)
                .post(maintenance::update_schedule)
                .fallback(maintenance::expecting_get_or_post),
        )
        .route(
            "/master/machine/down",
            post(maintenance::machine_down).fallback(maintenance::expecting_post),
        )
        .route(
            "/master/machine/up",
            post(maintenance::machine_up).fallback(maintenance::expecting_post),
        )
        .route(
            "/master/maintenance/status",
            get(maintenance::status).fallback(maintenance::expecting_get),
        )
        // Reporting
        .route("/master/health", get(listing::health))
        .route("/master/frameworks", get(listing::frameworks))
        .route("/master/slaves", get(listing::agents))
        .route("/master/tasks", get(listing::tasks))
        // Internal
        .route("/internal/agents", post(internal::register_agent))
        .route("/internal/status", post(internal::status_update))
        .route("/internal/messages", post(internal::executor_message))
        // Middleware
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            let header = |name: &str| {
                request
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            };
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                path = %request.uri().path(),
                user_agent = %header("user-agent"),
                forwarded_for = %header("x-forwarded-for"),
            )
        }))
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(timeout))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::testing::{test_server, test_state};

    #[test]
    fn cors_any_origin() {
        let origins = vec!["*".to_string()];
        let _layer = build_cors_layer(&origins);
    }

    #[test]
    fn cors_specific_origins() {
        let origins = vec![
            "http://localhost:3000".to_string(),
            "https://ops.example.com".to_string(),
        ];
        let _layer = build_cors_layer(&origins);
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let state = test_state(None).await;
        let server = test_server(&state);

        server
            .get("/master/nothing-here")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
