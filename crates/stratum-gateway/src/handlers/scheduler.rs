//! The scheduler API endpoint.
//!
//! Every scheduler interaction is a single `POST /master/api/v1/scheduler`
//! carrying a call. SUBSCRIBE keeps the response open and streams the
//! framework's events as RecordIO; every other call is answered with
//! `202 Accepted` once the master has taken it.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;

use stratum_master::{Call, MasterError, SchedulerCall};

use crate::encoding::{decode, encode_record, request_encoding, response_encoding};
use crate::error::ApiError;
use crate::state::GatewayState;

/// Handle a scheduler call.
///
/// # Errors
///
/// Returns 503 while the master cannot serve schedulers, 401 when framework
/// authentication is required, 405 for anything but POST, 400/415 for an
/// undecodable call, 406 when SUBSCRIBE cannot be answered in an acceptable
/// encoding, and the master's verdict for the call itself.
pub async fn scheduler(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    state.master.check_scheduler_api()?;

    if method != Method::POST {
        return Err(ApiError::MethodNotAllowed(format!(
            "Expecting a 'POST' request, received '{method}'"
        )));
    }

    let content_type = request_encoding(&headers)?;
    let call: Call = decode(content_type, &body)?;
    let call = call.validate().map_err(MasterError::InvalidCall)?;

    match call {
        SchedulerCall::Subscribe(subscribe) => {
            let accept = response_encoding(&headers)?;
            let subscription = state.master.subscribe(subscribe.framework_info).await?;

            if let Some(framework_id) = subscription.framework_id() {
                tracing::info!(framework_id = %framework_id, "Streaming events to framework");
            }

            let records = subscription
                .into_stream()
                .map(move |event| encode_record(accept, &event));

            Ok((
                StatusCode::OK,
                [(CONTENT_TYPE, accept.as_str())],
                Body::from_stream(records),
            )
                .into_response())
        }
        SchedulerCall::Framework { framework_id, call } => {
            tracing::debug!(
                framework_id = %framework_id,
                call = call.type_name(),
                "Scheduler call"
            );
            state.master.call(framework_id, call).await?;
            Ok(StatusCode::ACCEPTED.into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, Request};
    use serde_json::json;
    use stratum_master::{Event, FrameworkId, MasterConfig};
    use tower::ServiceExt;

    use super::*;
    use crate::encoding::{APPLICATION_CBOR, APPLICATION_JSON};
    use crate::routes::create_router;
    use crate::testing::{framework_info, test_server, test_state, test_state_with};

    const PATH: &str = "/master/api/v1/scheduler";

    fn json_content() -> (axum::http::HeaderName, HeaderValue) {
        (CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON))
    }

    fn error_message(body: &serde_json::Value) -> &str {
        body["error"]["message"].as_str().unwrap()
    }

    #[tokio::test]
    async fn rejects_non_post() {
        let state = test_state(None).await;
        let server = test_server(&state);

        let response = server.get(PATH).await;
        response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            error_message(&response.json()),
            "Expecting a 'POST' request, received 'GET'"
        );
    }

    #[tokio::test]
    async fn unavailable_until_elected() {
        let state = test_state(None).await;
        state.master.set_elected(false);
        let server = test_server(&state);

        let response = server.post(PATH).json(&json!({"type": "REVIVE"})).await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error_message(&response.json()), "Not the leading master");
    }

    #[tokio::test]
    async fn rejected_when_frameworks_must_authenticate() {
        let config = MasterConfig {
            authenticate_frameworks: true,
            ..MasterConfig::default()
        };
        let state = test_state_with(None, None, config).await;
        let server = test_server(&state);

        let response = server.post(PATH).json(&json!({"type": "REVIVE"})).await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn content_type_is_checked() {
        let state = test_state(None).await;
        let server = test_server(&state);

        let response = server.post(PATH).bytes(Bytes::from_static(b"{}")).await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let response = server.post(PATH).text("type=REVIVE").await;
        response.assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn malformed_and_invalid_calls() {
        let state = test_state(None).await;
        let server = test_server(&state);

        let (name, value) = json_content();
        let response = server
            .post(PATH)
            .add_header(name, value)
            .bytes(Bytes::from_static(b"{\"type\":"))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(error_message(&response.json()).starts_with("Failed to parse body into JSON"));

        let response = server
            .post(PATH)
            .json(&json!({"type": "FROBNICATE", "framework_id": "f1"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(
            error_message(&response.json()),
            "Failed to validate Scheduler::Call: Unknown call type"
        );

        let response = server.post(PATH).json(&json!({"type": "REVIVE"})).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(
            error_message(&response.json()),
            "Failed to validate Scheduler::Call: Expecting 'framework_id' to be present"
        );
    }

    #[tokio::test]
    async fn unknown_framework_is_a_client_error() {
        let state = test_state(None).await;
        let server = test_server(&state);

        let response = server
            .post(PATH)
            .json(&json!({"type": "REVIVE", "framework_id": "missing"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&response.json()), "Framework cannot be found");
    }

    #[tokio::test]
    async fn subscribed_framework_calls_are_accepted() {
        let state = test_state(None).await;
        let server = test_server(&state);

        let mut subscription = state.master.subscribe(framework_info("web")).await.unwrap();
        let framework_id = subscription.framework_id().cloned().unwrap();
        assert!(matches!(
            subscription.next().await,
            Some(Event::Subscribed { .. })
        ));

        let response = server
            .post(PATH)
            .json(&json!({"type": "SUPPRESS", "framework_id": framework_id}))
            .await;
        response.assert_status(StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn disconnected_framework_is_forbidden() {
        let state = test_state(None).await;
        let server = test_server(&state);

        let mut info = framework_info("batch");
        info.failover_timeout = 3600.0;
        let subscription = state.master.subscribe(info).await.unwrap();
        let framework_id: FrameworkId = subscription.framework_id().cloned().unwrap();
        drop(subscription);

        let response = server
            .post(PATH)
            .json(&json!({"type": "REVIVE", "framework_id": framework_id}))
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
        assert_eq!(error_message(&response.json()), "Framework is not subscribed");
    }

    #[tokio::test]
    async fn subscribe_streams_records() {
        let state = test_state(None).await;
        let router = create_router(GatewayState::clone(&state));

        let call = json!({
            "type": "SUBSCRIBE",
            "subscribe": {"framework_info": {"name": "web", "user": "nobody"}},
        });
        let request = Request::builder()
            .method(Method::POST)
            .uri(PATH)
            .header(CONTENT_TYPE, APPLICATION_JSON)
            .body(Body::from(serde_json::to_vec(&call).unwrap()))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], APPLICATION_JSON);

        let mut body = response.into_body().into_data_stream();
        let chunk = body.next().await.unwrap().unwrap();

        let (length, record) = std::str::from_utf8(&chunk)
            .unwrap()
            .split_once('\n')
            .unwrap();
        assert_eq!(length.parse::<usize>().unwrap(), record.len());

        let event: Event = serde_json::from_str(record).unwrap();
        let Event::Subscribed { framework_id, .. } = event else {
            panic!("expected SUBSCRIBED");
        };

        let frameworks = state.master.frameworks().await.unwrap();
        assert_eq!(frameworks.frameworks.len(), 1);
        assert_eq!(frameworks.frameworks[0].id, framework_id);
    }

    #[tokio::test]
    async fn subscribe_requires_acceptable_encoding() {
        let state = test_state(None).await;
        let server = test_server(&state);

        let response = server
            .post(PATH)
            .add_header(
                axum::http::header::ACCEPT,
                HeaderValue::from_static("text/html"),
            )
            .json(&json!({
                "type": "SUBSCRIBE",
                "subscribe": {"framework_info": {"name": "web", "user": "nobody"}},
            }))
            .await;
        response.assert_status(StatusCode::NOT_ACCEPTABLE);
        assert!(error_message(&response.json()).contains(APPLICATION_CBOR));
    }
}
