//! Operator endpoints for dynamic reservations, persistent volumes, and
//! framework teardown.
//!
//! Parameters arrive form-encoded in the request body. Resources are a JSON
//! array inside the `resources` or `volumes` parameter.

use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Form;
use serde::Deserialize;

use stratum_core::{AgentId, FrameworkId, Resources};
use stratum_master::MasterError;

use crate::auth::Principal;
use crate::error::ApiError;
use crate::state::GatewayState;

/// Form parameters shared by the operator endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct OperationForm {
    /// Target agent.
    #[serde(rename = "slaveId")]
    pub slave_id: Option<String>,
    /// JSON array of resources to reserve or unreserve.
    pub resources: Option<String>,
    /// JSON array of persistent volumes.
    pub volumes: Option<String>,
    /// Framework to tear down.
    #[serde(rename = "frameworkId")]
    pub framework_id: Option<String>,
}

type FormResult = Result<Form<OperationForm>, FormRejection>;

/// Answer for any method but POST.
pub async fn expecting_post() -> ApiError {
    ApiError::BadRequest("Expecting POST".into())
}

fn form_values(form: FormResult) -> Result<OperationForm, ApiError> {
    form.map(|Form(values)| values).map_err(|rejection| {
        ApiError::BadRequest(format!(
            "Unable to decode query string: {}",
            rejection.body_text()
        ))
    })
}

/// The `slaveId` parameter, which must name a registered agent.
async fn registered_agent(state: &GatewayState, form: &OperationForm) -> Result<AgentId, ApiError> {
    let value = form
        .slave_id
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("Missing 'slaveId' query parameter".into()))?;
    let agent_id = AgentId::new(value).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if !state.master.has_agent(&agent_id).await? {
        return Err(MasterError::AgentNotFound(agent_id).into());
    }
    Ok(agent_id)
}

fn parse_resources(value: Option<&str>, name: &str) -> Result<Resources, ApiError> {
    let value =
        value.ok_or_else(|| ApiError::BadRequest(format!("Missing '{name}' query parameter")))?;
    serde_json::from_str(value).map_err(|e| {
        ApiError::BadRequest(format!("Error in parsing '{name}' query parameter: {e}"))
    })
}

/// `POST /master/reserve`
///
/// # Errors
///
/// Returns 400 for bad parameters or an invalid reservation, 401 when
/// authentication fails, and 409 when the agent cannot spare the resources.
pub async fn reserve(
    State(state): State<Arc<GatewayState>>,
    Principal(principal): Principal,
    form: FormResult,
) -> Result<StatusCode, ApiError> {
    let form = form_values(form)?;
    let agent_id = registered_agent(&state, &form).await?;
    let resources = parse_resources(form.resources.as_deref(), "resources")?;

    state.master.reserve(&agent_id, resources, principal).await?;
    Ok(StatusCode::OK)
}

/// `POST /master/unreserve`
///
/// # Errors
///
/// See [`reserve`].
pub async fn unreserve(
    State(state): State<Arc<GatewayState>>,
    Principal(principal): Principal,
    form: FormResult,
) -> Result<StatusCode, ApiError> {
    let form = form_values(form)?;
    let agent_id = registered_agent(&state, &form).await?;
    let resources = parse_resources(form.resources.as_deref(), "resources")?;

    state.master.unreserve(&agent_id, resources, principal).await?;
    Ok(StatusCode::OK)
}

/// `POST /master/create-volumes`
///
/// # Errors
///
/// See [`reserve`].
pub async fn create_volumes(
    State(state): State<Arc<GatewayState>>,
    Principal(principal): Principal,
    form: FormResult,
) -> Result<StatusCode, ApiError> {
    let form = form_values(form)?;
    let agent_id = registered_agent(&state, &form).await?;
    let volumes = parse_resources(form.volumes.as_deref(), "volumes")?;

    state
        .master
        .create_volumes(&agent_id, volumes, principal)
        .await?;
    Ok(StatusCode::OK)
}

/// `POST /master/destroy-volumes`
///
/// # Errors
///
/// See [`reserve`].
pub async fn destroy_volumes(
    State(state): State<Arc<GatewayState>>,
    Principal(principal): Principal,
    form: FormResult,
) -> Result<StatusCode, ApiError> {
    let form = form_values(form)?;
    let agent_id = registered_agent(&state, &form).await?;
    let volumes = parse_resources(form.volumes.as_deref(), "volumes")?;

    state
        .master
        .destroy_volumes(&agent_id, volumes, principal)
        .await?;
    Ok(StatusCode::OK)
}

/// `POST /master/teardown`
///
/// # Errors
///
/// Returns 400 for a missing or unknown framework and 401 when the principal
/// may not tear it down.
pub async fn teardown(
    State(state): State<Arc<GatewayState>>,
    Principal(principal): Principal,
    form: FormResult,
) -> Result<StatusCode, ApiError> {
    let form = form_values(form)?;
    let value = form
        .framework_id
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("Missing 'frameworkId' query parameter".into()))?;
    let framework_id = FrameworkId::new(value).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state.master.teardown(principal, &framework_id).await?;
    tracing::info!(framework_id = %framework_id, "Framework torn down by operator");
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use axum::http::header::AUTHORIZATION;
    use axum::http::HeaderValue;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use stratum_auth::{Authorizer, Credentials, StaticAuthorizer};
    use stratum_core::Resource;
    use stratum_master::MasterConfig;

    use super::*;
    use crate::testing::{
        cpus, framework_info, register_agent, test_server, test_state, test_state_with,
    };

    fn to_json(resources: &Resources) -> String {
        serde_json::to_string(resources).unwrap()
    }

    fn error_message(body: &serde_json::Value) -> String {
        body["error"]["message"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn reserve_and_unreserve() {
        let state = test_state(None).await;
        let server = test_server(&state);
        let agent = register_agent(&state, "host1", cpus(4.0), true).await;

        let reserved: Resources =
            vec![Resource::scalar("cpus", 1.0).reserved("db", Some("ops"))].into();
        let response = server
            .post("/master/reserve")
            .form(&[("slaveId", agent.to_string()), ("resources", to_json(&reserved))])
            .await;
        response.assert_status_ok();

        let agents = state.master.agents().await.unwrap();
        assert_eq!(agents[0].checkpointed_resources, reserved);

        let response = server
            .post("/master/unreserve")
            .form(&[("slaveId", agent.to_string()), ("resources", to_json(&reserved))])
            .await;
        response.assert_status_ok();

        let agents = state.master.agents().await.unwrap();
        assert!(agents[0].checkpointed_resources.is_empty());
    }

    #[tokio::test]
    async fn reserve_parameter_errors() {
        let state = test_state(None).await;
        let server = test_server(&state);
        let agent = register_agent(&state, "host1", cpus(4.0), true).await;

        let response = server
            .post("/master/reserve")
            .form(&[("resources", "[]")])
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(
            error_message(&response.json()),
            "Missing 'slaveId' query parameter"
        );

        let response = server
            .post("/master/reserve")
            .form(&[("slaveId", "unknown"), ("resources", "[]")])
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(
            error_message(&response.json()),
            "No slave found with specified ID"
        );

        let response = server
            .post("/master/reserve")
            .form(&[("slaveId", agent.to_string())])
            .await;
        assert_eq!(
            error_message(&response.json()),
            "Missing 'resources' query parameter"
        );

        let response = server
            .post("/master/reserve")
            .form(&[("slaveId", agent.to_string()), ("resources", "{".to_string())])
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(error_message(&response.json())
            .starts_with("Error in parsing 'resources' query parameter"));

        let response = server
            .post("/master/reserve")
            .form(&[("slaveId", agent.to_string()), ("resources", to_json(&cpus(1.0)))])
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(error_message(&response.json()).starts_with("Invalid RESERVE operation:"));
    }

    #[tokio::test]
    async fn reserve_conflict_when_resources_are_short() {
        let state = test_state(None).await;
        let server = test_server(&state);
        let agent = register_agent(&state, "host1", cpus(1.0), true).await;

        let reserved: Resources =
            vec![Resource::scalar("cpus", 2.0).reserved("db", None)].into();
        let response = server
            .post("/master/reserve")
            .form(&[("slaveId", agent.to_string()), ("resources", to_json(&reserved))])
            .await;
        response.assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn wrong_method_is_a_bad_request() {
        let state = test_state(None).await;
        let server = test_server(&state);

        let response = server.get("/master/reserve").await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&response.json()), "Expecting POST");
    }

    #[tokio::test]
    async fn operations_require_credentials_when_configured() {
        let credentials =
            Credentials::from_json(r#"{"credentials":[{"principal":"ops","secret":"pw"}]}"#)
                .unwrap();
        let state = test_state(Some(credentials)).await;
        let server = test_server(&state);
        let agent = register_agent(&state, "host1", cpus(4.0), true).await;

        let reserved: Resources =
            vec![Resource::scalar("cpus", 1.0).reserved("db", Some("ops"))].into();
        let form = [("slaveId", agent.to_string()), ("resources", to_json(&reserved))];

        let response = server.post("/master/reserve").form(&form).await;
        response.assert_status(StatusCode::UNAUTHORIZED);

        let header = format!("Basic {}", STANDARD.encode("ops:pw"));
        let response = server
            .post("/master/reserve")
            .add_header(AUTHORIZATION, HeaderValue::from_str(&header).unwrap())
            .form(&form)
            .await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn volume_lifecycle() {
        let state = test_state(None).await;
        let server = test_server(&state);
        let disk: Resources = vec![Resource::scalar("disk", 1024.0)].into();
        let agent = register_agent(&state, "host1", disk, true).await;

        let reserved = Resource::scalar("disk", 512.0).reserved("db", None);
        let response = server
            .post("/master/reserve")
            .form(&[
                ("slaveId", agent.to_string()),
                ("resources", to_json(&vec![reserved.clone()].into())),
            ])
            .await;
        response.assert_status_ok();

        let volume: Resources = vec![reserved.persistent("v1", "data")].into();
        let form = [("slaveId", agent.to_string()), ("volumes", to_json(&volume))];

        server
            .post("/master/create-volumes")
            .form(&form)
            .await
            .assert_status_ok();
        let agents = state.master.agents().await.unwrap();
        assert_eq!(agents[0].checkpointed_resources, volume);

        let response = server.post("/master/create-volumes").form(&form).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(
            error_message(&response.json()),
            "Invalid CREATE operation: Persistence ID 'v1' already exists"
        );

        server
            .post("/master/destroy-volumes")
            .form(&form)
            .await
            .assert_status_ok();

        let response = server
            .post("/master/destroy-volumes")
            .form(&[("slaveId", agent.to_string())])
            .await;
        assert_eq!(
            error_message(&response.json()),
            "Missing 'volumes' query parameter"
        );
    }

    #[tokio::test]
    async fn teardown_removes_framework() {
        let state = test_state(None).await;
        let server = test_server(&state);

        let subscription = state.master.subscribe(framework_info("web")).await.unwrap();
        let framework_id = subscription.framework_id().cloned().unwrap();

        let response = server
            .post("/master/teardown")
            .form(&[("frameworkId", framework_id.to_string())])
            .await;
        response.assert_status_ok();

        let snapshot = state.master.frameworks().await.unwrap();
        assert!(snapshot.frameworks.is_empty());
        assert_eq!(snapshot.completed_frameworks[0].id, framework_id);

        let response = server
            .post("/master/teardown")
            .form(&[("frameworkId", framework_id.to_string())])
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(
            error_message(&response.json()),
            "No framework found with specified ID"
        );

        let response = server
            .post("/master/teardown")
            .form(&[("slaveId", "a1")])
            .await;
        assert_eq!(
            error_message(&response.json()),
            "Missing 'frameworkId' query parameter"
        );
    }

    #[tokio::test]
    async fn teardown_requires_authorization() {
        let deny: Arc<dyn Authorizer> = Arc::new(StaticAuthorizer { allow: false });
        let state = test_state_with(None, Some(deny), MasterConfig::default()).await;
        let server = test_server(&state);

        let subscription = state.master.subscribe(framework_info("web")).await.unwrap();
        let framework_id = subscription.framework_id().cloned().unwrap();

        let response = server
            .post("/master/teardown")
            .form(&[("frameworkId", framework_id.to_string())])
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(
            error_message(&response.json()),
            "Not authorized to teardown framework"
        );

        let snapshot = state.master.frameworks().await.unwrap();
        assert_eq!(snapshot.frameworks.len(), 1);
    }
}
