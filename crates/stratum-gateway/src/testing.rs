//! Gateway state wired to an in-memory master, for tests.

use std::sync::Arc;

use axum_test::TestServer;
use stratum_auth::{Authorizer, Credentials};
use stratum_core::{AgentId, Resource, Resources, DEFAULT_ROLE};
use stratum_master::{
    AgentRegistration, Collaborators, FrameworkInfo, LocalAllocator, Master, MasterConfig,
    NoopAgentLink,
};
use stratum_store::MemoryRegistrar;

use crate::config::GatewayConfig;
use crate::routes::create_router;
use crate::state::GatewayState;

pub(crate) async fn test_state(credentials: Option<Credentials>) -> Arc<GatewayState> {
    test_state_with(credentials, None, MasterConfig::default()).await
}

pub(crate) async fn test_state_with(
    credentials: Option<Credentials>,
    authorizer: Option<Arc<dyn Authorizer>>,
    config: MasterConfig,
) -> Arc<GatewayState> {
    let config = MasterConfig {
        heartbeat_interval: None,
        allocation_interval: None,
        ..config
    };
    let master = Master::start(
        config,
        Collaborators {
            allocator: Arc::new(LocalAllocator::new()),
            registrar: Arc::new(MemoryRegistrar::new()),
            agent_link: Arc::new(NoopAgentLink),
            authorizer,
        },
    );
    master.recover().await.unwrap();

    Arc::new(GatewayState::new(
        master,
        credentials.map(Arc::new),
        GatewayConfig::default(),
    ))
}

pub(crate) fn test_server(state: &Arc<GatewayState>) -> TestServer {
    TestServer::new(create_router(GatewayState::clone(state))).unwrap()
}

pub(crate) fn cpus(value: f64) -> Resources {
    vec![Resource::scalar("cpus", value)].into()
}

pub(crate) async fn register_agent(
    state: &GatewayState,
    hostname: &str,
    resources: Resources,
    checkpoint: bool,
) -> AgentId {
    state
        .master
        .register_agent(AgentRegistration {
            id: None,
            hostname: hostname.into(),
            ip: None,
            endpoint: format!("http://{hostname}:5051"),
            checkpoint,
            resources,
        })
        .await
        .unwrap()
}

pub(crate) fn framework_info(name: &str) -> FrameworkInfo {
    FrameworkInfo {
        id: None,
        name: name.into(),
        user: "nobody".into(),
        principal: None,
        role: DEFAULT_ROLE.into(),
        failover_timeout: 0.0,
        checkpoint: false,
        hostname: None,
    }
}
