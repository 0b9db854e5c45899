//! Stratum master - cluster master with an HTTP API.
//!
//! This is the main entry point for the master service. Configuration comes
//! from the environment:
//!
//! - `LISTEN_ADDR` - address to serve on (default `0.0.0.0:5050`)
//! - `REGISTRY` - `replicated` (RocksDB under `DATA_DIR`) or `in_memory`
//! - `DATA_DIR` - RocksDB directory for the replicated registry
//! - `CREDENTIALS` - JSON file of operator credentials; anonymous when unset
//! - `ACLS` - JSON file of ACLs; everything is authorized when unset
//! - `AUTHENTICATE_FRAMEWORKS` - `true` to require framework authentication
//! - `AGENT_LINK` - `http` to deliver agent messages, `noop` to drop them

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stratum_auth::{Acls, Authorizer, Credentials, LocalAuthorizer};
use stratum_gateway::{create_router, GatewayConfig, GatewayState};
use stratum_master::{
    AgentLink, Collaborators, HttpAgentLink, LocalAllocator, Master, MasterConfig, NoopAgentLink,
};
use stratum_store::{MemoryRegistrar, Registrar, RocksRegistrar};

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "yes"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stratum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting stratum master");

    // Load configuration from environment
    let gateway_config = GatewayConfig {
        listen_addr: std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| GatewayConfig::default().listen_addr),
        ..GatewayConfig::default()
    };
    let registry = std::env::var("REGISTRY").unwrap_or_else(|_| "replicated".into());
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "/var/lib/stratum".into());
    let agent_link = std::env::var("AGENT_LINK").unwrap_or_else(|_| "http".into());
    let master_config = MasterConfig {
        authenticate_frameworks: env_flag("AUTHENTICATE_FRAMEWORKS"),
        ..MasterConfig::default()
    };

    tracing::info!(
        listen_addr = %gateway_config.listen_addr,
        registry = %registry,
        data_dir = %data_dir,
        agent_link = %agent_link,
        authenticate_frameworks = master_config.authenticate_frameworks,
        "Master configuration loaded"
    );

    // Initialize the registrar
    let registrar: Arc<dyn Registrar> = match registry.as_str() {
        "in_memory" => {
            tracing::warn!("Using in-memory registry - maintenance state is lost on restart");
            Arc::new(MemoryRegistrar::new())
        }
        "replicated" => {
            tracing::info!(path = %data_dir, "Opening RocksDB registry");
            Arc::new(RocksRegistrar::open(&data_dir)?)
        }
        other => return Err(format!("Unknown REGISTRY '{other}'").into()),
    };

    let agent_link: Arc<dyn AgentLink> = match agent_link.as_str() {
        "noop" => {
            tracing::warn!("No agent link - messages to agents are dropped");
            Arc::new(NoopAgentLink)
        }
        "http" => Arc::new(HttpAgentLink::new()?),
        other => return Err(format!("Unknown AGENT_LINK '{other}'").into()),
    };

    // Credentials and ACLs
    let credentials = match std::env::var("CREDENTIALS") {
        Ok(path) => {
            let credentials = Credentials::load(&path)?;
            tracing::info!(path = %path, "Operator authentication enabled");
            Some(Arc::new(credentials))
        }
        Err(_) => None,
    };

    let authorizer = match std::env::var("ACLS") {
        Ok(path) => {
            let acls = Acls::load(&path)?;
            tracing::info!(path = %path, "Authorization enabled");
            Some(Arc::new(LocalAuthorizer::new(acls)) as Arc<dyn Authorizer>)
        }
        Err(_) => None,
    };

    // Start the master and recover the maintenance registry
    let master = Master::start(
        master_config,
        Collaborators {
            allocator: Arc::new(LocalAllocator::new()),
            registrar,
            agent_link,
            authorizer,
        },
    );
    master.recover().await?;
    tracing::info!("Master recovered");

    let listen_addr = gateway_config.listen_addr.clone();
    let state = GatewayState::new(master, credentials, gateway_config);
    let app = create_router(state);

    // Start HTTP server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
