//! HTTP gateway for the stratum cluster master.
//!
//! This crate exposes a running [`stratum_master::Master`] over HTTP:
//!
//! - the scheduler API, with SUBSCRIBE event streams framed as RecordIO
//! - operator endpoints for reservations, persistent volumes, and teardown
//! - maintenance schedule and machine transitions
//! - read-only listings of frameworks, agents, and tasks
//! - internal endpoints agents use to register and report
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Schedulers / Operators / Agents                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      stratum-gateway                         │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐   │
//! │  │  Principal  │ │   Router    │ │  JSON / CBOR        │   │
//! │  │  Extractor  │ │  + Handlers │ │  RecordIO streams   │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                     ┌─────────────────┐
//!                     │ stratum-master  │
//!                     └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stratum_gateway::{create_router, GatewayConfig, GatewayState};
//! use stratum_master::{Collaborators, HttpAgentLink, LocalAllocator, Master, MasterConfig};
//! use stratum_store::MemoryRegistrar;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let master = Master::start(
//!     MasterConfig::default(),
//!     Collaborators {
//!         allocator: Arc::new(LocalAllocator::new()),
//!         registrar: Arc::new(MemoryRegistrar::new()),
//!         agent_link: Arc::new(HttpAgentLink::new()?),
//!         authorizer: None,
//!     },
//! );
//! master.recover().await?;
//!
//! let state = GatewayState::new(master, None, GatewayConfig::default());
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:5050").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod encoding;
pub mod error;
pub mod handlers;
pub mod jsonp;
pub mod routes;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::GatewayState;

// Re-export key types for convenience
pub use auth::Principal;
