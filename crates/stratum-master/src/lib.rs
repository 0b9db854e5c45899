//! The stratum cluster master.
//!
//! The master brokers resources between agents and frameworks. It offers
//! agent resources to subscribed frameworks, dispatches their calls, admits
//! operator reservations and volumes, and drives machines through
//! maintenance.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Gateway (HTTP)                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Master (coordinator task)                  │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │ Scheduler   │ │ Operation   │ │    Maintenance      │    │
//! │  │ calls       │ │ admission   │ │    lifecycle        │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌───────────────┬─────┴─────────┬───────────────┐
//!        ▼               ▼               ▼               ▼
//!  ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐
//!  │ Allocator │   │ Registrar │   │ Authorizer│   │ AgentLink │
//!  │           │   │ (RocksDB) │   │ (ACLs)    │   │ (HTTP)    │
//!  └───────────┘   └───────────┘   └───────────┘   └───────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use stratum_master::{Collaborators, HttpAgentLink, LocalAllocator, Master, MasterConfig};
//! use stratum_store::RocksRegistrar;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let master = Master::start(
//!     MasterConfig::default(),
//!     Collaborators {
//!         allocator: Arc::new(LocalAllocator::new()),
//!         registrar: Arc::new(RocksRegistrar::open("/tmp/stratum")?),
//!         agent_link: Arc::new(HttpAgentLink::new()?),
//!         authorizer: None,
//!     },
//! );
//! master.recover().await?;
//!
//! let schedule = master.schedule().await?;
//! println!("{} maintenance windows", schedule.windows.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Maintenance
//!
//! Machines move through a fixed cycle:
//!
//! - `Up` → `Draining` when a schedule names the machine
//! - `Draining` → `Down` on an operator request; its agents are shut down
//! - `Down` → `Up` on an operator request; the machine leaves the schedule

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod agent_link;
pub mod allocator;
pub mod call;
pub mod error;
pub mod event;
pub mod types;
pub mod validation;

mod admission;
mod agents;
mod coordinator;
mod dispatcher;
mod frameworks;
mod listing;
mod maintenance;
mod state;

#[cfg(test)]
mod testing;

pub use agent_link::{AgentLink, AgentMessage, HttpAgentLink, NoopAgentLink};
pub use allocator::{Allocator, LocalAllocator};
pub use call::{Call, CallType, FrameworkCall, SchedulerCall};
pub use coordinator::{Collaborators, Master};
pub use error::{MasterError, Result};
pub use event::{Event, InverseOfferInfo, OfferInfo};
pub use frameworks::Subscription;
pub use types::{
    AgentRegistration, AgentSummary, ExecutorMessage, Filters, FrameworkInfo, FrameworkSummary,
    FrameworksSnapshot, MasterConfig, StatusUpdate, TaskOrder, TaskQuery, TaskSummary,
};

#[cfg(any(test, feature = "test-utils"))]
pub use agent_link::RecordingAgentLink;

// Re-export commonly used types from dependencies for convenience
pub use stratum_core::{AgentId, FrameworkId, MachineId, OfferId, Resources, TaskId};
