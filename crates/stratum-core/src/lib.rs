//! Core types and rules for stratum.
//!
//! This crate provides the foundational types used throughout the stratum
//! cluster master:
//!
//! - **Identifiers**: Strongly-typed IDs for frameworks, agents, offers, and tasks
//! - **Resources**: Scalar resources with roles, reservations, and persistent volumes
//! - **Operations**: RESERVE, UNRESERVE, CREATE, DESTROY, and LAUNCH
//! - **Maintenance**: Machine modes, schedules, and their validation rules
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use stratum_core::{Operation, Resource, Resources};
//!
//! let total: Resources = vec![Resource::scalar("cpus", 4.0)].into();
//! let reserve = Operation::Reserve {
//!     resources: vec![Resource::scalar("cpus", 1.0).reserved("web", Some("ops"))].into(),
//! };
//!
//! let after = total.apply(&reserve).unwrap();
//! assert_eq!(after.scalar("cpus"), 4.0);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod maintenance;
pub mod operation;
pub mod resources;
pub mod task;

pub use error::{CoreError, Result};
pub use ids::{AgentId, ExecutorId, FrameworkId, IdError, OfferId, TaskId};
pub use maintenance::{
    ClusterStatus, DrainingMachine, InverseOfferResponse, InverseOfferStatus, MachineId,
    MachineInfo, MachineMode, Schedule, Unavailability, Window,
};
pub use operation::Operation;
pub use resources::{Resource, Resources, DEFAULT_ROLE};
pub use task::{TaskInfo, TaskState, TaskStatus};
