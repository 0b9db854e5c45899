//! Offer operations.
//!
//! Operations are what a framework (through ACCEPT) or an operator (through the
//! reservation and volume endpoints) asks the master to do with resources.

use serde::{Deserialize, Serialize};

use crate::resources::Resources;
use crate::task::TaskInfo;

/// A typed resource mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// Launch tasks on the offered resources.
    Launch {
        /// Tasks to launch.
        task_infos: Vec<TaskInfo>,
    },
    /// Dynamically reserve unreserved resources for a role.
    Reserve {
        /// The reserved form of the resources.
        resources: Resources,
    },
    /// Release dynamically reserved resources back to the default role.
    Unreserve {
        /// The reserved resources to release.
        resources: Resources,
    },
    /// Turn reserved disk into persistent volumes.
    Create {
        /// The persistent volumes to create.
        volumes: Resources,
    },
    /// Turn persistent volumes back into plain reserved disk.
    Destroy {
        /// The persistent volumes to destroy.
        volumes: Resources,
    },
}

impl Operation {
    /// Wire name of the operation type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Launch { .. } => "LAUNCH",
            Self::Reserve { .. } => "RESERVE",
            Self::Unreserve { .. } => "UNRESERVE",
            Self::Create { .. } => "CREATE",
            Self::Destroy { .. } => "DESTROY",
        }
    }
}
