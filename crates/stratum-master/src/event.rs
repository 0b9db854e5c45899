//! Events sent to subscribed frameworks.

use serde::{Deserialize, Serialize};
use stratum_core::{
    AgentId, ExecutorId, FrameworkId, OfferId, Resources, TaskStatus, Unavailability,
};

/// A resource offer as sent to a framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferInfo {
    /// The offer.
    pub id: OfferId,
    /// Framework receiving the offer.
    pub framework_id: FrameworkId,
    /// Agent holding the resources.
    pub agent_id: AgentId,
    /// Hostname of the agent.
    pub hostname: String,
    /// Offered resources.
    pub resources: Resources,
}

/// A request to give resources back ahead of maintenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InverseOfferInfo {
    /// The inverse offer.
    pub id: OfferId,
    /// Framework asked to vacate.
    pub framework_id: FrameworkId,
    /// Agent to vacate.
    pub agent_id: AgentId,
    /// When the agent becomes unavailable.
    pub unavailability: Unavailability,
}

/// An event on a framework's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    /// First event of every stream.
    Subscribed {
        /// The framework's id, generated on first subscription.
        framework_id: FrameworkId,
        /// Interval between heartbeats, when enabled.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        heartbeat_interval_seconds: Option<f64>,
    },
    /// New offers and inverse offers.
    Offers {
        /// Resource offers.
        #[serde(default)]
        offers: Vec<OfferInfo>,
        /// Inverse offers.
        #[serde(default)]
        inverse_offers: Vec<InverseOfferInfo>,
    },
    /// An offer is no longer valid.
    Rescind {
        /// The rescinded offer.
        offer_id: OfferId,
    },
    /// A task status changed.
    Update {
        /// The new status.
        status: TaskStatus,
    },
    /// A message from an executor.
    Message {
        /// Agent running the executor.
        agent_id: AgentId,
        /// The executor.
        executor_id: ExecutorId,
        /// Opaque payload.
        data: String,
    },
    /// An agent or executor was lost.
    Failure {
        /// The lost agent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
        /// The lost executor, if only the executor failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        executor_id: Option<ExecutorId>,
    },
    /// The subscription failed or was superseded; the stream ends after it.
    Error {
        /// Why.
        message: String,
    },
    /// Keep-alive.
    Heartbeat,
}

impl Event {
    /// Wire name of the event type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Subscribed { .. } => "SUBSCRIBED",
            Self::Offers { .. } => "OFFERS",
            Self::Rescind { .. } => "RESCIND",
            Self::Update { .. } => "UPDATE",
            Self::Message { .. } => "MESSAGE",
            Self::Failure { .. } => "FAILURE",
            Self::Error { .. } => "ERROR",
            Self::Heartbeat => "HEARTBEAT",
        }
    }

    /// Shorthand for an ERROR event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
