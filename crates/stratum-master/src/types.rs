//! Configuration and request/response types for the master.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stratum_core::{
    AgentId, ExecutorId, FrameworkId, Resources, TaskId, TaskState, TaskStatus, DEFAULT_ROLE,
};

use crate::event::OfferInfo;

/// Configuration for the master.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Whether frameworks must authenticate. HTTP schedulers are then rejected.
    pub authenticate_frameworks: bool,
    /// Refusal applied to offers rescinded by operator operations (seconds).
    pub rescind_refuse_seconds: f64,
    /// Refusal applied when a call carries filters without a duration (seconds).
    pub default_refuse_seconds: f64,
    /// Interval between HEARTBEAT events; disabled when `None`.
    pub heartbeat_interval: Option<Duration>,
    /// Interval between allocation rounds; disabled when `None`.
    pub allocation_interval: Option<Duration>,
    /// How many removed frameworks are remembered.
    pub max_completed_frameworks: usize,
    /// How many finished tasks are remembered per framework.
    pub max_completed_tasks_per_framework: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            authenticate_frameworks: false,
            rescind_refuse_seconds: 5.0,
            default_refuse_seconds: 5.0,
            heartbeat_interval: Some(Duration::from_secs(15)),
            allocation_interval: Some(Duration::from_secs(1)),
            max_completed_frameworks: 50,
            max_completed_tasks_per_framework: 1000,
        }
    }
}

/// Description of a framework, sent with SUBSCRIBE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    /// Set when re-subscribing after a failover.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FrameworkId>,
    /// Human-readable name.
    pub name: String,
    /// User tasks run as by default.
    pub user: String,
    /// Principal the framework acts as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// Role whose reserved resources the framework may be offered.
    #[serde(default = "default_role")]
    pub role: String,
    /// How long the master keeps a disconnected framework (seconds).
    #[serde(default)]
    pub failover_timeout: f64,
    /// Whether the framework's tasks survive agent restarts.
    #[serde(default)]
    pub checkpoint: bool,
    /// Host the scheduler runs on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

/// Offer filters attached to ACCEPT and DECLINE.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    /// How long the declined resources are withheld from the framework (seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refuse_seconds: Option<f64>,
}

impl Filters {
    /// Filters refusing resources for `seconds`.
    #[must_use]
    pub const fn refuse(seconds: f64) -> Self {
        Self {
            refuse_seconds: Some(seconds),
        }
    }
}

/// An agent joining the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    /// Identity to re-register with; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AgentId>,
    /// Hostname of the agent's machine.
    pub hostname: String,
    /// IP address of the agent's machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Base URL the master sends messages to.
    pub endpoint: String,
    /// Whether the agent checkpoints resources and tasks.
    #[serde(default)]
    pub checkpoint: bool,
    /// Total resources of the agent.
    pub resources: Resources,
}

/// A task status reported by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Framework owning the task.
    pub framework_id: FrameworkId,
    /// The new status.
    pub status: TaskStatus,
}

/// A message from an executor to its framework.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorMessage {
    /// Agent running the executor.
    pub agent_id: AgentId,
    /// Framework the message is for.
    pub framework_id: FrameworkId,
    /// The sending executor.
    pub executor_id: ExecutorId,
    /// Opaque payload.
    pub data: String,
}

// =============================================================================
// Listings
// =============================================================================

/// A task as reported by listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    /// The task.
    pub id: TaskId,
    /// Task name.
    pub name: String,
    /// Owning framework.
    pub framework_id: FrameworkId,
    /// Agent running the task.
    pub slave_id: AgentId,
    /// Executor running the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<ExecutorId>,
    /// Latest state.
    pub state: TaskState,
    /// Resources used by the task.
    pub resources: Resources,
    /// Every status seen for the task, oldest first.
    pub statuses: Vec<TaskStatus>,
}

impl TaskSummary {
    /// Timestamp of the first status, used for ordering.
    #[must_use]
    pub fn started_at(&self) -> f64 {
        self.statuses.first().map_or(0.0, |s| s.timestamp)
    }
}

/// A framework as reported by listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkSummary {
    /// The framework.
    pub id: FrameworkId,
    /// Framework name.
    pub name: String,
    /// Default user.
    pub user: String,
    /// Principal, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// Role.
    pub role: String,
    /// Whether the framework receives offers.
    pub active: bool,
    /// Whether an event stream is open.
    pub connected: bool,
    /// Failover timeout in seconds.
    pub failover_timeout: f64,
    /// First subscription time.
    pub registered_time: f64,
    /// Latest re-subscription time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reregistered_time: Option<f64>,
    /// When the framework was removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unregistered_time: Option<f64>,
    /// Resources held in outstanding offers.
    pub offered_resources: Resources,
    /// Resources used by active tasks.
    pub used_resources: Resources,
    /// Outstanding offers.
    pub offers: Vec<OfferInfo>,
    /// Active tasks.
    pub tasks: Vec<TaskSummary>,
    /// Finished tasks, most recent last.
    pub completed_tasks: Vec<TaskSummary>,
}

/// Response of the frameworks listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameworksSnapshot {
    /// Registered frameworks.
    pub frameworks: Vec<FrameworkSummary>,
    /// Recently removed frameworks.
    pub completed_frameworks: Vec<FrameworkSummary>,
    /// Frameworks with tasks on agents that have not subscribed.
    pub unregistered_frameworks: Vec<FrameworkId>,
}

/// An agent as reported by listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    /// The agent.
    pub id: AgentId,
    /// Hostname.
    pub hostname: String,
    /// IP address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Message endpoint.
    pub endpoint: String,
    /// Whether the agent checkpoints.
    pub checkpoint: bool,
    /// When the agent registered.
    pub registered_time: f64,
    /// Total resources.
    pub resources: Resources,
    /// Resources used by tasks.
    pub used_resources: Resources,
    /// Resources in outstanding offers.
    pub offered_resources: Resources,
    /// Dynamic reservations and persistent volumes.
    pub checkpointed_resources: Resources,
}

/// Sort direction for the tasks listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOrder {
    /// Oldest first.
    #[default]
    Asc,
    /// Newest first.
    Desc,
}

/// Pagination of the tasks listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskQuery {
    /// Maximum number of tasks returned.
    pub limit: usize,
    /// Number of tasks skipped.
    pub offset: usize,
    /// Sort direction by first status time.
    pub order: TaskOrder,
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            order: TaskOrder::Asc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_config_defaults() {
        let config = MasterConfig::default();
        assert!(!config.authenticate_frameworks);
        assert!((config.rescind_refuse_seconds - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.heartbeat_interval, Some(Duration::from_secs(15)));
        assert_eq!(config.max_completed_frameworks, 50);
        assert_eq!(config.max_completed_tasks_per_framework, 1000);
    }

    #[test]
    fn framework_info_defaults() {
        let info: FrameworkInfo =
            serde_json::from_str(r#"{"name":"web","user":"nobody"}"#).unwrap();
        assert_eq!(info.role, "*");
        assert!(info.id.is_none());
        assert!(info.failover_timeout.abs() < f64::EPSILON);
    }

    #[test]
    fn task_query_defaults() {
        let query = TaskQuery::default();
        assert_eq!(query.limit, 100);
        assert_eq!(query.offset, 0);
        assert_eq!(query.order, TaskOrder::Asc);
    }
}
