//! Task descriptions and status updates.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, ExecutorId, TaskId};
use crate::resources::Resources;

/// Seconds since the Unix epoch, as carried in status updates.
#[must_use]
pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// A task a framework asks to launch on offered resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Human-readable task name.
    pub name: String,
    /// Framework-chosen task identifier.
    pub task_id: TaskId,
    /// Agent the task must run on.
    pub agent_id: AgentId,
    /// Resources consumed by the task.
    pub resources: Resources,
    /// Executor that runs the task, if not the default command executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<ExecutorId>,
    /// Command line for the default executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Opaque payload passed to the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Accepted by the master, not yet started.
    #[serde(rename = "TASK_STAGING")]
    Staging,
    /// Starting on the agent.
    #[serde(rename = "TASK_STARTING")]
    Starting,
    /// Running.
    #[serde(rename = "TASK_RUNNING")]
    Running,
    /// Completed successfully.
    #[serde(rename = "TASK_FINISHED")]
    Finished,
    /// Exited with an error.
    #[serde(rename = "TASK_FAILED")]
    Failed,
    /// Killed on request.
    #[serde(rename = "TASK_KILLED")]
    Killed,
    /// Lost together with its agent, or unknown to the master.
    #[serde(rename = "TASK_LOST")]
    Lost,
    /// Rejected before launch.
    #[serde(rename = "TASK_ERROR")]
    Error,
}

impl TaskState {
    /// Whether no further updates follow this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Failed | Self::Killed | Self::Lost | Self::Error
        )
    }
}

/// A status update for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// The task.
    pub task_id: TaskId,
    /// New state.
    pub state: TaskState,
    /// Agent running the task, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    /// Executor running the task, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<ExecutorId>,
    /// Human-readable explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    /// Present on updates that must be acknowledged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl TaskStatus {
    /// Create a status stamped with the current time.
    #[must_use]
    pub fn new(task_id: TaskId, state: TaskState) -> Self {
        Self {
            task_id,
            state,
            agent_id: None,
            executor_id: None,
            message: None,
            timestamp: now_seconds(),
            uuid: None,
        }
    }

    /// Attach the agent.
    #[must_use]
    pub fn with_agent(mut self, agent_id: Option<AgentId>) -> Self {
        self.agent_id = agent_id;
        self
    }

    /// Attach a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
