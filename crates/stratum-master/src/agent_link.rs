//! Messages from the master to agents.
//!
//! This module provides the `AgentLink` trait for delivering messages to
//! agents and an [`AgentOutbox`] that keeps each agent's messages in order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stratum_core::{AgentId, ExecutorId, FrameworkId, Resources, TaskId, TaskInfo};
use tokio::sync::mpsc;

use crate::error::{MasterError, Result};

/// A message delivered to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMessage {
    /// The agent must shut down.
    ShutdownAgent {
        /// Why.
        message: String,
    },
    /// Launch a task.
    RunTask {
        /// Owning framework.
        framework_id: FrameworkId,
        /// The task.
        task: TaskInfo,
    },
    /// Kill a task.
    KillTask {
        /// Owning framework.
        framework_id: FrameworkId,
        /// The task.
        task_id: TaskId,
    },
    /// Stop an executor.
    ShutdownExecutor {
        /// Owning framework.
        framework_id: FrameworkId,
        /// The executor.
        executor_id: ExecutorId,
    },
    /// A framework acknowledged a status update.
    Acknowledge {
        /// Owning framework.
        framework_id: FrameworkId,
        /// The task.
        task_id: TaskId,
        /// The update's uuid.
        uuid: String,
    },
    /// Data for an executor.
    FrameworkMessage {
        /// Sending framework.
        framework_id: FrameworkId,
        /// Target executor.
        executor_id: ExecutorId,
        /// Opaque payload.
        data: String,
    },
    /// The full set of resources the agent must checkpoint.
    CheckpointResources {
        /// Dynamic reservations and persistent volumes.
        resources: Resources,
    },
    /// A framework was removed; its executors must stop.
    ShutdownFramework {
        /// The framework.
        framework_id: FrameworkId,
    },
}

impl AgentMessage {
    /// Wire name of the message type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::ShutdownAgent { .. } => "SHUTDOWN_AGENT",
            Self::RunTask { .. } => "RUN_TASK",
            Self::KillTask { .. } => "KILL_TASK",
            Self::ShutdownExecutor { .. } => "SHUTDOWN_EXECUTOR",
            Self::Acknowledge { .. } => "ACKNOWLEDGE",
            Self::FrameworkMessage { .. } => "FRAMEWORK_MESSAGE",
            Self::CheckpointResources { .. } => "CHECKPOINT_RESOURCES",
            Self::ShutdownFramework { .. } => "SHUTDOWN_FRAMEWORK",
        }
    }
}

/// Trait for agent communication.
///
/// This trait abstracts message delivery, allowing for mock implementations
/// in tests.
#[async_trait]
pub trait AgentLink: Send + Sync {
    /// Deliver a message to the agent reachable at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be delivered.
    async fn send(&self, endpoint: &str, agent_id: &AgentId, message: &AgentMessage)
        -> Result<()>;
}

// =============================================================================
// HTTP link
// =============================================================================

/// Delivers messages as JSON to `{endpoint}/api/v1/messages`.
#[derive(Debug, Clone)]
pub struct HttpAgentLink {
    client: reqwest::Client,
}

impl HttpAgentLink {
    /// Create a link with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns `MasterError::Internal` if the HTTP client cannot be created.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| MasterError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Create a link with a custom reqwest client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentLink for HttpAgentLink {
    async fn send(
        &self,
        endpoint: &str,
        agent_id: &AgentId,
        message: &AgentMessage,
    ) -> Result<()> {
        let url = format!("{}/api/v1/messages", endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("Stratum-Agent-Id", agent_id.as_str())
            .json(message)
            .send()
            .await
            .map_err(|e| MasterError::Internal(format!("Agent request failed: {e}")))?;

        if response.status().is_success() {
            tracing::debug!(
                agent_id = %agent_id,
                message = message.type_name(),
                "Delivered message to agent"
            );
            Ok(())
        } else {
            let status = response.status();
            tracing::error!(
                agent_id = %agent_id,
                status = %status,
                message = message.type_name(),
                "Agent rejected message"
            );
            Err(MasterError::Internal(format!(
                "Agent returned status {status}"
            )))
        }
    }
}

/// A link that drops every message, for running without agents.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAgentLink;

#[async_trait]
impl AgentLink for NoopAgentLink {
    async fn send(
        &self,
        _endpoint: &str,
        agent_id: &AgentId,
        message: &AgentMessage,
    ) -> Result<()> {
        tracing::warn!(
            agent_id = %agent_id,
            message = message.type_name(),
            "NoopAgentLink: message dropped, no agent link configured"
        );
        Ok(())
    }
}

/// A link recording every message, for testing.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct RecordingAgentLink {
    sent: parking_lot::Mutex<Vec<(AgentId, AgentMessage)>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingAgentLink {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message sent so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<(AgentId, AgentMessage)> {
        self.sent.lock().clone()
    }

    /// Messages sent to one agent.
    #[must_use]
    pub fn sent_to(&self, agent_id: &AgentId) -> Vec<AgentMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|(id, _)| id == agent_id)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl AgentLink for RecordingAgentLink {
    async fn send(
        &self,
        _endpoint: &str,
        agent_id: &AgentId,
        message: &AgentMessage,
    ) -> Result<()> {
        self.sent.lock().push((agent_id.clone(), message.clone()));
        Ok(())
    }
}

// =============================================================================
// Outbox
// =============================================================================

/// Ordered, fire-and-forget delivery to one agent.
///
/// Messages are queued without blocking and forwarded by a background task,
/// one at a time. Dropping the outbox lets the task drain the queue and exit.
#[derive(Debug, Clone)]
pub struct AgentOutbox {
    queue: mpsc::UnboundedSender<AgentMessage>,
}

impl AgentOutbox {
    /// Start forwarding messages for `agent_id` through `link`.
    #[must_use]
    pub fn spawn(link: Arc<dyn AgentLink>, agent_id: AgentId, endpoint: String) -> Self {
        let (queue, mut messages) = mpsc::unbounded_channel::<AgentMessage>();

        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                if let Err(e) = link.send(&endpoint, &agent_id, &message).await {
                    tracing::warn!(
                        agent_id = %agent_id,
                        message = message.type_name(),
                        error = %e,
                        "Dropped message to agent"
                    );
                }
            }
        });

        Self { queue }
    }

    /// Queue a message.
    pub fn send(&self, message: AgentMessage) {
        // The forwarder only stops once every sender is gone.
        let _ = self.queue.send(message);
    }
}
