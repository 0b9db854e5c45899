//! Agents joining the cluster and reporting task status.

use std::collections::BTreeSet;
use std::sync::Arc;

use stratum_core::task::now_seconds;
use stratum_core::{AgentId, MachineId, MachineMode};

use crate::agent_link::AgentOutbox;
use crate::coordinator::Master;
use crate::error::{MasterError, Result};
use crate::event::Event;
use crate::state::{Agent, MasterState};
use crate::types::{AgentRegistration, ExecutorMessage, StatusUpdate};

impl MasterState {
    fn register_agent(&mut self, registration: AgentRegistration) -> Result<AgentId> {
        registration.resources.validate()?;

        let machine_id = MachineId::new(Some(&registration.hostname), registration.ip.as_deref());
        if self
            .machines
            .get(&machine_id)
            .is_some_and(|m| m.info.mode == MachineMode::Down)
        {
            return Err(MasterError::Rejected(format!(
                "Machine '{machine_id}' is under maintenance"
            )));
        }

        let id = registration.id.unwrap_or_else(AgentId::generate);
        if self.agents.contains_key(&id) {
            return Err(MasterError::Rejected(format!(
                "Agent {id} is already registered"
            )));
        }

        let outbox = AgentOutbox::spawn(
            Arc::clone(&self.agent_link),
            id.clone(),
            registration.endpoint.clone(),
        );
        self.machine_mut(&machine_id).agents.insert(id.clone());
        let unavailability = self.unavailability_of(&machine_id);

        self.allocator
            .add_agent(&id, &registration.resources, unavailability);

        tracing::info!(
            agent_id = %id,
            hostname = %registration.hostname,
            resources = %registration.resources,
            "Registered agent"
        );

        self.agents.insert(
            id.clone(),
            Agent {
                id: id.clone(),
                hostname: registration.hostname,
                ip: registration.ip,
                endpoint: registration.endpoint,
                checkpoint: registration.checkpoint,
                machine: machine_id,
                registered_time: now_seconds(),
                checkpointed: registration.resources.checkpointed(),
                total: registration.resources,
                offers: BTreeSet::new(),
                inverse_offers: BTreeSet::new(),
                tasks: BTreeSet::new(),
                executors: BTreeSet::new(),
                outbox,
            },
        );

        Ok(id)
    }

    fn executor_message(&mut self, message: ExecutorMessage) {
        if !self.frameworks.contains_key(&message.framework_id) {
            tracing::warn!(
                framework_id = %message.framework_id,
                executor_id = %message.executor_id,
                "Dropping executor message for unknown framework"
            );
            return;
        }

        self.send(
            &message.framework_id,
            Event::Message {
                agent_id: message.agent_id,
                executor_id: message.executor_id,
                data: message.data,
            },
        );
    }
}

impl Master {
    /// Add an agent to the cluster.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if the agent's machine is DOWN or the id is taken,
    /// and `Core` for malformed resources.
    pub async fn register_agent(&self, registration: AgentRegistration) -> Result<AgentId> {
        self.dispatch(move |state| state.register_agent(registration))
            .await?
    }

    /// Record a task status reported by an agent and forward it.
    ///
    /// # Errors
    ///
    /// Returns `MasterError::Stopped` if the coordinator is gone.
    pub async fn status_update(&self, update: StatusUpdate) -> Result<()> {
        self.dispatch(move |state| state.update_task(&update.framework_id, update.status))
            .await
    }

    /// Forward an executor's message to its framework.
    ///
    /// # Errors
    ///
    /// Returns `MasterError::Stopped` if the coordinator is gone.
    pub async fn executor_message(&self, message: ExecutorMessage) -> Result<()> {
        self.dispatch(move |state| state.executor_message(message))
            .await
    }

    /// Whether the agent is registered.
    ///
    /// # Errors
    ///
    /// Returns `MasterError::Stopped` if the coordinator is gone.
    pub async fn has_agent(&self, agent_id: &AgentId) -> Result<bool> {
        let agent_id = agent_id.clone();
        self.dispatch(move |state| state.agents.contains_key(&agent_id))
            .await
    }
}
