//! Operator resource operations: reservations and persistent volumes.
//!
//! An operation is validated against the agent, then just enough outstanding
//! offers on the agent are rescinded to cover what it consumes, and finally
//! the allocator is asked to apply it to the unallocated resources. Only when
//! the allocator agrees does the agent's total change.

use std::time::Duration;

use stratum_core::{AgentId, OfferId, Operation, Resources};

use crate::agent_link::AgentMessage;
use crate::coordinator::Master;
use crate::error::{MasterError, Result};
use crate::state::MasterState;
use crate::validation::validate_operation;

/// Pick the offers to rescind so that `operation` can be applied.
///
/// Offers are taken greedily in iteration order. An offer that does not
/// reduce `required` is skipped. Selection stops as soon as the resources
/// recovered so far can absorb the operation.
pub(crate) fn select_rescissions<'a>(
    offers: impl IntoIterator<Item = (&'a OfferId, &'a Resources)>,
    required: &Resources,
    operation: &Operation,
) -> Vec<OfferId> {
    let mut required = required.clone();
    let mut recovered = Resources::new();
    let mut selected = Vec::new();

    for (offer_id, resources) in offers {
        if required == &required - resources {
            continue;
        }

        recovered += resources;
        required -= resources;
        selected.push(offer_id.clone());

        if recovered.apply(operation).is_ok() {
            break;
        }
    }

    selected
}

impl MasterState {
    /// Validate `operation` against the agent and rescind the offers it needs.
    fn prepare_operation(
        &mut self,
        agent_id: &AgentId,
        required: &Resources,
        operation: &Operation,
        principal: Option<&str>,
    ) -> Result<()> {
        let agent = self
            .agents
            .get(agent_id)
            .ok_or_else(|| MasterError::AgentNotFound(agent_id.clone()))?;

        validate_operation(operation, &agent.checkpointed, agent.checkpoint, principal).map_err(
            |message| MasterError::InvalidOperation {
                kind: operation.type_name(),
                message,
            },
        )?;

        let offers: Vec<(OfferId, Resources)> = agent
            .offers
            .iter()
            .filter_map(|id| self.offers.get(id).map(|o| (id.clone(), o.resources.clone())))
            .collect();

        let rescinded = select_rescissions(
            offers.iter().map(|(id, resources)| (id, resources)),
            required,
            operation,
        );

        let refuse = Duration::try_from_secs_f64(self.config.rescind_refuse_seconds).ok();
        for offer_id in &rescinded {
            self.recover_offer(offer_id, refuse, true);
        }

        tracing::debug!(
            agent_id = %agent_id,
            operation = operation.type_name(),
            rescinded = rescinded.len(),
            "Prepared operation"
        );

        Ok(())
    }

    /// Apply an operation the allocator accepted to the agent's total.
    pub(crate) fn apply_to_agent(&mut self, agent_id: &AgentId, operation: &Operation) {
        let Some(agent) = self.agents.get_mut(agent_id) else {
            return;
        };

        match agent.total.apply(operation) {
            Ok(total) => {
                agent.total = total;
                agent.checkpointed = agent.total.checkpointed();
                agent.send(AgentMessage::CheckpointResources {
                    resources: agent.checkpointed.clone(),
                });
                tracing::info!(
                    agent_id = %agent_id,
                    operation = operation.type_name(),
                    "Applied operation to agent"
                );
            }
            Err(e) => {
                tracing::error!(
                    agent_id = %agent_id,
                    operation = operation.type_name(),
                    error = %e,
                    "Operation accepted by allocator does not apply to agent"
                );
            }
        }
    }
}

impl Master {
    async fn admit(
        &self,
        agent_id: &AgentId,
        required: Resources,
        operation: Operation,
        principal: Option<String>,
    ) -> Result<()> {
        let (id, op) = (agent_id.clone(), operation.clone());
        self.dispatch(move |state| state.prepare_operation(&id, &required, &op, principal.as_deref()))
            .await??;

        self.shared
            .allocator
            .update_available(agent_id, std::slice::from_ref(&operation))
            .await
            .map_err(|e| match e {
                MasterError::Conflict(_) => e,
                other => MasterError::Conflict(other.to_string()),
            })?;

        let id = agent_id.clone();
        self.dispatch(move |state| state.apply_to_agent(&id, &operation))
            .await
    }

    /// Dynamically reserve unreserved resources on an agent.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound`, `InvalidOperation` when validation fails, or
    /// `Conflict` when the agent's unallocated resources cannot cover the
    /// reservation.
    pub async fn reserve(
        &self,
        agent_id: &AgentId,
        resources: Resources,
        principal: Option<String>,
    ) -> Result<()> {
        let required = resources.flatten();
        self.admit(agent_id, required, Operation::Reserve { resources }, principal)
            .await
    }

    /// Release dynamically reserved resources on an agent.
    ///
    /// # Errors
    ///
    /// See [`Master::reserve`].
    pub async fn unreserve(
        &self,
        agent_id: &AgentId,
        resources: Resources,
        principal: Option<String>,
    ) -> Result<()> {
        let required = resources.clone();
        self.admit(agent_id, required, Operation::Unreserve { resources }, principal)
            .await
    }

    /// Create persistent volumes from reserved disk.
    ///
    /// # Errors
    ///
    /// See [`Master::reserve`].
    pub async fn create_volumes(
        &self,
        agent_id: &AgentId,
        volumes: Resources,
        principal: Option<String>,
    ) -> Result<()> {
        let required = volumes.strip_disk();
        self.admit(agent_id, required, Operation::Create { volumes }, principal)
            .await
    }

    /// Destroy persistent volumes.
    ///
    /// # Errors
    ///
    /// See [`Master::reserve`].
    pub async fn destroy_volumes(
        &self,
        agent_id: &AgentId,
        volumes: Resources,
        principal: Option<String>,
    ) -> Result<()> {
        let required = volumes.clone();
        self.admit(agent_id, required, Operation::Destroy { volumes }, principal)
            .await
    }
}
