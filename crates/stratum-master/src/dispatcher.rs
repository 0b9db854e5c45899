//! Scheduler calls from subscribed frameworks.
//!
//! Every call is handled in one coordinator turn, except ACCEPT: its task
//! launches are authorized between turns and finished in a second turn. The
//! caller is answered as soon as the first turn ran.

use std::collections::BTreeSet;
use std::time::Duration;

use futures::future::join_all;
use stratum_auth::AuthorizationRequest;
use stratum_core::{
    AgentId, FrameworkId, InverseOfferResponse, OfferId, Operation, Resources, TaskInfo,
    TaskState, TaskStatus,
};

use crate::agent_link::AgentMessage;
use crate::call::{Accept, Acknowledge, Decline, FrameworkCall, Kill, Message, Reconcile, Shutdown};
use crate::coordinator::Master;
use crate::error::{MasterError, Result};
use crate::event::Event;
use crate::state::{MasterState, Task};
use crate::types::Filters;
use crate::validation::validate_operation;

/// An ACCEPT whose task launches await authorization.
#[derive(Debug)]
pub(crate) struct PendingAccept {
    framework_id: FrameworkId,
    agent_id: AgentId,
    offered: Resources,
    operations: Vec<Operation>,
    filters: Option<Filters>,
    principal: Option<String>,
    user: String,
}

impl PendingAccept {
    fn tasks(&self) -> impl Iterator<Item = &TaskInfo> {
        launched(&self.operations)
    }
}

/// Tasks of every LAUNCH operation, in order.
fn launched(operations: &[Operation]) -> impl Iterator<Item = &TaskInfo> {
    operations
        .iter()
        .filter_map(|operation| match operation {
            Operation::Launch { task_infos } => Some(task_infos),
            _ => None,
        })
        .flatten()
}

/// Outcome of authorizing one task launch.
type Authorization = std::result::Result<bool, String>;

impl Master {
    /// Handle a call from a subscribed framework.
    ///
    /// # Errors
    ///
    /// Returns `FrameworkNotFound` for an unknown framework and
    /// `FrameworkNotSubscribed` if it has no open event stream.
    pub async fn call(&self, framework_id: FrameworkId, call: FrameworkCall) -> Result<()> {
        let pending = self
            .dispatch(move |state| state.handle_call(&framework_id, call))
            .await??;

        if let Some(pending) = pending {
            let master = self.clone();
            tokio::spawn(async move { master.authorize_accept(pending).await });
        }

        Ok(())
    }

    async fn authorize_accept(&self, pending: PendingAccept) {
        let authorizations: Vec<Authorization> = match &self.shared.authorizer {
            None => pending.tasks().map(|_| Ok(true)).collect(),
            Some(authorizer) => {
                let requests = pending.tasks().map(|_| AuthorizationRequest::RunTask {
                    principal: pending.principal.clone(),
                    user: Some(pending.user.clone()),
                });
                join_all(requests.map(|request| async move {
                    authorizer
                        .authorize(&request)
                        .await
                        .map_err(|e| e.to_string())
                }))
                .await
            }
        };

        if let Err(e) = self
            .dispatch(move |state| state.finish_accept(pending, authorizations))
            .await
        {
            tracing::debug!(error = %e, "Dropped accept after authorization");
        }
    }
}

impl MasterState {
    fn refuse_duration(&self, filters: Option<Filters>) -> Option<Duration> {
        let seconds = filters
            .and_then(|f| f.refuse_seconds)
            .unwrap_or(self.config.default_refuse_seconds);
        Duration::try_from_secs_f64(seconds).ok()
    }

    pub(crate) fn handle_call(
        &mut self,
        framework_id: &FrameworkId,
        call: FrameworkCall,
    ) -> Result<Option<PendingAccept>> {
        let framework = self
            .frameworks
            .get(framework_id)
            .ok_or_else(|| MasterError::FrameworkNotFound(framework_id.clone()))?;
        if !framework.connected() {
            return Err(MasterError::FrameworkNotSubscribed(framework_id.clone()));
        }

        tracing::debug!(framework_id = %framework_id, call = call.type_name(), "Processing call");

        match call {
            FrameworkCall::Teardown => self.remove_framework(framework_id),
            FrameworkCall::Accept(accept) => return Ok(self.accept(framework_id, accept)),
            FrameworkCall::Decline(decline) => self.decline(framework_id, decline),
            FrameworkCall::Revive => self.allocator.revive_offers(framework_id),
            FrameworkCall::Suppress => self.allocator.suppress_offers(framework_id),
            FrameworkCall::Kill(kill) => self.kill(framework_id, kill),
            FrameworkCall::Shutdown(shutdown) => self.shutdown_executor(framework_id, shutdown),
            FrameworkCall::Acknowledge(ack) => self.acknowledge(framework_id, ack),
            FrameworkCall::Reconcile(reconcile) => self.reconcile(framework_id, &reconcile),
            FrameworkCall::Message(message) => self.framework_message(framework_id, message),
            FrameworkCall::Request(request) => {
                self.allocator
                    .request_resources(framework_id, &request.requests);
            }
        }

        Ok(None)
    }

    // =========================================================================
    // ACCEPT
    // =========================================================================

    fn validate_offers(
        &self,
        framework_id: &FrameworkId,
        offer_ids: &[OfferId],
    ) -> std::result::Result<(), String> {
        if offer_ids.is_empty() {
            return Err("No offers specified".into());
        }

        let mut seen = BTreeSet::new();
        let mut agent: Option<&AgentId> = None;

        for id in offer_ids {
            if !seen.insert(id) {
                return Err(format!("Duplicate offer {id} in offer list"));
            }

            let offer = self
                .offers
                .get(id)
                .ok_or_else(|| format!("Offer {id} is no longer valid"))?;

            if &offer.framework_id != framework_id {
                return Err(format!(
                    "Offer {id} has invalid framework {} while framework {framework_id} is expected",
                    offer.framework_id
                ));
            }

            match agent {
                None => agent = Some(&offer.agent_id),
                Some(agent_id) if agent_id != &offer.agent_id => {
                    return Err("Aggregated offers must belong to one single agent".into());
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    fn accept(&mut self, framework_id: &FrameworkId, accept: Accept) -> Option<PendingAccept> {
        let Accept {
            offer_ids,
            operations,
            filters,
        } = accept;

        let (inverse_offer_ids, offer_ids): (Vec<OfferId>, Vec<OfferId>) = offer_ids
            .into_iter()
            .partition(|id| self.inverse_offers.contains_key(id));

        for id in &inverse_offer_ids {
            self.answer_inverse_offer(framework_id, id, InverseOfferResponse::Accept);
        }
        if offer_ids.is_empty() && operations.is_empty() {
            return None;
        }

        let validation = self.validate_offers(framework_id, &offer_ids);

        let mut offered = Resources::new();
        let mut agent_id = None;
        for id in &offer_ids {
            let owned = self
                .offers
                .get(id)
                .is_some_and(|offer| &offer.framework_id == framework_id);
            if !owned {
                tracing::warn!(framework_id = %framework_id, offer_id = %id, "Ignoring unknown offer");
                continue;
            }

            let removed = if validation.is_err() {
                self.recover_offer(id, None, false)
            } else {
                self.remove_offer(id, false)
            };
            if let Some(offer) = removed {
                offered += &offer.resources;
                agent_id = Some(offer.agent_id);
            }
        }

        let agent_id = match (validation, agent_id) {
            (Ok(()), Some(agent_id)) => agent_id,
            (result, _) => {
                let error = result.err().unwrap_or_else(|| "No offers specified".into());
                tracing::warn!(framework_id = %framework_id, error = %error, "Invalid ACCEPT call");
                for task in launched(&operations) {
                    self.send_status(
                        framework_id,
                        &task.task_id,
                        Some(task.agent_id.clone()),
                        TaskState::Lost,
                        format!("Task launched with invalid offers: {error}"),
                    );
                }
                return None;
            }
        };

        let framework = self.frameworks.get_mut(framework_id)?;
        for task in launched(&operations) {
            framework
                .pending_tasks
                .insert(task.task_id.clone(), task.clone());
        }

        Some(PendingAccept {
            framework_id: framework_id.clone(),
            agent_id,
            offered,
            operations,
            filters,
            principal: framework.info.principal.clone(),
            user: framework.info.user.clone(),
        })
    }

    fn answer_inverse_offer(
        &mut self,
        framework_id: &FrameworkId,
        offer_id: &OfferId,
        response: InverseOfferResponse,
    ) {
        let owned = self
            .inverse_offers
            .get(offer_id)
            .is_some_and(|offer| &offer.framework_id == framework_id);
        if !owned {
            tracing::warn!(framework_id = %framework_id, offer_id = %offer_id, "Ignoring unknown inverse offer");
            return;
        }

        if let Some(offer) = self.remove_inverse_offer(offer_id, false) {
            self.allocator
                .update_inverse_offer(&offer.agent_id, framework_id, Some(response));
        }
    }

    /// Apply the operations of an authorized ACCEPT.
    fn finish_accept(&mut self, pending: PendingAccept, authorizations: Vec<Authorization>) {
        let PendingAccept {
            framework_id,
            agent_id,
            offered,
            operations,
            filters,
            principal,
            user,
        } = pending;

        if !self.frameworks.contains_key(&framework_id) {
            self.allocator
                .recover_resources(&framework_id, &agent_id, &offered, None);
            return;
        }

        if !self.agents.contains_key(&agent_id) {
            for task in launched(&operations) {
                let pending = self
                    .frameworks
                    .get_mut(&framework_id)
                    .and_then(|f| f.pending_tasks.remove(&task.task_id));
                if pending.is_some() {
                    self.send_status(
                        &framework_id,
                        &task.task_id,
                        Some(agent_id.clone()),
                        TaskState::Lost,
                        "Agent removed",
                    );
                }
            }
            self.allocator
                .recover_resources(&framework_id, &agent_id, &offered, None);
            return;
        }

        let mut remaining = offered;
        let mut authorizations = authorizations.into_iter();

        for operation in operations {
            match operation {
                Operation::Launch { task_infos } => {
                    for task in task_infos {
                        let authorization = authorizations.next().unwrap_or(Ok(true));
                        self.launch(
                            &framework_id,
                            &agent_id,
                            task,
                            authorization,
                            &user,
                            &mut remaining,
                        );
                    }
                }
                operation => self.apply_accepted(
                    &framework_id,
                    &agent_id,
                    &operation,
                    principal.as_deref(),
                    &mut remaining,
                ),
            }
        }

        if !remaining.is_empty() {
            let refuse = self.refuse_duration(filters);
            self.allocator
                .recover_resources(&framework_id, &agent_id, &remaining, refuse);
        }
    }

    fn apply_accepted(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        operation: &Operation,
        principal: Option<&str>,
        remaining: &mut Resources,
    ) {
        let Some(agent) = self.agents.get(agent_id) else {
            return;
        };

        if let Err(message) =
            validate_operation(operation, &agent.checkpointed, agent.checkpoint, principal)
        {
            tracing::warn!(
                framework_id = %framework_id,
                operation = operation.type_name(),
                error = %message,
                "Dropping invalid operation"
            );
            return;
        }

        match remaining.apply(operation) {
            Ok(applied) => *remaining = applied,
            Err(e) => {
                tracing::warn!(
                    framework_id = %framework_id,
                    operation = operation.type_name(),
                    error = %e,
                    "Dropping operation not covered by offered resources"
                );
                return;
            }
        }

        self.allocator
            .update_allocation(framework_id, agent_id, std::slice::from_ref(operation));
        self.apply_to_agent(agent_id, operation);
    }

    fn validate_task(
        &self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        task: &TaskInfo,
        remaining: &Resources,
    ) -> std::result::Result<(), String> {
        if &task.agent_id != agent_id {
            return Err(format!("Task uses invalid agent: {}", task.agent_id));
        }
        task.resources
            .validate()
            .map_err(|e| format!("Task uses invalid resources: {e}"))?;
        if task.resources.is_empty() {
            return Err("Task uses no resources".into());
        }
        if !remaining.contains(&task.resources) {
            return Err(format!(
                "Task uses more resources {} than available {remaining}",
                task.resources
            ));
        }
        if self
            .frameworks
            .get(framework_id)
            .is_some_and(|f| f.tasks.contains_key(&task.task_id))
        {
            return Err(format!("Task has duplicate ID: {}", task.task_id));
        }
        Ok(())
    }

    fn launch(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        task: TaskInfo,
        authorization: Authorization,
        user: &str,
        remaining: &mut Resources,
    ) {
        let pending = self
            .frameworks
            .get_mut(framework_id)
            .and_then(|f| f.pending_tasks.remove(&task.task_id));
        if pending.is_none() {
            tracing::debug!(
                framework_id = %framework_id,
                task_id = %task.task_id,
                "Task was killed before launch"
            );
            return;
        }

        let error = match authorization {
            Err(e) => Some(format!("Authorization failure: {e}")),
            Ok(false) => Some(format!("Not authorized to launch as user '{user}'")),
            Ok(true) => self
                .validate_task(framework_id, agent_id, &task, remaining)
                .err(),
        };
        if let Some(message) = error {
            self.send_status(
                framework_id,
                &task.task_id,
                Some(agent_id.clone()),
                TaskState::Error,
                message,
            );
            return;
        }

        *remaining -= &task.resources;

        let status = TaskStatus::new(task.task_id.clone(), TaskState::Staging)
            .with_agent(Some(agent_id.clone()));
        if let Some(framework) = self.frameworks.get_mut(framework_id) {
            framework.tasks.insert(
                task.task_id.clone(),
                Task {
                    info: task.clone(),
                    framework_id: framework_id.clone(),
                    state: TaskState::Staging,
                    statuses: vec![status],
                },
            );
        }

        let Some(agent) = self.agents.get_mut(agent_id) else {
            return;
        };
        agent
            .tasks
            .insert((framework_id.clone(), task.task_id.clone()));
        if let Some(executor_id) = &task.executor_id {
            agent
                .executors
                .insert((framework_id.clone(), executor_id.clone()));
        }

        tracing::info!(
            framework_id = %framework_id,
            agent_id = %agent_id,
            task_id = %task.task_id,
            "Launching task"
        );
        agent.send(AgentMessage::RunTask {
            framework_id: framework_id.clone(),
            task,
        });
    }

    // =========================================================================
    // Other calls
    // =========================================================================

    fn decline(&mut self, framework_id: &FrameworkId, decline: Decline) {
        let refuse = self.refuse_duration(decline.filters);

        for id in decline.offer_ids {
            let owned = self
                .offers
                .get(&id)
                .is_some_and(|offer| &offer.framework_id == framework_id);
            if owned {
                self.recover_offer(&id, refuse, false);
            } else if self.inverse_offers.contains_key(&id) {
                self.answer_inverse_offer(framework_id, &id, InverseOfferResponse::Decline);
            } else {
                tracing::warn!(framework_id = %framework_id, offer_id = %id, "Ignoring decline of unknown offer");
            }
        }
    }

    fn kill(&mut self, framework_id: &FrameworkId, kill: Kill) {
        let Some(framework) = self.frameworks.get_mut(framework_id) else {
            return;
        };

        if let Some(task) = framework.pending_tasks.remove(&kill.task_id) {
            self.send_status(
                framework_id,
                &kill.task_id,
                Some(task.agent_id),
                TaskState::Killed,
                "Killed pending task",
            );
            return;
        }

        if let Some(task) = framework.tasks.get(&kill.task_id) {
            let agent_id = task.info.agent_id.clone();
            if let Some(agent) = self.agents.get(&agent_id) {
                agent.send(AgentMessage::KillTask {
                    framework_id: framework_id.clone(),
                    task_id: kill.task_id,
                });
            }
            return;
        }

        self.send_status(
            framework_id,
            &kill.task_id,
            kill.agent_id,
            TaskState::Lost,
            "Attempted to kill an unknown task",
        );
    }

    fn shutdown_executor(&self, framework_id: &FrameworkId, shutdown: Shutdown) {
        let Some(agent) = self.agents.get(&shutdown.agent_id) else {
            tracing::warn!(
                framework_id = %framework_id,
                agent_id = %shutdown.agent_id,
                "Cannot shut down executor on unknown agent"
            );
            return;
        };
        agent.send(AgentMessage::ShutdownExecutor {
            framework_id: framework_id.clone(),
            executor_id: shutdown.executor_id,
        });
    }

    fn acknowledge(&self, framework_id: &FrameworkId, ack: Acknowledge) {
        let Some(agent) = self.agents.get(&ack.agent_id) else {
            tracing::warn!(
                framework_id = %framework_id,
                agent_id = %ack.agent_id,
                task_id = %ack.task_id,
                "Cannot forward acknowledgement to unknown agent"
            );
            return;
        };
        agent.send(AgentMessage::Acknowledge {
            framework_id: framework_id.clone(),
            task_id: ack.task_id,
            uuid: ack.uuid,
        });
    }

    fn framework_message(&self, framework_id: &FrameworkId, message: Message) {
        let Some(agent) = self.agents.get(&message.agent_id) else {
            tracing::warn!(
                framework_id = %framework_id,
                agent_id = %message.agent_id,
                "Cannot forward framework message to unknown agent"
            );
            return;
        };
        agent.send(AgentMessage::FrameworkMessage {
            framework_id: framework_id.clone(),
            executor_id: message.executor_id,
            data: message.data,
        });
    }

    /// Answer with the latest known state of the framework's tasks.
    ///
    /// An empty task list asks about every task. A task the master does not
    /// know is reported lost unless its agent is registered, in which case the
    /// agent owns the answer.
    fn reconcile(&mut self, framework_id: &FrameworkId, reconcile: &Reconcile) {
        let Some(framework) = self.frameworks.get(framework_id) else {
            return;
        };

        let staging = |task: &TaskInfo| {
            TaskStatus::new(task.task_id.clone(), TaskState::Staging)
                .with_agent(Some(task.agent_id.clone()))
        };

        let statuses: Vec<TaskStatus> = if reconcile.tasks.is_empty() {
            framework
                .pending_tasks
                .values()
                .map(staging)
                .chain(framework.tasks.values().map(Task::latest_status))
                .collect()
        } else {
            reconcile
                .tasks
                .iter()
                .filter_map(|query| {
                    if let Some(task) = framework.pending_tasks.get(&query.task_id) {
                        return Some(staging(task));
                    }
                    if let Some(task) = framework.tasks.get(&query.task_id) {
                        return Some(task.latest_status());
                    }
                    let agent_known = query
                        .agent_id
                        .as_ref()
                        .is_some_and(|id| self.agents.contains_key(id));
                    (!agent_known).then(|| {
                        TaskStatus::new(query.task_id.clone(), TaskState::Lost)
                            .with_agent(query.agent_id.clone())
                            .with_message("Reconciliation: Task is unknown")
                    })
                })
                .collect()
        };

        tracing::debug!(
            framework_id = %framework_id,
            statuses = statuses.len(),
            "Answering reconciliation"
        );

        for mut status in statuses {
            status.uuid = None;
            if status.message.is_none() {
                status.message = Some("Reconciliation: Latest task state".into());
            }
            self.send(framework_id, Event::Update { status });
        }
    }
}
