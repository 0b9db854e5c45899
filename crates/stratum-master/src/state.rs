//! The entity store.
//!
//! [`MasterState`] owns every framework, agent, offer, and machine the master
//! knows about. It is only ever touched from inside a coordinator turn, so
//! nothing here locks.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use stratum_core::task::now_seconds;
use stratum_core::{
    AgentId, ExecutorId, FrameworkId, MachineId, MachineInfo, MachineMode, OfferId, Resources,
    Schedule, TaskId, TaskInfo, TaskState, TaskStatus, Unavailability,
};
use stratum_store::Registry;
use tokio::sync::mpsc::{UnboundedSender, WeakUnboundedSender};

use crate::agent_link::{AgentLink, AgentMessage, AgentOutbox};
use crate::allocator::Allocator;
use crate::event::{Event, InverseOfferInfo, OfferInfo};
use crate::types::{FrameworkInfo, FrameworkSummary, MasterConfig, TaskSummary};

/// A unit of work executed by the coordinator with exclusive access to the state.
pub(crate) type Turn = Box<dyn FnOnce(&mut MasterState) + Send>;

/// An open event stream.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) id: u64,
    pub(crate) events: UnboundedSender<Event>,
}

#[derive(Debug)]
pub(crate) struct Framework {
    pub(crate) id: FrameworkId,
    pub(crate) info: FrameworkInfo,
    pub(crate) connection: Option<Connection>,
    pub(crate) active: bool,
    pub(crate) registered_time: f64,
    pub(crate) reregistered_time: Option<f64>,
    pub(crate) pending_tasks: BTreeMap<TaskId, TaskInfo>,
    pub(crate) tasks: BTreeMap<TaskId, Task>,
    pub(crate) completed_tasks: VecDeque<TaskSummary>,
    pub(crate) offers: BTreeSet<OfferId>,
    pub(crate) inverse_offers: BTreeSet<OfferId>,
    /// Bumped on every connect and disconnect; failover timers check it.
    pub(crate) epoch: u64,
}

impl Framework {
    pub(crate) const fn connected(&self) -> bool {
        self.connection.is_some()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Task {
    pub(crate) info: TaskInfo,
    pub(crate) framework_id: FrameworkId,
    pub(crate) state: TaskState,
    pub(crate) statuses: Vec<TaskStatus>,
}

impl Task {
    pub(crate) fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.info.task_id.clone(),
            name: self.info.name.clone(),
            framework_id: self.framework_id.clone(),
            slave_id: self.info.agent_id.clone(),
            executor_id: self.info.executor_id.clone(),
            state: self.state,
            resources: self.info.resources.clone(),
            statuses: self.statuses.clone(),
        }
    }

    pub(crate) fn latest_status(&self) -> TaskStatus {
        self.statuses.last().cloned().unwrap_or_else(|| {
            TaskStatus::new(self.info.task_id.clone(), self.state)
                .with_agent(Some(self.info.agent_id.clone()))
        })
    }
}

#[derive(Debug)]
pub(crate) struct Agent {
    pub(crate) id: AgentId,
    pub(crate) hostname: String,
    pub(crate) ip: Option<String>,
    pub(crate) endpoint: String,
    pub(crate) checkpoint: bool,
    pub(crate) machine: MachineId,
    pub(crate) registered_time: f64,
    pub(crate) total: Resources,
    pub(crate) checkpointed: Resources,
    pub(crate) offers: BTreeSet<OfferId>,
    pub(crate) inverse_offers: BTreeSet<OfferId>,
    pub(crate) tasks: BTreeSet<(FrameworkId, TaskId)>,
    pub(crate) executors: BTreeSet<(FrameworkId, ExecutorId)>,
    pub(crate) outbox: AgentOutbox,
}

impl Agent {
    pub(crate) fn send(&self, message: AgentMessage) {
        tracing::debug!(
            agent_id = %self.id,
            message = message.type_name(),
            "Queued message for agent"
        );
        self.outbox.send(message);
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Offer {
    pub(crate) id: OfferId,
    pub(crate) framework_id: FrameworkId,
    pub(crate) agent_id: AgentId,
    pub(crate) resources: Resources,
}

#[derive(Debug, Clone)]
pub(crate) struct InverseOffer {
    pub(crate) id: OfferId,
    pub(crate) framework_id: FrameworkId,
    pub(crate) agent_id: AgentId,
}

#[derive(Debug, Clone)]
pub(crate) struct Machine {
    pub(crate) info: MachineInfo,
    pub(crate) agents: BTreeSet<AgentId>,
}

/// The master's in-memory view of the cluster.
pub(crate) struct MasterState {
    pub(crate) config: MasterConfig,
    pub(crate) allocator: Arc<dyn Allocator>,
    pub(crate) agent_link: Arc<dyn AgentLink>,
    pub(crate) mailbox: WeakUnboundedSender<Turn>,
    pub(crate) frameworks: BTreeMap<FrameworkId, Framework>,
    pub(crate) completed_frameworks: VecDeque<FrameworkSummary>,
    pub(crate) agents: BTreeMap<AgentId, Agent>,
    pub(crate) offers: BTreeMap<OfferId, Offer>,
    pub(crate) inverse_offers: BTreeMap<OfferId, InverseOffer>,
    pub(crate) machines: BTreeMap<MachineId, Machine>,
    pub(crate) schedule: Option<Schedule>,
    next_connection: u64,
}

impl MasterState {
    pub(crate) fn new(
        config: MasterConfig,
        allocator: Arc<dyn Allocator>,
        agent_link: Arc<dyn AgentLink>,
        mailbox: WeakUnboundedSender<Turn>,
    ) -> Self {
        Self {
            config,
            allocator,
            agent_link,
            mailbox,
            frameworks: BTreeMap::new(),
            completed_frameworks: VecDeque::new(),
            agents: BTreeMap::new(),
            offers: BTreeMap::new(),
            inverse_offers: BTreeMap::new(),
            machines: BTreeMap::new(),
            schedule: None,
            next_connection: 0,
        }
    }

    /// Install the recovered maintenance registry.
    pub(crate) fn install_registry(&mut self, registry: Registry) {
        self.schedule = registry.schedule().cloned();

        let scheduled = self
            .schedule
            .as_ref()
            .map(Schedule::unavailabilities)
            .unwrap_or_default();
        for (id, unavailability) in scheduled {
            let machine = self.machine_mut(&id);
            machine.info.mode = MachineMode::Draining;
            machine.info.unavailability = Some(unavailability);
        }

        for info in registry.machines {
            let id = info.id.clone();
            self.machine_mut(&id).info = info;
        }

        tracing::info!(
            machines = self.machines.len(),
            scheduled = self.schedule.is_some(),
            "Recovered maintenance registry"
        );
    }

    pub(crate) fn next_connection_id(&mut self) -> u64 {
        self.next_connection += 1;
        self.next_connection
    }

    /// Run `turn` on the coordinator later, unless it has stopped.
    pub(crate) fn defer(&self, turn: impl FnOnce(&mut Self) + Send + 'static) {
        if let Some(mailbox) = self.mailbox.upgrade() {
            let _ = mailbox.send(Box::new(turn));
        }
    }

    pub(crate) fn machine_mut(&mut self, id: &MachineId) -> &mut Machine {
        self.machines.entry(id.clone()).or_insert_with(|| Machine {
            info: MachineInfo::up(id.clone()),
            agents: BTreeSet::new(),
        })
    }

    pub(crate) fn unavailability_of(&self, machine: &MachineId) -> Option<Unavailability> {
        self.machines
            .get(machine)
            .and_then(|m| m.info.unavailability)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Send an event on the framework's stream.
    ///
    /// A closed stream disconnects the framework.
    pub(crate) fn send(&mut self, framework_id: &FrameworkId, event: Event) {
        let Some(framework) = self.frameworks.get(framework_id) else {
            return;
        };
        let Some(connection) = &framework.connection else {
            tracing::debug!(
                framework_id = %framework_id,
                event = event.type_name(),
                "Dropping event for disconnected framework"
            );
            return;
        };

        if connection.events.send(event).is_err() {
            let connection_id = connection.id;
            self.disconnected(framework_id, connection_id);
        }
    }

    /// Send a status update that the master does not track, e.g. for a task
    /// it never launched.
    pub(crate) fn send_status(
        &mut self,
        framework_id: &FrameworkId,
        task_id: &TaskId,
        agent_id: Option<AgentId>,
        state: TaskState,
        message: impl Into<String>,
    ) {
        let status = TaskStatus::new(task_id.clone(), state)
            .with_agent(agent_id)
            .with_message(message);
        self.send(framework_id, Event::Update { status });
    }

    // =========================================================================
    // Offers
    // =========================================================================

    pub(crate) fn add_offer(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        resources: Resources,
    ) -> Option<OfferInfo> {
        let hostname = self.agents.get(agent_id)?.hostname.clone();
        let framework = self.frameworks.get_mut(framework_id)?;

        let id = OfferId::generate();
        framework.offers.insert(id.clone());
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.offers.insert(id.clone());
        }

        self.offers.insert(
            id.clone(),
            Offer {
                id: id.clone(),
                framework_id: framework_id.clone(),
                agent_id: agent_id.clone(),
                resources: resources.clone(),
            },
        );

        Some(OfferInfo {
            id,
            framework_id: framework_id.clone(),
            agent_id: agent_id.clone(),
            hostname,
            resources,
        })
    }

    /// Remove an offer from the store without touching the allocator.
    pub(crate) fn remove_offer(&mut self, offer_id: &OfferId, rescind: bool) -> Option<Offer> {
        let offer = self.offers.remove(offer_id)?;

        if let Some(framework) = self.frameworks.get_mut(&offer.framework_id) {
            framework.offers.remove(offer_id);
        }
        if let Some(agent) = self.agents.get_mut(&offer.agent_id) {
            agent.offers.remove(offer_id);
        }

        if rescind {
            self.send(
                &offer.framework_id,
                Event::Rescind {
                    offer_id: offer_id.clone(),
                },
            );
        }

        Some(offer)
    }

    /// Remove an offer and give its resources back to the allocator.
    pub(crate) fn recover_offer(
        &mut self,
        offer_id: &OfferId,
        refuse: Option<Duration>,
        rescind: bool,
    ) -> Option<Offer> {
        let offer = self.remove_offer(offer_id, rescind)?;
        self.allocator.recover_resources(
            &offer.framework_id,
            &offer.agent_id,
            &offer.resources,
            refuse,
        );
        Some(offer)
    }

    pub(crate) fn add_inverse_offer(
        &mut self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        unavailability: Unavailability,
    ) -> Option<InverseOfferInfo> {
        if !self.agents.contains_key(agent_id) {
            return None;
        }
        let framework = self.frameworks.get_mut(framework_id)?;

        let id = OfferId::generate();
        framework.inverse_offers.insert(id.clone());
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.inverse_offers.insert(id.clone());
        }

        self.inverse_offers.insert(
            id.clone(),
            InverseOffer {
                id: id.clone(),
                framework_id: framework_id.clone(),
                agent_id: agent_id.clone(),
            },
        );

        Some(InverseOfferInfo {
            id,
            framework_id: framework_id.clone(),
            agent_id: agent_id.clone(),
            unavailability,
        })
    }

    /// Remove an inverse offer. The allocator may send it again unless an
    /// answer is recorded afterwards.
    pub(crate) fn remove_inverse_offer(
        &mut self,
        offer_id: &OfferId,
        rescind: bool,
    ) -> Option<InverseOffer> {
        let offer = self.inverse_offers.remove(offer_id)?;

        if let Some(framework) = self.frameworks.get_mut(&offer.framework_id) {
            framework.inverse_offers.remove(offer_id);
        }
        if let Some(agent) = self.agents.get_mut(&offer.agent_id) {
            agent.inverse_offers.remove(offer_id);
        }

        self.allocator
            .update_inverse_offer(&offer.agent_id, &offer.framework_id, None);

        if rescind {
            self.send(
                &offer.framework_id,
                Event::Rescind {
                    offer_id: offer_id.clone(),
                },
            );
        }

        Some(offer)
    }

    /// Recover every offer and drop every inverse offer of a framework.
    pub(crate) fn recover_framework_offers(&mut self, framework_id: &FrameworkId, rescind: bool) {
        let Some(framework) = self.frameworks.get(framework_id) else {
            return;
        };
        let offers: Vec<OfferId> = framework.offers.iter().cloned().collect();
        let inverse_offers: Vec<OfferId> = framework.inverse_offers.iter().cloned().collect();

        for offer_id in offers {
            self.recover_offer(&offer_id, None, rescind);
        }
        for offer_id in inverse_offers {
            self.remove_inverse_offer(&offer_id, rescind);
        }
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    fn complete_task(&mut self, task: &Task) {
        let limit = self.config.max_completed_tasks_per_framework;
        if let Some(framework) = self.frameworks.get_mut(&task.framework_id) {
            framework.completed_tasks.push_back(task.summary());
            while framework.completed_tasks.len() > limit {
                framework.completed_tasks.pop_front();
            }
        }
    }

    /// Record a status update for a tracked task and forward it.
    ///
    /// Terminal updates move the task to the completed history and return its
    /// resources to the allocator.
    pub(crate) fn update_task(&mut self, framework_id: &FrameworkId, status: TaskStatus) {
        let Some(framework) = self.frameworks.get_mut(framework_id) else {
            tracing::warn!(
                framework_id = %framework_id,
                task_id = %status.task_id,
                "Ignoring status update for unknown framework"
            );
            return;
        };

        let terminal = status.state.is_terminal();
        let tracked = framework.tasks.get_mut(&status.task_id).map(|task| {
            task.state = status.state;
            task.statuses.push(status.clone());
            task.clone()
        });

        let Some(task) = tracked else {
            tracing::debug!(
                framework_id = %framework_id,
                task_id = %status.task_id,
                state = ?status.state,
                "Forwarding status update for untracked task"
            );
            self.send(framework_id, Event::Update { status });
            return;
        };

        if terminal {
            if let Some(framework) = self.frameworks.get_mut(framework_id) {
                framework.tasks.remove(&task.info.task_id);
            }
            if let Some(agent) = self.agents.get_mut(&task.info.agent_id) {
                agent
                    .tasks
                    .remove(&(framework_id.clone(), task.info.task_id.clone()));
            }
            self.allocator.recover_resources(
                framework_id,
                &task.info.agent_id,
                &task.info.resources,
                None,
            );
            self.complete_task(&task);
        }

        self.send(framework_id, Event::Update { status });
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Remove a framework: its stream is closed, its offers recovered, and its
    /// tasks killed.
    pub(crate) fn remove_framework(&mut self, framework_id: &FrameworkId) {
        if !self.frameworks.contains_key(framework_id) {
            return;
        }

        self.recover_framework_offers(framework_id, false);

        let Some(mut framework) = self.frameworks.remove(framework_id) else {
            return;
        };
        framework.connection = None;

        let mut agents = BTreeSet::new();
        for (task_id, task) in std::mem::take(&mut framework.tasks) {
            agents.insert(task.info.agent_id.clone());
            if let Some(agent) = self.agents.get_mut(&task.info.agent_id) {
                agent.tasks.remove(&(framework_id.clone(), task_id));
            }

            let status = TaskStatus::new(task.info.task_id.clone(), TaskState::Killed)
                .with_agent(Some(task.info.agent_id.clone()))
                .with_message("Framework removed");
            let mut task = task;
            task.state = TaskState::Killed;
            task.statuses.push(status);
            framework.completed_tasks.push_back(task.summary());
        }
        while framework.completed_tasks.len() > self.config.max_completed_tasks_per_framework {
            framework.completed_tasks.pop_front();
        }

        for agent in self.agents.values_mut() {
            let before = agent.executors.len();
            agent.executors.retain(|(id, _)| id != framework_id);
            if before != agent.executors.len() {
                agents.insert(agent.id.clone());
            }
        }

        for agent_id in agents {
            if let Some(agent) = self.agents.get(&agent_id) {
                agent.send(AgentMessage::ShutdownFramework {
                    framework_id: framework_id.clone(),
                });
            }
        }

        self.allocator.remove_framework(framework_id);

        let mut summary = self.framework_summary(&framework);
        summary.unregistered_time = Some(now_seconds());
        self.completed_frameworks.push_back(summary);
        while self.completed_frameworks.len() > self.config.max_completed_frameworks {
            self.completed_frameworks.pop_front();
        }

        tracing::info!(framework_id = %framework_id, name = %framework.info.name, "Removed framework");
    }

    /// Remove an agent: its offers are rescinded, its tasks lost, and every
    /// framework told about the failure.
    pub(crate) fn remove_agent(&mut self, agent_id: &AgentId, reason: &str) {
        let Some(agent) = self.agents.get(agent_id) else {
            return;
        };
        let offers: Vec<OfferId> = agent.offers.iter().cloned().collect();
        let inverse_offers: Vec<OfferId> = agent.inverse_offers.iter().cloned().collect();

        for offer_id in offers {
            self.remove_offer(&offer_id, true);
        }
        for offer_id in inverse_offers {
            self.remove_inverse_offer(&offer_id, true);
        }

        let Some(agent) = self.agents.remove(agent_id) else {
            return;
        };

        for (framework_id, task_id) in &agent.tasks {
            let Some(framework) = self.frameworks.get_mut(framework_id) else {
                continue;
            };
            let Some(mut task) = framework.tasks.remove(task_id) else {
                continue;
            };

            let status = TaskStatus::new(task_id.clone(), TaskState::Lost)
                .with_agent(Some(agent_id.clone()))
                .with_message(reason);
            task.state = TaskState::Lost;
            task.statuses.push(status.clone());
            self.complete_task(&task);
            self.send(framework_id, Event::Update { status });
        }

        let connected: Vec<FrameworkId> = self
            .frameworks
            .values()
            .filter(|f| f.connected())
            .map(|f| f.id.clone())
            .collect();
        for framework_id in connected {
            self.send(
                &framework_id,
                Event::Failure {
                    agent_id: Some(agent_id.clone()),
                    executor_id: None,
                },
            );
        }

        if let Some(machine) = self.machines.get_mut(&agent.machine) {
            machine.agents.remove(agent_id);
        }

        self.allocator.remove_agent(agent_id);

        tracing::info!(agent_id = %agent_id, hostname = %agent.hostname, reason, "Removed agent");
    }
}
