//! A master wired to in-memory collaborators, for tests.

use std::sync::Arc;
use std::time::Duration;

use stratum_auth::Authorizer;
use stratum_core::{AgentId, FrameworkId, Operation, Resources, TaskId, TaskInfo, DEFAULT_ROLE};
use stratum_store::{MemoryRegistrar, Registrar};

use crate::agent_link::{AgentMessage, RecordingAgentLink};
use crate::allocator::LocalAllocator;
use crate::call::{Accept, FrameworkCall};
use crate::coordinator::{Collaborators, Master};
use crate::error::Result;
use crate::event::Event;
use crate::frameworks::Subscription;
use crate::types::{AgentRegistration, AgentSummary, Filters, FrameworkInfo, MasterConfig};

pub(crate) fn framework_info(name: &str) -> FrameworkInfo {
    FrameworkInfo {
        id: None,
        name: name.into(),
        user: "nobody".into(),
        principal: None,
        role: DEFAULT_ROLE.into(),
        failover_timeout: 0.0,
        checkpoint: false,
        hostname: None,
    }
}

pub(crate) struct Harness {
    pub(crate) master: Master,
    pub(crate) link: Arc<RecordingAgentLink>,
}

impl Harness {
    pub(crate) async fn start() -> Self {
        Self::build(Arc::new(MemoryRegistrar::new()), None).await
    }

    pub(crate) async fn with_authorizer(authorizer: Arc<dyn Authorizer>) -> Self {
        Self::build(Arc::new(MemoryRegistrar::new()), Some(authorizer)).await
    }

    pub(crate) async fn with_registrar(registrar: Arc<dyn Registrar>) -> Self {
        Self::build(registrar, None).await
    }

    async fn build(
        registrar: Arc<dyn Registrar>,
        authorizer: Option<Arc<dyn Authorizer>>,
    ) -> Self {
        let link = Arc::new(RecordingAgentLink::new());
        let config = MasterConfig {
            heartbeat_interval: None,
            allocation_interval: None,
            ..MasterConfig::default()
        };

        let master = Master::start(
            config,
            Collaborators {
                allocator: Arc::new(LocalAllocator::new()),
                registrar,
                agent_link: link.clone(),
                authorizer,
            },
        );
        master.recover().await.unwrap();

        Self { master, link }
    }

    pub(crate) async fn agent_registration(
        &self,
        hostname: &str,
        resources: Resources,
    ) -> Result<AgentId> {
        self.master
            .register_agent(AgentRegistration {
                id: None,
                hostname: hostname.into(),
                ip: None,
                endpoint: "http://agent".into(),
                checkpoint: false,
                resources,
            })
            .await
    }

    pub(crate) async fn agent(
        &self,
        hostname: &str,
        resources: Resources,
        checkpoint: bool,
    ) -> AgentId {
        self.master
            .register_agent(AgentRegistration {
                id: None,
                hostname: hostname.into(),
                ip: None,
                endpoint: "http://agent".into(),
                checkpoint,
                resources,
            })
            .await
            .unwrap()
    }

    pub(crate) async fn agent_summary(&self, agent_id: &AgentId) -> AgentSummary {
        self.master
            .agents()
            .await
            .unwrap()
            .into_iter()
            .find(|a| &a.id == agent_id)
            .unwrap()
    }

    /// Subscribe a framework and consume its SUBSCRIBED event.
    pub(crate) async fn subscribe(&self, name: &str) -> (FrameworkId, Subscription) {
        let mut subscription = self.master.subscribe(framework_info(name)).await.unwrap();
        match subscription.next().await {
            Some(Event::Subscribed { framework_id, .. }) => (framework_id, subscription),
            other => panic!("expected SUBSCRIBED, got {other:?}"),
        }
    }

    /// Wait until the agent has been sent a matching message.
    pub(crate) async fn wait_for_message(
        &self,
        agent_id: &AgentId,
        predicate: impl Fn(&AgentMessage) -> bool,
    ) -> AgentMessage {
        for _ in 0..200 {
            if let Some(message) = self.link.sent_to(agent_id).into_iter().find(&predicate) {
                return message;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no matching message sent to agent {agent_id}");
    }

    /// Subscribe a new framework and launch one task on the agent.
    ///
    /// Unused resources are refused for an hour so later frameworks get them.
    pub(crate) async fn launch_task(
        &self,
        task_id: &str,
        agent_id: &AgentId,
        resources: Resources,
    ) -> (FrameworkId, Subscription) {
        let (framework_id, mut subscription) = self.subscribe(task_id).await;

        self.master.allocate().await.unwrap();
        let offer = match subscription.next().await {
            Some(Event::Offers { offers, .. }) => offers
                .into_iter()
                .find(|o| &o.agent_id == agent_id)
                .unwrap(),
            other => panic!("expected offers, got {other:?}"),
        };

        let task = TaskInfo {
            name: task_id.into(),
            task_id: TaskId::new(task_id).unwrap(),
            agent_id: agent_id.clone(),
            resources,
            executor_id: None,
            command: Some("sleep 100".into()),
            data: None,
        };
        self.master
            .call(
                framework_id.clone(),
                FrameworkCall::Accept(Accept {
                    offer_ids: vec![offer.id],
                    operations: vec![Operation::Launch {
                        task_infos: vec![task],
                    }],
                    filters: Some(Filters::refuse(3600.0)),
                }),
            )
            .await
            .unwrap();

        let expected = TaskId::new(task_id).unwrap();
        self.wait_for_message(agent_id, |m| {
            matches!(m, AgentMessage::RunTask { task, .. } if task.task_id == expected)
        })
        .await;

        (framework_id, subscription)
    }
}
