//! Read-only views of the cluster.

use std::collections::BTreeSet;

use stratum_core::{FrameworkId, Resources};

use crate::coordinator::Master;
use crate::error::Result;
use crate::event::OfferInfo;
use crate::state::{Agent, Framework, MasterState};
use crate::types::{
    AgentSummary, FrameworkSummary, FrameworksSnapshot, TaskOrder, TaskQuery, TaskSummary,
};

impl MasterState {
    pub(crate) fn framework_summary(&self, framework: &Framework) -> FrameworkSummary {
        let mut offered_resources = Resources::default();
        let mut offers = Vec::with_capacity(framework.offers.len());
        for offer in framework.offers.iter().filter_map(|id| self.offers.get(id)) {
            offered_resources += &offer.resources;
            offers.push(OfferInfo {
                id: offer.id.clone(),
                framework_id: offer.framework_id.clone(),
                agent_id: offer.agent_id.clone(),
                hostname: self
                    .agents
                    .get(&offer.agent_id)
                    .map(|a| a.hostname.clone())
                    .unwrap_or_default(),
                resources: offer.resources.clone(),
            });
        }

        let mut used_resources = Resources::default();
        for task in framework.tasks.values() {
            used_resources += &task.info.resources;
        }

        FrameworkSummary {
            id: framework.id.clone(),
            name: framework.info.name.clone(),
            user: framework.info.user.clone(),
            principal: framework.info.principal.clone(),
            role: framework.info.role.clone(),
            active: framework.active,
            connected: framework.connected(),
            failover_timeout: framework.info.failover_timeout,
            registered_time: framework.registered_time,
            reregistered_time: framework.reregistered_time,
            unregistered_time: None,
            offered_resources,
            used_resources,
            offers,
            tasks: framework.tasks.values().map(|t| t.summary()).collect(),
            completed_tasks: framework.completed_tasks.iter().cloned().collect(),
        }
    }

    fn agent_summary(&self, agent: &Agent) -> AgentSummary {
        let mut used_resources = Resources::default();
        for (framework_id, task_id) in &agent.tasks {
            if let Some(task) = self
                .frameworks
                .get(framework_id)
                .and_then(|f| f.tasks.get(task_id))
            {
                used_resources += &task.info.resources;
            }
        }

        let mut offered_resources = Resources::default();
        for offer in agent.offers.iter().filter_map(|id| self.offers.get(id)) {
            offered_resources += &offer.resources;
        }

        AgentSummary {
            id: agent.id.clone(),
            hostname: agent.hostname.clone(),
            ip: agent.ip.clone(),
            endpoint: agent.endpoint.clone(),
            checkpoint: agent.checkpoint,
            registered_time: agent.registered_time,
            resources: agent.total.clone(),
            used_resources,
            offered_resources,
            checkpointed_resources: agent.checkpointed.clone(),
        }
    }

    fn frameworks_snapshot(&self) -> FrameworksSnapshot {
        let unregistered: BTreeSet<FrameworkId> = self
            .agents
            .values()
            .flat_map(|a| {
                a.tasks
                    .iter()
                    .map(|(id, _)| id)
                    .chain(a.executors.iter().map(|(id, _)| id))
            })
            .filter(|id| !self.frameworks.contains_key(id))
            .cloned()
            .collect();

        FrameworksSnapshot {
            frameworks: self
                .frameworks
                .values()
                .map(|f| self.framework_summary(f))
                .collect(),
            completed_frameworks: self.completed_frameworks.iter().cloned().collect(),
            unregistered_frameworks: unregistered.into_iter().collect(),
        }
    }

    fn tasks(&self, query: TaskQuery) -> Vec<TaskSummary> {
        let mut tasks: Vec<TaskSummary> = Vec::new();
        for framework in self.frameworks.values() {
            tasks.extend(framework.tasks.values().map(|t| t.summary()));
            tasks.extend(framework.completed_tasks.iter().cloned());
        }
        for framework in &self.completed_frameworks {
            tasks.extend(framework.tasks.iter().cloned());
            tasks.extend(framework.completed_tasks.iter().cloned());
        }

        tasks.sort_by(|a, b| a.started_at().total_cmp(&b.started_at()));
        if query.order == TaskOrder::Desc {
            tasks.reverse();
        }

        tasks
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect()
    }
}

impl Master {
    /// Registered, completed, and unregistered frameworks.
    ///
    /// # Errors
    ///
    /// Returns `MasterError::Stopped` if the coordinator is gone.
    pub async fn frameworks(&self) -> Result<FrameworksSnapshot> {
        self.dispatch(|state| state.frameworks_snapshot()).await
    }

    /// Registered agents.
    ///
    /// # Errors
    ///
    /// Returns `MasterError::Stopped` if the coordinator is gone.
    pub async fn agents(&self) -> Result<Vec<AgentSummary>> {
        self.dispatch(|state| {
            state
                .agents
                .values()
                .map(|a| state.agent_summary(a))
                .collect()
        })
        .await
    }

    /// Active and completed tasks, ordered by the time of their first status.
    ///
    /// # Errors
    ///
    /// Returns `MasterError::Stopped` if the coordinator is gone.
    pub async fn tasks(&self, query: TaskQuery) -> Result<Vec<TaskSummary>> {
        self.dispatch(move |state| state.tasks(query)).await
    }
}

#[cfg(test)]
mod tests {
    use stratum_core::{Resource, TaskId, TaskState, TaskStatus};

    use super::*;
    use crate::testing::Harness;
    use crate::types::StatusUpdate;

    fn cpus(value: f64) -> Resources {
        vec![Resource::scalar("cpus", value)].into()
    }

    #[tokio::test]
    async fn agent_summary_tracks_usage() {
        let harness = Harness::start().await;
        let agent = harness.agent("host1", cpus(4.0), false).await;
        let (_framework_id, _events) = harness.launch_task("t1", &agent, cpus(1.0)).await;

        let summary = harness.agent_summary(&agent).await;
        assert_eq!(summary.hostname, "host1");
        assert!((summary.resources.scalar("cpus") - 4.0).abs() < f64::EPSILON);
        assert!((summary.used_resources.scalar("cpus") - 1.0).abs() < f64::EPSILON);
        assert!(summary.offered_resources.is_empty());
    }

    #[tokio::test]
    async fn framework_summary_lists_offers() {
        let harness = Harness::start().await;
        harness.agent("host1", cpus(2.0), false).await;
        let (framework_id, _events) = harness.subscribe("web").await;
        harness.master.allocate().await.unwrap();

        let snapshot = harness.master.frameworks().await.unwrap();
        assert_eq!(snapshot.frameworks.len(), 1);
        let framework = &snapshot.frameworks[0];
        assert_eq!(framework.id, framework_id);
        assert!(framework.active);
        assert!(framework.connected);
        assert_eq!(framework.offers.len(), 1);
        assert_eq!(framework.offers[0].hostname, "host1");
        assert!((framework.offered_resources.scalar("cpus") - 2.0).abs() < f64::EPSILON);
        assert!(snapshot.unregistered_frameworks.is_empty());
    }

    #[tokio::test]
    async fn removed_framework_is_completed() {
        let harness = Harness::start().await;
        let (framework_id, _events) = harness.subscribe("web").await;
        harness.master.teardown(None, &framework_id).await.unwrap();

        let snapshot = harness.master.frameworks().await.unwrap();
        assert!(snapshot.frameworks.is_empty());
        assert_eq!(snapshot.completed_frameworks.len(), 1);
        assert!(snapshot.completed_frameworks[0].unregistered_time.is_some());
    }

    #[tokio::test]
    async fn tasks_are_paginated() {
        let harness = Harness::start().await;
        let agent = harness.agent("host1", cpus(4.0), false).await;
        let (framework_id, _events) = harness.launch_task("t1", &agent, cpus(1.0)).await;
        let (_other, _other_events) = harness.launch_task("t2", &agent, cpus(1.0)).await;

        harness
            .master
            .status_update(StatusUpdate {
                framework_id,
                status: TaskStatus::new(TaskId::new("t1").unwrap(), TaskState::Finished)
                    .with_agent(Some(agent.clone())),
            })
            .await
            .unwrap();

        let all = harness.master.tasks(TaskQuery::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].started_at() <= all[1].started_at());

        let desc = harness
            .master
            .tasks(TaskQuery {
                order: TaskOrder::Desc,
                ..TaskQuery::default()
            })
            .await
            .unwrap();
        assert!(desc[0].started_at() >= desc[1].started_at());

        let page = harness
            .master
            .tasks(TaskQuery {
                limit: 1,
                offset: 1,
                order: TaskOrder::Asc,
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, all[1].id);
    }
}
