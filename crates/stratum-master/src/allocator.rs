//! Allocator seam.
//!
//! The master tells the allocator about frameworks, agents, and resources
//! coming back from offers and tasks. The allocator decides who is offered
//! what. [`LocalAllocator`] is a simple in-process implementation that hands
//! each agent's available resources to one framework per round, rotating
//! through frameworks.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use stratum_core::task::now_seconds;
use stratum_core::{
    AgentId, FrameworkId, InverseOfferResponse, InverseOfferStatus, Operation, Resources,
    Unavailability, DEFAULT_ROLE,
};

use crate::call::ResourceRequest;
use crate::error::{MasterError, Result};

/// The result of one allocation round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocation {
    /// Resources to offer, per framework and agent.
    pub offers: Vec<(FrameworkId, AgentId, Resources)>,
    /// Agents each framework is asked to vacate.
    pub inverse_offers: Vec<(FrameworkId, AgentId, Unavailability)>,
}

impl Allocation {
    /// Whether the round produced nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offers.is_empty() && self.inverse_offers.is_empty()
    }
}

/// Trait for resource allocation.
///
/// Notifications are synchronous and cheap; they are called while the master
/// holds its state. Queries that may take time are async and are awaited
/// between master turns.
#[async_trait]
pub trait Allocator: Send + Sync {
    /// A framework subscribed.
    fn add_framework(&self, framework_id: &FrameworkId, role: &str);

    /// A framework was removed; its allocations are dropped.
    fn remove_framework(&self, framework_id: &FrameworkId);

    /// A framework (re)connected and may receive offers.
    fn activate_framework(&self, framework_id: &FrameworkId);

    /// A framework disconnected and must not receive offers.
    fn deactivate_framework(&self, framework_id: &FrameworkId);

    /// An agent joined with the given total resources.
    fn add_agent(
        &self,
        agent_id: &AgentId,
        total: &Resources,
        unavailability: Option<Unavailability>,
    );

    /// An agent left.
    fn remove_agent(&self, agent_id: &AgentId);

    /// The agent's machine got a new maintenance window, or lost it.
    fn update_unavailability(&self, agent_id: &AgentId, unavailability: Option<Unavailability>);

    /// A framework applied operations to resources it was offered.
    fn update_allocation(
        &self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        operations: &[Operation],
    );

    /// Resources allocated to a framework are no longer used by it.
    ///
    /// With `refuse`, the framework is not offered anything on the agent for
    /// that long.
    fn recover_resources(
        &self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        resources: &Resources,
        refuse: Option<Duration>,
    );

    /// A framework asked for resources.
    fn request_resources(&self, framework_id: &FrameworkId, requests: &[ResourceRequest]);

    /// Stop sending offers to the framework.
    fn suppress_offers(&self, framework_id: &FrameworkId);

    /// Resume offers to the framework and clear its refusal filters.
    fn revive_offers(&self, framework_id: &FrameworkId);

    /// Record a framework's answer to an inverse offer.
    ///
    /// `None` withdraws the inverse offer without an answer, so it may be
    /// sent again.
    fn update_inverse_offer(
        &self,
        agent_id: &AgentId,
        framework_id: &FrameworkId,
        response: Option<InverseOfferResponse>,
    );

    /// Apply operations to the agent's unallocated resources.
    ///
    /// # Errors
    ///
    /// Returns `MasterError::Conflict` if the unallocated resources do not
    /// hold what the operations consume.
    async fn update_available(&self, agent_id: &AgentId, operations: &[Operation]) -> Result<()>;

    /// Inverse offer answers per agent, for agents with a maintenance window.
    async fn inverse_offer_statuses(&self) -> BTreeMap<AgentId, Vec<InverseOfferStatus>>;

    /// Run one allocation round.
    async fn allocate(&self) -> Allocation;
}

// =============================================================================
// Local allocator
// =============================================================================

#[derive(Debug)]
struct AgentSlot {
    total: Resources,
    allocated: BTreeMap<FrameworkId, Resources>,
    unavailability: Option<Unavailability>,
    statuses: BTreeMap<FrameworkId, InverseOfferStatus>,
    outstanding: BTreeSet<FrameworkId>,
}

impl AgentSlot {
    fn available(&self) -> Resources {
        let mut available = self.total.clone();
        for allocated in self.allocated.values() {
            available -= allocated;
        }
        available
    }
}

#[derive(Debug)]
struct FrameworkSlot {
    role: String,
    active: bool,
    suppressed: bool,
    refusals: BTreeMap<AgentId, Instant>,
}

impl FrameworkSlot {
    fn accepts(&self, agent_id: &AgentId, now: Instant) -> bool {
        self.active
            && !self.suppressed
            && self.refusals.get(agent_id).map_or(true, |until| *until <= now)
    }

    fn offerable(&self, available: &Resources) -> Resources {
        available.filter(|r| r.role == DEFAULT_ROLE || r.role == self.role)
    }
}

#[derive(Debug, Default)]
struct Inner {
    agents: BTreeMap<AgentId, AgentSlot>,
    frameworks: BTreeMap<FrameworkId, FrameworkSlot>,
    cursor: usize,
}

/// In-process round-robin allocator.
#[derive(Debug, Default)]
pub struct LocalAllocator {
    inner: Mutex<Inner>,
}

impl LocalAllocator {
    /// Create an allocator with no agents or frameworks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_all(resources: &Resources, operations: &[Operation]) -> stratum_core::Result<Resources> {
        operations
            .iter()
            .try_fold(resources.clone(), |acc, operation| acc.apply(operation))
    }
}

#[async_trait]
impl Allocator for LocalAllocator {
    fn add_framework(&self, framework_id: &FrameworkId, role: &str) {
        let mut inner = self.inner.lock();
        inner
            .frameworks
            .entry(framework_id.clone())
            .or_insert_with(|| FrameworkSlot {
                role: role.to_string(),
                active: true,
                suppressed: false,
                refusals: BTreeMap::new(),
            });
        tracing::debug!(framework_id = %framework_id, role, "Added framework to allocator");
    }

    fn remove_framework(&self, framework_id: &FrameworkId) {
        let mut inner = self.inner.lock();
        inner.frameworks.remove(framework_id);
        for agent in inner.agents.values_mut() {
            agent.allocated.remove(framework_id);
            agent.statuses.remove(framework_id);
            agent.outstanding.remove(framework_id);
        }
    }

    fn activate_framework(&self, framework_id: &FrameworkId) {
        if let Some(framework) = self.inner.lock().frameworks.get_mut(framework_id) {
            framework.active = true;
        }
    }

    fn deactivate_framework(&self, framework_id: &FrameworkId) {
        if let Some(framework) = self.inner.lock().frameworks.get_mut(framework_id) {
            framework.active = false;
        }
    }

    fn add_agent(
        &self,
        agent_id: &AgentId,
        total: &Resources,
        unavailability: Option<Unavailability>,
    ) {
        self.inner.lock().agents.insert(
            agent_id.clone(),
            AgentSlot {
                total: total.clone(),
                allocated: BTreeMap::new(),
                unavailability,
                statuses: BTreeMap::new(),
                outstanding: BTreeSet::new(),
            },
        );
        tracing::debug!(agent_id = %agent_id, resources = %total, "Added agent to allocator");
    }

    fn remove_agent(&self, agent_id: &AgentId) {
        let mut inner = self.inner.lock();
        inner.agents.remove(agent_id);
        for framework in inner.frameworks.values_mut() {
            framework.refusals.remove(agent_id);
        }
    }

    fn update_unavailability(&self, agent_id: &AgentId, unavailability: Option<Unavailability>) {
        if let Some(agent) = self.inner.lock().agents.get_mut(agent_id) {
            agent.unavailability = unavailability;
            agent.statuses.clear();
            agent.outstanding.clear();
        }
    }

    fn update_allocation(
        &self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        operations: &[Operation],
    ) {
        let mut inner = self.inner.lock();
        let Some(agent) = inner.agents.get_mut(agent_id) else {
            return;
        };
        let Some(allocated) = agent.allocated.get(framework_id) else {
            return;
        };

        match (
            Self::apply_all(allocated, operations),
            Self::apply_all(&agent.total, operations),
        ) {
            (Ok(allocated), Ok(total)) => {
                agent.allocated.insert(framework_id.clone(), allocated);
                agent.total = total;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(
                    framework_id = %framework_id,
                    agent_id = %agent_id,
                    error = %e,
                    "Failed to update allocation"
                );
            }
        }
    }

    fn recover_resources(
        &self,
        framework_id: &FrameworkId,
        agent_id: &AgentId,
        resources: &Resources,
        refuse: Option<Duration>,
    ) {
        let mut inner = self.inner.lock();

        if let Some(agent) = inner.agents.get_mut(agent_id) {
            if let Some(allocated) = agent.allocated.get_mut(framework_id) {
                *allocated -= resources;
                if allocated.is_empty() {
                    agent.allocated.remove(framework_id);
                }
            }
        }

        if let (Some(refuse), Some(framework)) = (refuse, inner.frameworks.get_mut(framework_id)) {
            if let Some(until) = Instant::now().checked_add(refuse) {
                if !refuse.is_zero() {
                    framework.refusals.insert(agent_id.clone(), until);
                }
            }
        }
    }

    fn request_resources(&self, framework_id: &FrameworkId, requests: &[ResourceRequest]) {
        tracing::debug!(
            framework_id = %framework_id,
            requests = requests.len(),
            "Ignoring resource requests"
        );
    }

    fn suppress_offers(&self, framework_id: &FrameworkId) {
        if let Some(framework) = self.inner.lock().frameworks.get_mut(framework_id) {
            framework.suppressed = true;
        }
    }

    fn revive_offers(&self, framework_id: &FrameworkId) {
        if let Some(framework) = self.inner.lock().frameworks.get_mut(framework_id) {
            framework.suppressed = false;
            framework.refusals.clear();
        }
    }

    fn update_inverse_offer(
        &self,
        agent_id: &AgentId,
        framework_id: &FrameworkId,
        response: Option<InverseOfferResponse>,
    ) {
        let mut inner = self.inner.lock();
        let Some(agent) = inner.agents.get_mut(agent_id) else {
            return;
        };

        agent.outstanding.remove(framework_id);
        if let Some(status) = response {
            agent.statuses.insert(
                framework_id.clone(),
                InverseOfferStatus {
                    status,
                    framework_id: framework_id.clone(),
                    timestamp: now_seconds(),
                },
            );
        }
    }

    async fn update_available(&self, agent_id: &AgentId, operations: &[Operation]) -> Result<()> {
        let mut inner = self.inner.lock();
        let agent = inner
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| MasterError::AgentNotFound(agent_id.clone()))?;

        Self::apply_all(&agent.available(), operations)
            .map_err(|e| MasterError::Conflict(e.to_string()))?;
        agent.total = Self::apply_all(&agent.total, operations)
            .map_err(|e| MasterError::Conflict(e.to_string()))?;

        Ok(())
    }

    async fn inverse_offer_statuses(&self) -> BTreeMap<AgentId, Vec<InverseOfferStatus>> {
        self.inner
            .lock()
            .agents
            .iter()
            .filter(|(_, agent)| agent.unavailability.is_some())
            .map(|(id, agent)| (id.clone(), agent.statuses.values().cloned().collect()))
            .collect()
    }

    async fn allocate(&self) -> Allocation {
        let mut inner = self.inner.lock();
        let Inner {
            agents,
            frameworks,
            cursor,
        } = &mut *inner;

        let now = Instant::now();
        let mut allocation = Allocation::default();

        for framework in frameworks.values_mut() {
            framework.refusals.retain(|_, until| *until > now);
        }

        let order: Vec<FrameworkId> = frameworks.keys().cloned().collect();
        if !order.is_empty() {
            for (index, (agent_id, agent)) in agents.iter_mut().enumerate() {
                let available = agent.available();
                if available.is_empty() {
                    continue;
                }

                for step in 0..order.len() {
                    let framework_id = &order[(*cursor + index + step) % order.len()];
                    let Some(framework) = frameworks.get(framework_id) else {
                        continue;
                    };
                    if !framework.accepts(agent_id, now) {
                        continue;
                    }

                    let offerable = framework.offerable(&available);
                    if offerable.is_empty() {
                        continue;
                    }

                    *agent
                        .allocated
                        .entry(framework_id.clone())
                        .or_default() += &offerable;
                    allocation
                        .offers
                        .push((framework_id.clone(), agent_id.clone(), offerable));
                    break;
                }
            }
            *cursor = cursor.wrapping_add(1);
        }

        for (agent_id, agent) in agents.iter_mut() {
            let Some(unavailability) = agent.unavailability else {
                continue;
            };

            let pending: Vec<FrameworkId> = agent
                .allocated
                .keys()
                .filter(|id| {
                    !agent.statuses.contains_key(*id)
                        && !agent.outstanding.contains(*id)
                        && frameworks.get(*id).is_some_and(|f| f.active)
                })
                .cloned()
                .collect();

            for framework_id in pending {
                agent.outstanding.insert(framework_id.clone());
                allocation
                    .inverse_offers
                    .push((framework_id, agent_id.clone(), unavailability));
            }
        }

        allocation
    }
}

#[cfg(test)]
mod tests {
    use stratum_core::Resource;

    use super::*;

    fn fid(id: &str) -> FrameworkId {
        FrameworkId::new(id).unwrap()
    }

    fn aid(id: &str) -> AgentId {
        AgentId::new(id).unwrap()
    }

    fn total() -> Resources {
        Resources::from(vec![
            Resource::scalar("cpus", 4.0),
            Resource::scalar("mem", 1024.0),
        ])
    }

    #[tokio::test]
    async fn offers_available_resources() {
        let allocator = LocalAllocator::new();
        allocator.add_agent(&aid("a1"), &total(), None);
        allocator.add_framework(&fid("f1"), "*");

        let allocation = allocator.allocate().await;
        assert_eq!(allocation.offers.len(), 1);
        assert_eq!(allocation.offers[0].2, total());

        // Everything is allocated now.
        assert!(allocator.allocate().await.is_empty());
    }

    #[tokio::test]
    async fn recovered_resources_are_reoffered() {
        let allocator = LocalAllocator::new();
        allocator.add_agent(&aid("a1"), &total(), None);
        allocator.add_framework(&fid("f1"), "*");

        let allocation = allocator.allocate().await;
        let (framework_id, agent_id, resources) = &allocation.offers[0];
        allocator.recover_resources(framework_id, agent_id, resources, None);

        assert_eq!(allocator.allocate().await.offers.len(), 1);
    }

    #[tokio::test]
    async fn refusal_filter_and_revive() {
        let allocator = LocalAllocator::new();
        allocator.add_agent(&aid("a1"), &total(), None);
        allocator.add_framework(&fid("f1"), "*");

        let allocation = allocator.allocate().await;
        allocator.recover_resources(
            &fid("f1"),
            &aid("a1"),
            &allocation.offers[0].2,
            Some(Duration::from_secs(60)),
        );
        assert!(allocator.allocate().await.is_empty());

        allocator.revive_offers(&fid("f1"));
        assert_eq!(allocator.allocate().await.offers.len(), 1);
    }

    #[tokio::test]
    async fn suppressed_and_inactive_frameworks_get_nothing() {
        let allocator = LocalAllocator::new();
        allocator.add_agent(&aid("a1"), &total(), None);
        allocator.add_framework(&fid("f1"), "*");
        allocator.add_framework(&fid("f2"), "*");

        allocator.suppress_offers(&fid("f1"));
        allocator.deactivate_framework(&fid("f2"));
        assert!(allocator.allocate().await.is_empty());

        allocator.activate_framework(&fid("f2"));
        let allocation = allocator.allocate().await;
        assert_eq!(allocation.offers[0].0, fid("f2"));
    }

    #[tokio::test]
    async fn reserved_resources_go_to_their_role() {
        let allocator = LocalAllocator::new();
        let resources = Resources::from(vec![
            Resource::scalar("cpus", 2.0).reserved("db", Some("ops")),
        ]);
        allocator.add_agent(&aid("a1"), &resources, None);
        allocator.add_framework(&fid("f1"), "web");
        assert!(allocator.allocate().await.is_empty());

        allocator.add_framework(&fid("f2"), "db");
        let allocation = allocator.allocate().await;
        assert_eq!(allocation.offers[0].0, fid("f2"));
    }

    #[tokio::test]
    async fn update_available_conflicts_with_allocations() {
        let allocator = LocalAllocator::new();
        allocator.add_agent(&aid("a1"), &total(), None);
        allocator.add_framework(&fid("f1"), "*");
        allocator.allocate().await;

        let reserve = Operation::Reserve {
            resources: Resources::from(vec![
                Resource::scalar("cpus", 1.0).reserved("web", Some("ops")),
            ]),
        };
        let err = allocator
            .update_available(&aid("a1"), std::slice::from_ref(&reserve))
            .await
            .unwrap_err();
        assert_eq!(err.http_status_code(), 409);

        allocator.recover_resources(&fid("f1"), &aid("a1"), &total(), None);
        allocator
            .update_available(&aid("a1"), &[reserve])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn inverse_offers_for_unavailable_agents() {
        let allocator = LocalAllocator::new();
        allocator.add_agent(&aid("a1"), &total(), None);
        allocator.add_framework(&fid("f1"), "*");
        allocator.allocate().await;

        let window = Unavailability::new(1_000, None);
        allocator.update_unavailability(&aid("a1"), Some(window));

        let allocation = allocator.allocate().await;
        assert_eq!(allocation.inverse_offers, vec![(fid("f1"), aid("a1"), window)]);

        // Outstanding inverse offers are not repeated.
        assert!(allocator.allocate().await.inverse_offers.is_empty());

        allocator.update_inverse_offer(&aid("a1"), &fid("f1"), Some(InverseOfferResponse::Accept));
        let statuses = allocator.inverse_offer_statuses().await;
        assert_eq!(statuses[&aid("a1")].len(), 1);
        assert_eq!(statuses[&aid("a1")][0].status, InverseOfferResponse::Accept);

        allocator.update_unavailability(&aid("a1"), None);
        assert!(allocator.inverse_offer_statuses().await.is_empty());
    }
}
