//! The master handle and its coordinator task.
//!
//! Every mutation of the entity store runs as a *turn*: a closure sent
//! through the coordinator's mailbox and executed with exclusive access to
//! [`MasterState`]. Requests that need the allocator, the registrar, or the
//! authorizer await them between turns and re-enter through another turn.
//!
//! ```text
//!   request ──▶ turn ──▶ (await allocator / registrar / authorizer) ──▶ turn ──▶ reply
//!                 │                                                     │
//!                 ▼                                                     ▼
//!           ┌──────────────────────── coordinator ──────────────────────────┐
//!           │                MasterState (frameworks, agents,               │
//!           │                 offers, machines, schedule)                   │
//!           └───────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stratum_auth::Authorizer;
use stratum_store::{Registrar, RegistryOperation};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::agent_link::AgentLink;
use crate::allocator::{Allocation, Allocator};
use crate::error::{MasterError, Result};
use crate::event::Event;
use crate::state::{MasterState, Turn};
use crate::types::MasterConfig;

/// The services the master depends on.
pub struct Collaborators {
    /// Decides who is offered what.
    pub allocator: Arc<dyn Allocator>,
    /// Persists the maintenance registry.
    pub registrar: Arc<dyn Registrar>,
    /// Delivers messages to agents.
    pub agent_link: Arc<dyn AgentLink>,
    /// Authorizes task launches and teardowns; everything is allowed without one.
    pub authorizer: Option<Arc<dyn Authorizer>>,
}

pub(crate) struct Shared {
    pub(crate) config: MasterConfig,
    pub(crate) allocator: Arc<dyn Allocator>,
    pub(crate) registrar: Arc<dyn Registrar>,
    pub(crate) authorizer: Option<Arc<dyn Authorizer>>,
    /// Held by a maintenance request from validation until its change is applied.
    pub(crate) maintenance: tokio::sync::Mutex<()>,
    elected: AtomicBool,
    recovered: AtomicBool,
}

/// Handle to a running master.
///
/// Cloning is cheap. The coordinator stops once every handle is dropped.
#[derive(Clone)]
pub struct Master {
    pub(crate) mailbox: mpsc::UnboundedSender<Turn>,
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master")
            .field("elected", &self.is_elected())
            .field("recovered", &self.is_recovered())
            .finish_non_exhaustive()
    }
}

impl Master {
    /// Start the coordinator and the periodic allocation and heartbeat loops.
    ///
    /// The master is elected but not recovered; call [`Master::recover`]
    /// before serving scheduler calls.
    #[must_use]
    pub fn start(config: MasterConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            allocator,
            registrar,
            agent_link,
            authorizer,
        } = collaborators;

        let (mailbox, mut turns) = mpsc::unbounded_channel::<Turn>();
        let mut state = MasterState::new(
            config.clone(),
            Arc::clone(&allocator),
            agent_link,
            mailbox.downgrade(),
        );

        tokio::spawn(async move {
            while let Some(turn) = turns.recv().await {
                turn(&mut state);
            }
            tracing::debug!("Coordinator stopped");
        });

        let master = Self {
            mailbox,
            shared: Arc::new(Shared {
                config,
                allocator,
                registrar,
                authorizer,
                maintenance: tokio::sync::Mutex::new(()),
                elected: AtomicBool::new(true),
                recovered: AtomicBool::new(false),
            }),
        };

        if let Some(period) = master.shared.config.allocation_interval {
            master.spawn_periodic(period, |master| async move {
                if let Err(e) = master.allocate().await {
                    tracing::debug!(error = %e, "Allocation round skipped");
                }
            });
        }

        if let Some(period) = master.shared.config.heartbeat_interval {
            master.spawn_periodic(period, |master| async move {
                let _ = master.dispatch(MasterState::heartbeat).await;
            });
        }

        master
    }

    /// Master configuration.
    #[must_use]
    pub fn config(&self) -> &MasterConfig {
        &self.shared.config
    }

    /// Whether this master is the elected leader.
    #[must_use]
    pub fn is_elected(&self) -> bool {
        self.shared.elected.load(Ordering::SeqCst)
    }

    /// Set the leadership flag.
    pub fn set_elected(&self, elected: bool) {
        self.shared.elected.store(elected, Ordering::SeqCst);
    }

    /// Whether the registry has been recovered.
    #[must_use]
    pub fn is_recovered(&self) -> bool {
        self.shared.recovered.load(Ordering::SeqCst)
    }

    /// Whether the master authorizes requests.
    #[must_use]
    pub fn has_authorizer(&self) -> bool {
        self.shared.authorizer.is_some()
    }

    /// Check that scheduler calls may be served.
    ///
    /// # Errors
    ///
    /// Returns `NotLeader`, `NotRecovered`, or `AuthenticationRequired`, in
    /// that order of precedence.
    pub fn check_scheduler_api(&self) -> Result<()> {
        if !self.is_elected() {
            return Err(MasterError::NotLeader);
        }
        if !self.is_recovered() {
            return Err(MasterError::NotRecovered);
        }
        if self.shared.config.authenticate_frameworks {
            return Err(MasterError::AuthenticationRequired);
        }
        Ok(())
    }

    /// Run `f` on the coordinator and wait for its result.
    pub(crate) async fn dispatch<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut MasterState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        self.mailbox
            .send(Box::new(move |state| {
                let _ = reply.send(f(state));
            }))
            .map_err(|_| MasterError::Stopped)?;
        result.await.map_err(|_| MasterError::Stopped)
    }

    fn spawn_periodic<F, Fut>(&self, period: Duration, tick: F)
    where
        F: Fn(Self) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        if period.is_zero() {
            return;
        }

        let mailbox = self.mailbox.downgrade();
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(mailbox) = mailbox.upgrade() else {
                    break;
                };
                tick(Self {
                    mailbox,
                    shared: Arc::clone(&shared),
                })
                .await;
            }
        });
    }

    /// Recover the maintenance registry and start serving.
    ///
    /// # Errors
    ///
    /// Returns `MasterError::Internal` if the registrar cannot be read.
    pub async fn recover(&self) -> Result<()> {
        let _serial = self.shared.maintenance.lock().await;
        let registrar = Arc::clone(&self.shared.registrar);
        let registry = tokio::task::spawn_blocking(move || registrar.recover())
            .await
            .map_err(|e| MasterError::Internal(format!("Recovery task failed: {e}")))?
            .map_err(|e| MasterError::Internal(format!("Failed to recover registry: {e}")))?;

        self.dispatch(move |state| state.install_registry(registry))
            .await?;
        self.shared.recovered.store(true, Ordering::SeqCst);

        tracing::info!("Master recovered");
        Ok(())
    }

    /// Persist a registry operation.
    ///
    /// The registrar either applies the operation or fails outright; a failure
    /// leaves memory and storage out of step, so the process aborts.
    pub(crate) async fn persist(&self, operation: RegistryOperation) {
        let name = operation.name();
        let registrar = Arc::clone(&self.shared.registrar);

        match tokio::task::spawn_blocking(move || registrar.apply(&operation)).await {
            Ok(Ok(changed)) => {
                tracing::debug!(operation = name, changed, "Applied registry operation");
            }
            Ok(Err(e)) => {
                tracing::error!(operation = name, error = %e, "Registrar failed to apply operation");
                std::process::abort();
            }
            Err(e) => {
                tracing::error!(operation = name, error = %e, "Registrar task failed");
                std::process::abort();
            }
        }
    }

    /// Run one allocation round and send the resulting offers.
    ///
    /// # Errors
    ///
    /// Returns `MasterError::Stopped` if the coordinator is gone.
    pub async fn allocate(&self) -> Result<()> {
        let allocation = self.shared.allocator.allocate().await;
        if allocation.is_empty() {
            return Ok(());
        }
        self.dispatch(move |state| state.offer(allocation)).await
    }
}

impl MasterState {
    /// Turn an allocation into offers and inverse offers.
    ///
    /// Resources allocated to frameworks or agents that went away in the
    /// meantime go straight back to the allocator.
    pub(crate) fn offer(&mut self, allocation: Allocation) {
        let mut offers = std::collections::BTreeMap::<_, Vec<_>>::new();
        let mut inverse_offers = std::collections::BTreeMap::<_, Vec<_>>::new();

        for (framework_id, agent_id, resources) in allocation.offers {
            let usable = self
                .frameworks
                .get(&framework_id)
                .is_some_and(|f| f.active && f.connected());

            let offer = if usable {
                self.add_offer(&framework_id, &agent_id, resources.clone())
            } else {
                None
            };

            match offer {
                Some(offer) => offers.entry(framework_id).or_default().push(offer),
                None => {
                    self.allocator
                        .recover_resources(&framework_id, &agent_id, &resources, None);
                }
            }
        }

        for (framework_id, agent_id, unavailability) in allocation.inverse_offers {
            match self.add_inverse_offer(&framework_id, &agent_id, unavailability) {
                Some(offer) => inverse_offers.entry(framework_id).or_default().push(offer),
                None => self
                    .allocator
                    .update_inverse_offer(&agent_id, &framework_id, None),
            }
        }

        let framework_ids: std::collections::BTreeSet<_> = offers
            .keys()
            .chain(inverse_offers.keys())
            .cloned()
            .collect();

        for framework_id in framework_ids {
            let offers = offers.remove(&framework_id).unwrap_or_default();
            let inverse_offers = inverse_offers.remove(&framework_id).unwrap_or_default();

            tracing::debug!(
                framework_id = %framework_id,
                offers = offers.len(),
                inverse_offers = inverse_offers.len(),
                "Sending offers"
            );

            self.send(
                &framework_id,
                Event::Offers {
                    offers,
                    inverse_offers,
                },
            );
        }
    }
}
