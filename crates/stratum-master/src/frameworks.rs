//! Framework subscription, failover, and teardown.

use std::time::Duration;

use futures::Stream;
use stratum_auth::AuthorizationRequest;
use stratum_core::task::now_seconds;
use stratum_core::FrameworkId;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};

use crate::coordinator::Master;
use crate::error::{MasterError, Result};
use crate::event::Event;
use crate::state::{Connection, Framework, MasterState, Turn};
use crate::types::FrameworkInfo;

/// A framework's event stream.
///
/// The first event is SUBSCRIBED, or a single ERROR when the subscription was
/// refused. Dropping the subscription disconnects the framework.
#[derive(Debug)]
pub struct Subscription {
    framework_id: Option<FrameworkId>,
    events: UnboundedReceiver<Event>,
    _guard: Option<DisconnectGuard>,
}

impl Subscription {
    /// The subscribed framework, `None` when the subscription was refused.
    #[must_use]
    pub const fn framework_id(&self) -> Option<&FrameworkId> {
        self.framework_id.as_ref()
    }

    /// Wait for the next event. `None` once the master closed the stream.
    pub async fn next(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Turn the subscription into a stream that disconnects when dropped.
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            let event = subscription.next().await?;
            Some((event, subscription))
        })
    }
}

/// Tells the coordinator the connection is gone when dropped.
#[derive(Debug)]
struct DisconnectGuard {
    framework_id: FrameworkId,
    connection_id: u64,
    mailbox: WeakUnboundedSender<Turn>,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };
        let framework_id = self.framework_id.clone();
        let connection_id = self.connection_id;
        let _ = mailbox.send(Box::new(move |state: &mut MasterState| {
            state.disconnected(&framework_id, connection_id);
        }));
    }
}

impl MasterState {
    /// Attach a new event stream to a framework, adding it if needed.
    ///
    /// Returns `None` when the subscription is refused; the refusal is sent on
    /// `events` before it is dropped.
    pub(crate) fn subscribe(
        &mut self,
        mut info: FrameworkInfo,
        events: UnboundedSender<Event>,
    ) -> Option<(FrameworkId, u64)> {
        if let Some(id) = &info.id {
            if self.completed_frameworks.iter().any(|f| &f.id == id) {
                tracing::warn!(framework_id = %id, "Refusing subscription of removed framework");
                let _ = events.send(Event::error("Framework has been removed"));
                return None;
            }
        }

        let connection = Connection {
            id: self.next_connection_id(),
            events,
        };
        let connection_id = connection.id;

        let framework_id = match info.id.clone() {
            Some(id) if self.frameworks.contains_key(&id) => {
                info.id = Some(id.clone());
                self.failover_framework(&id, info, connection);
                id
            }
            id => {
                let id = id.unwrap_or_else(FrameworkId::generate);
                info.id = Some(id.clone());
                self.add_framework(id.clone(), info, connection);
                id
            }
        };

        let heartbeat_interval_seconds = self
            .config
            .heartbeat_interval
            .map(|interval| interval.as_secs_f64());
        self.send(
            &framework_id,
            Event::Subscribed {
                framework_id: framework_id.clone(),
                heartbeat_interval_seconds,
            },
        );

        Some((framework_id, connection_id))
    }

    fn add_framework(&mut self, id: FrameworkId, info: FrameworkInfo, connection: Connection) {
        tracing::info!(framework_id = %id, name = %info.name, role = %info.role, "Added framework");

        self.allocator.add_framework(&id, &info.role);
        self.frameworks.insert(
            id.clone(),
            Framework {
                id,
                info,
                connection: Some(connection),
                active: true,
                registered_time: now_seconds(),
                reregistered_time: None,
                pending_tasks: std::collections::BTreeMap::new(),
                tasks: std::collections::BTreeMap::new(),
                completed_tasks: std::collections::VecDeque::new(),
                offers: std::collections::BTreeSet::new(),
                inverse_offers: std::collections::BTreeSet::new(),
                epoch: 0,
            },
        );
    }

    /// A known framework subscribed again. The previous stream is closed
    /// and outstanding offers go back to the allocator.
    fn failover_framework(&mut self, id: &FrameworkId, info: FrameworkInfo, connection: Connection) {
        let previous = self
            .frameworks
            .get_mut(id)
            .and_then(|framework| framework.connection.take());
        if let Some(previous) = previous {
            let _ = previous.events.send(Event::error("Framework failed over"));
        }

        self.recover_framework_offers(id, false);

        let Some(framework) = self.frameworks.get_mut(id) else {
            return;
        };
        framework.info = info;
        framework.connection = Some(connection);
        framework.reregistered_time = Some(now_seconds());
        framework.epoch += 1;

        if !framework.active {
            framework.active = true;
            self.allocator.activate_framework(id);
        }

        tracing::info!(framework_id = %id, "Framework failed over");
    }

    /// The framework's stream identified by `connection_id` closed.
    ///
    /// The framework is deactivated and removed once its failover timeout
    /// passes without a new subscription.
    pub(crate) fn disconnected(&mut self, framework_id: &FrameworkId, connection_id: u64) {
        let Some(framework) = self.frameworks.get_mut(framework_id) else {
            return;
        };
        if framework.connection.as_ref().map(|c| c.id) != Some(connection_id) {
            return;
        }

        framework.connection = None;
        framework.active = false;
        framework.epoch += 1;
        let epoch = framework.epoch;
        let failover_timeout = framework.info.failover_timeout;

        tracing::info!(framework_id = %framework_id, failover_timeout, "Framework disconnected");

        self.allocator.deactivate_framework(framework_id);
        self.recover_framework_offers(framework_id, false);

        if failover_timeout <= 0.0 {
            self.remove_framework(framework_id);
            return;
        }

        let delay = Duration::try_from_secs_f64(failover_timeout).unwrap_or(Duration::MAX);
        let mailbox = self.mailbox.clone();
        let framework_id = framework_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(Box::new(move |state: &mut MasterState| {
                    state.failover_expired(&framework_id, epoch);
                }));
            }
        });
    }

    fn failover_expired(&mut self, framework_id: &FrameworkId, epoch: u64) {
        let expired = self
            .frameworks
            .get(framework_id)
            .is_some_and(|f| f.epoch == epoch && !f.connected());
        if expired {
            tracing::info!(framework_id = %framework_id, "Framework failover timeout expired");
            self.remove_framework(framework_id);
        }
    }

    /// Send HEARTBEAT to every connected framework.
    pub(crate) fn heartbeat(&mut self) {
        let connected: Vec<FrameworkId> = self
            .frameworks
            .values()
            .filter(|f| f.connected())
            .map(|f| f.id.clone())
            .collect();
        for framework_id in connected {
            self.send(&framework_id, Event::Heartbeat);
        }
    }
}

impl Master {
    /// Open an event stream for a framework.
    ///
    /// # Errors
    ///
    /// Returns `MasterError::Stopped` if the coordinator is gone.
    pub async fn subscribe(&self, info: FrameworkInfo) -> Result<Subscription> {
        let (events, receiver) = mpsc::unbounded_channel();
        let subscribed = self
            .dispatch(move |state| state.subscribe(info, events))
            .await?;

        let mailbox = self.mailbox.downgrade();
        Ok(match subscribed {
            Some((framework_id, connection_id)) => Subscription {
                framework_id: Some(framework_id.clone()),
                events: receiver,
                _guard: Some(DisconnectGuard {
                    framework_id,
                    connection_id,
                    mailbox,
                }),
            },
            None => Subscription {
                framework_id: None,
                events: receiver,
                _guard: None,
            },
        })
    }

    /// Remove a framework on behalf of an operator.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchFramework` for an unknown framework, `Unauthorized` if
    /// the principal may not tear it down, or `Rejected` if it went away
    /// during authorization.
    pub async fn teardown(&self, principal: Option<String>, framework_id: &FrameworkId) -> Result<()> {
        let id = framework_id.clone();
        let framework_principal = self
            .dispatch(move |state| state.frameworks.get(&id).map(|f| f.info.principal.clone()))
            .await?
            .ok_or_else(|| MasterError::NoSuchFramework(framework_id.clone()))?;

        if let Some(authorizer) = &self.shared.authorizer {
            let request = AuthorizationRequest::ShutdownFramework {
                principal,
                framework_principal,
            };
            if !authorizer.authorize(&request).await? {
                return Err(MasterError::Unauthorized(
                    "Not authorized to teardown framework".into(),
                ));
            }
        }

        let id = framework_id.clone();
        let removed = self
            .dispatch(move |state| {
                let known = state.frameworks.contains_key(&id);
                if known {
                    state.remove_framework(&id);
                }
                known
            })
            .await?;

        if removed {
            Ok(())
        } else {
            Err(MasterError::Rejected(format!(
                "No framework found with ID {framework_id}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::StreamExt;
    use stratum_auth::StaticAuthorizer;

    use super::*;
    use crate::testing::{framework_info, Harness};

    #[tokio::test]
    async fn first_event_is_subscribed() {
        let harness = Harness::start().await;
        let mut subscription = harness.master.subscribe(framework_info("web")).await.unwrap();

        let Some(Event::Subscribed { framework_id, .. }) = subscription.next().await else {
            panic!("expected SUBSCRIBED");
        };
        assert_eq!(subscription.framework_id(), Some(&framework_id));

        let snapshot = harness.master.frameworks().await.unwrap();
        assert_eq!(snapshot.frameworks.len(), 1);
        assert!(snapshot.frameworks[0].active);
        assert!(snapshot.frameworks[0].connected);
    }

    #[tokio::test]
    async fn resubscribe_fails_over_previous_stream() {
        let harness = Harness::start().await;
        let (framework_id, mut first) = harness.subscribe("web").await;

        let mut info = framework_info("web");
        info.id = Some(framework_id.clone());
        let mut second = harness.master.subscribe(info).await.unwrap();

        assert_eq!(first.next().await, Some(Event::error("Framework failed over")));
        assert_eq!(first.next().await, None);
        assert!(matches!(
            second.next().await,
            Some(Event::Subscribed { framework_id: id, .. }) if id == framework_id
        ));

        drop(first);
        let snapshot = harness.master.frameworks().await.unwrap();
        assert!(snapshot.frameworks[0].connected);
        assert!(snapshot.frameworks[0].reregistered_time.is_some());
    }

    #[tokio::test]
    async fn disconnect_without_failover_timeout_removes() {
        let harness = Harness::start().await;
        let (framework_id, subscription) = harness.subscribe("web").await;
        drop(subscription);

        let snapshot = harness.master.frameworks().await.unwrap();
        assert!(snapshot.frameworks.is_empty());
        assert_eq!(snapshot.completed_frameworks[0].id, framework_id);

        let mut info = framework_info("web");
        info.id = Some(framework_id);
        let mut refused = harness.master.subscribe(info).await.unwrap();
        assert!(refused.framework_id().is_none());
        assert_eq!(refused.next().await, Some(Event::error("Framework has been removed")));
        assert_eq!(refused.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn failover_timeout_expires() {
        let harness = Harness::start().await;
        let mut info = framework_info("web");
        info.failover_timeout = 10.0;
        let mut subscription = harness.master.subscribe(info).await.unwrap();
        subscription.next().await;
        drop(subscription);

        let snapshot = harness.master.frameworks().await.unwrap();
        assert_eq!(snapshot.frameworks.len(), 1);
        assert!(!snapshot.frameworks[0].active);
        assert!(!snapshot.frameworks[0].connected);

        tokio::time::sleep(Duration::from_secs(11)).await;
        let snapshot = harness.master.frameworks().await.unwrap();
        assert!(snapshot.frameworks.is_empty());
        assert_eq!(snapshot.completed_frameworks.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_within_timeout_keeps_framework() {
        let harness = Harness::start().await;
        let mut info = framework_info("web");
        info.failover_timeout = 10.0;
        let mut subscription = harness.master.subscribe(info.clone()).await.unwrap();
        let framework_id = subscription.framework_id().cloned().unwrap();
        subscription.next().await;
        drop(subscription);

        tokio::time::sleep(Duration::from_secs(5)).await;
        info.id = Some(framework_id);
        let _again = harness.master.subscribe(info).await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        let snapshot = harness.master.frameworks().await.unwrap();
        assert_eq!(snapshot.frameworks.len(), 1);
        assert!(snapshot.frameworks[0].active);
    }

    #[tokio::test]
    async fn stream_ends_on_teardown() {
        let harness = Harness::start().await;
        let (framework_id, subscription) = harness.subscribe("web").await;
        let mut stream = Box::pin(subscription.into_stream());

        harness.master.teardown(None, &framework_id).await.unwrap();
        assert_eq!(stream.next().await, None);

        let err = harness.master.teardown(None, &framework_id).await.unwrap_err();
        assert!(matches!(err, MasterError::NoSuchFramework(_)));
    }

    #[tokio::test]
    async fn teardown_requires_authorization() {
        let harness =
            Harness::with_authorizer(Arc::new(StaticAuthorizer { allow: false })).await;
        let (framework_id, _subscription) = harness.subscribe("web").await;

        let err = harness
            .master
            .teardown(Some("ops".into()), &framework_id)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Not authorized to teardown framework");
        assert_eq!(harness.master.frameworks().await.unwrap().frameworks.len(), 1);
    }
}
