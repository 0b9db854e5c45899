//! Scheduler calls.
//!
//! [`Call`] is the wire form: an open `type` plus one optional payload per
//! call type. [`Call::validate`] turns it into the closed [`SchedulerCall`],
//! which is what the master dispatches on.

use serde::{Deserialize, Serialize};
use stratum_core::{AgentId, ExecutorId, FrameworkId, OfferId, Operation, Resources, TaskId};

use crate::types::{Filters, FrameworkInfo};

/// Wire call type. Unrecognized names decode to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallType {
    /// Open an event stream.
    Subscribe,
    /// Remove the framework.
    Teardown,
    /// Use offers.
    Accept,
    /// Return offers.
    Decline,
    /// Remove offer filters.
    Revive,
    /// Stop receiving offers.
    Suppress,
    /// Kill a task.
    Kill,
    /// Shut down an executor.
    Shutdown,
    /// Acknowledge a status update.
    Acknowledge,
    /// Ask for task states.
    Reconcile,
    /// Send data to an executor.
    Message,
    /// Ask the allocator for resources.
    Request,
    /// Anything else.
    #[serde(other)]
    Unknown,
}

/// SUBSCRIBE payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscribe {
    /// The framework.
    pub framework_info: FrameworkInfo,
}

/// ACCEPT payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accept {
    /// Offers (and inverse offers) being accepted.
    pub offer_ids: Vec<OfferId>,
    /// Operations to perform on the offered resources, in order.
    #[serde(default)]
    pub operations: Vec<Operation>,
    /// Filters for the unused resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
}

/// DECLINE payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decline {
    /// Offers (and inverse offers) being declined.
    pub offer_ids: Vec<OfferId>,
    /// Filters for the declined resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
}

/// KILL payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kill {
    /// Task to kill.
    pub task_id: TaskId,
    /// Agent running the task, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
}

/// SHUTDOWN payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shutdown {
    /// Executor to stop.
    pub executor_id: ExecutorId,
    /// Agent running it.
    pub agent_id: AgentId,
}

/// ACKNOWLEDGE payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledge {
    /// Agent that sent the update.
    pub agent_id: AgentId,
    /// Task the update is about.
    pub task_id: TaskId,
    /// The update's uuid.
    pub uuid: String,
}

/// A task named in a RECONCILE call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileTask {
    /// The task.
    pub task_id: TaskId,
    /// Agent the framework believes runs it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
}

/// RECONCILE payload. An empty task list asks for every task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconcile {
    /// Tasks to reconcile.
    #[serde(default)]
    pub tasks: Vec<ReconcileTask>,
}

/// MESSAGE payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Agent running the executor.
    pub agent_id: AgentId,
    /// Target executor.
    pub executor_id: ExecutorId,
    /// Opaque payload.
    pub data: String,
}

/// A resource request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Preferred agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    /// Wanted resources.
    #[serde(default)]
    pub resources: Resources,
}

/// REQUEST payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Requests for the allocator.
    pub requests: Vec<ResourceRequest>,
}

/// A scheduler call as received on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Calling framework; required for everything but SUBSCRIBE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework_id: Option<FrameworkId>,
    /// Call type.
    #[serde(rename = "type")]
    pub kind: CallType,
    /// SUBSCRIBE payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<Subscribe>,
    /// ACCEPT payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<Accept>,
    /// DECLINE payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decline: Option<Decline>,
    /// KILL payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill: Option<Kill>,
    /// SHUTDOWN payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown: Option<Shutdown>,
    /// ACKNOWLEDGE payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledge: Option<Acknowledge>,
    /// RECONCILE payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<Reconcile>,
    /// MESSAGE payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// REQUEST payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Request>,
}

/// A validated call from a subscribed framework.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameworkCall {
    /// Remove the framework.
    Teardown,
    /// Use offers.
    Accept(Accept),
    /// Return offers.
    Decline(Decline),
    /// Remove offer filters.
    Revive,
    /// Stop receiving offers.
    Suppress,
    /// Kill a task.
    Kill(Kill),
    /// Shut down an executor.
    Shutdown(Shutdown),
    /// Acknowledge a status update.
    Acknowledge(Acknowledge),
    /// Ask for task states.
    Reconcile(Reconcile),
    /// Send data to an executor.
    Message(Message),
    /// Ask the allocator for resources.
    Request(Request),
}

impl FrameworkCall {
    /// Wire name of the call type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Teardown => "TEARDOWN",
            Self::Accept(_) => "ACCEPT",
            Self::Decline(_) => "DECLINE",
            Self::Revive => "REVIVE",
            Self::Suppress => "SUPPRESS",
            Self::Kill(_) => "KILL",
            Self::Shutdown(_) => "SHUTDOWN",
            Self::Acknowledge(_) => "ACKNOWLEDGE",
            Self::Reconcile(_) => "RECONCILE",
            Self::Message(_) => "MESSAGE",
            Self::Request(_) => "REQUEST",
        }
    }
}

/// A validated scheduler call.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerCall {
    /// Open an event stream.
    Subscribe(Subscribe),
    /// Any other call, on behalf of an existing framework.
    Framework {
        /// The calling framework.
        framework_id: FrameworkId,
        /// What it asks for.
        call: FrameworkCall,
    },
}

fn require<T>(payload: Option<T>, name: &str) -> Result<T, String> {
    payload.ok_or_else(|| format!("Expecting '{name}' to be present"))
}

impl Call {
    /// A call of the given type with no payload.
    #[must_use]
    pub const fn new(kind: CallType, framework_id: Option<FrameworkId>) -> Self {
        Self {
            framework_id,
            kind,
            subscribe: None,
            accept: None,
            decline: None,
            kill: None,
            shutdown: None,
            acknowledge: None,
            reconcile: None,
            message: None,
            request: None,
        }
    }

    /// Check the call's structure and convert it into a [`SchedulerCall`].
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(self) -> Result<SchedulerCall, String> {
        if self.kind == CallType::Subscribe {
            let subscribe = require(self.subscribe, "subscribe")?;
            let info = &subscribe.framework_info;

            if info.name.is_empty() {
                return Err("'subscribe.framework_info.name' is empty".into());
            }
            if info.user.is_empty() {
                return Err("'subscribe.framework_info.user' is empty".into());
            }
            if !info.failover_timeout.is_finite() || info.failover_timeout < 0.0 {
                return Err("'subscribe.framework_info.failover_timeout' is invalid".into());
            }
            if let Some(id) = &self.framework_id {
                if info.id.as_ref() != Some(id) {
                    return Err(
                        "'framework_id' differs from 'subscribe.framework_info.id'".into(),
                    );
                }
            }

            return Ok(SchedulerCall::Subscribe(subscribe));
        }

        let framework_id = require(self.framework_id, "framework_id")?;

        let call = match self.kind {
            CallType::Teardown => FrameworkCall::Teardown,
            CallType::Accept => FrameworkCall::Accept(require(self.accept, "accept")?),
            CallType::Decline => FrameworkCall::Decline(require(self.decline, "decline")?),
            CallType::Revive => FrameworkCall::Revive,
            CallType::Suppress => FrameworkCall::Suppress,
            CallType::Kill => FrameworkCall::Kill(require(self.kill, "kill")?),
            CallType::Shutdown => FrameworkCall::Shutdown(require(self.shutdown, "shutdown")?),
            CallType::Acknowledge => {
                let acknowledge = require(self.acknowledge, "acknowledge")?;
                if uuid::Uuid::parse_str(&acknowledge.uuid).is_err() {
                    return Err("'acknowledge.uuid' is not a valid UUID".into());
                }
                FrameworkCall::Acknowledge(acknowledge)
            }
            CallType::Reconcile => {
                FrameworkCall::Reconcile(require(self.reconcile, "reconcile")?)
            }
            CallType::Message => FrameworkCall::Message(require(self.message, "message")?),
            CallType::Request => FrameworkCall::Request(require(self.request, "request")?),
            CallType::Subscribe | CallType::Unknown => return Err("Unknown call type".into()),
        };

        Ok(SchedulerCall::Framework { framework_id, call })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framework_info(id: Option<&str>) -> FrameworkInfo {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": "web",
            "user": "nobody",
        }))
        .unwrap()
    }

    #[test]
    fn decodes_unknown_type() {
        let call: Call = serde_json::from_str(r#"{"type":"FROBNICATE","framework_id":"f1"}"#)
            .unwrap();
        assert_eq!(call.kind, CallType::Unknown);
        assert_eq!(call.validate().unwrap_err(), "Unknown call type");
    }

    #[test]
    fn subscribe_validation() {
        let mut call = Call::new(CallType::Subscribe, None);
        assert_eq!(
            call.clone().validate().unwrap_err(),
            "Expecting 'subscribe' to be present"
        );

        call.subscribe = Some(Subscribe {
            framework_info: framework_info(None),
        });
        assert!(matches!(
            call.clone().validate(),
            Ok(SchedulerCall::Subscribe(_))
        ));

        call.framework_id = Some(FrameworkId::new("f1").unwrap());
        assert!(call.clone().validate().unwrap_err().contains("differs"));

        call.subscribe = Some(Subscribe {
            framework_info: framework_info(Some("f1")),
        });
        assert!(call.validate().is_ok());
    }

    #[test]
    fn subscribe_requires_user() {
        let mut info = framework_info(None);
        info.user = String::new();
        let mut call = Call::new(CallType::Subscribe, None);
        call.subscribe = Some(Subscribe {
            framework_info: info,
        });
        assert!(call.validate().unwrap_err().contains("user"));
    }

    #[test]
    fn framework_id_required() {
        let call = Call::new(CallType::Revive, None);
        assert_eq!(
            call.validate().unwrap_err(),
            "Expecting 'framework_id' to be present"
        );
    }

    #[test]
    fn payload_required() {
        let call = Call::new(CallType::Accept, Some(FrameworkId::new("f1").unwrap()));
        assert_eq!(
            call.validate().unwrap_err(),
            "Expecting 'accept' to be present"
        );
    }

    #[test]
    fn acknowledge_uuid_checked() {
        let mut call = Call::new(
            CallType::Acknowledge,
            Some(FrameworkId::new("f1").unwrap()),
        );
        call.acknowledge = Some(Acknowledge {
            agent_id: AgentId::new("a1").unwrap(),
            task_id: TaskId::new("t1").unwrap(),
            uuid: "nope".into(),
        });
        assert!(call.validate().unwrap_err().contains("UUID"));
    }

    #[test]
    fn json_decline() {
        let call: Call = serde_json::from_str(
            r#"{"framework_id":"f1","type":"DECLINE",
                "decline":{"offer_ids":["o1","o2"],"filters":{"refuse_seconds":30.0}}}"#,
        )
        .unwrap();

        match call.validate().unwrap() {
            SchedulerCall::Framework {
                framework_id,
                call: FrameworkCall::Decline(decline),
            } => {
                assert_eq!(framework_id.as_str(), "f1");
                assert_eq!(decline.offer_ids.len(), 2);
                assert_eq!(decline.filters, Some(Filters::refuse(30.0)));
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[test]
    fn type_names() {
        assert_eq!(FrameworkCall::Revive.type_name(), "REVIVE");
        assert_eq!(
            FrameworkCall::Reconcile(Reconcile::default()).type_name(),
            "RECONCILE"
        );
    }
}
