//! Machine maintenance types and rules.
//!
//! Machines move through a small state machine driven by the operator:
//!
//! ```text
//!        schedule            machine/down           machine/up
//!   UP ───────────▶ DRAINING ─────────────▶ DOWN ─────────────▶ UP
//!    ▲                 │
//!    └─────────────────┘
//!     removed from schedule
//! ```
//!
//! Everything in this module is pure: the functions take the current machine
//! infos and a request and return the next machine infos or schedule. The
//! master and the registrar both build on them so the in-memory and persisted
//! views follow the same rules.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::ids::FrameworkId;

/// Identity of a machine: a hostname, an IP address, or both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MachineId {
    /// Hostname of the machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// IP address of the machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl MachineId {
    /// Create a machine id from its parts.
    #[must_use]
    pub fn new(hostname: Option<&str>, ip: Option<&str>) -> Self {
        Self {
            hostname: hostname.map(ToString::to_string),
            ip: ip.map(ToString::to_string),
        }
    }

    /// Create a machine id from a hostname only.
    #[must_use]
    pub fn hostname(hostname: &str) -> Self {
        Self::new(Some(hostname), None)
    }

    /// Check that the id names a machine.
    ///
    /// # Errors
    ///
    /// Returns an error if both fields are empty or the IP does not parse.
    pub fn validate(&self) -> Result<()> {
        let hostname = self.hostname.as_deref().unwrap_or_default();
        let ip = self.ip.as_deref().unwrap_or_default();

        if hostname.is_empty() && ip.is_empty() {
            return Err(CoreError::InvalidMaintenance(
                "Both 'hostname' and 'ip' for a machine are empty".into(),
            ));
        }

        if !ip.is_empty() && ip.parse::<IpAddr>().is_err() {
            return Err(CoreError::InvalidMaintenance(format!(
                "Machine has an invalid IP address '{ip}'"
            )));
        }

        Ok(())
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.hostname, &self.ip) {
            (Some(hostname), Some(ip)) => write!(f, "{hostname} ({ip})"),
            (Some(hostname), None) => f.write_str(hostname),
            (None, Some(ip)) => f.write_str(ip),
            (None, None) => f.write_str("<unnamed>"),
        }
    }
}

/// Maintenance mode of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineMode {
    /// Available for use.
    Up,
    /// Scheduled for maintenance; frameworks are asked to vacate.
    Draining,
    /// Under maintenance; agents are shut down.
    Down,
}

/// A point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInfo {
    /// Nanoseconds since the Unix epoch.
    pub nanoseconds: i64,
}

/// A length of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DurationInfo {
    /// Length in nanoseconds.
    pub nanoseconds: i64,
}

/// When a machine is expected to be unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Unavailability {
    /// Start of the interval.
    pub start: TimeInfo,
    /// Length of the interval; open-ended when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<DurationInfo>,
}

impl Unavailability {
    /// Create an interval from raw nanosecond values.
    #[must_use]
    pub const fn new(start_nanos: i64, duration_nanos: Option<i64>) -> Self {
        Self {
            start: TimeInfo {
                nanoseconds: start_nanos,
            },
            duration: match duration_nanos {
                Some(nanoseconds) => Some(DurationInfo { nanoseconds }),
                None => None,
            },
        }
    }
}

/// A set of machines sharing one unavailability interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Machines in the window.
    pub machine_ids: Vec<MachineId>,
    /// When they are unavailable.
    pub unavailability: Unavailability,
}

/// An operator-declared maintenance schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Ordered maintenance windows.
    #[serde(default)]
    pub windows: Vec<Window>,
}

impl Schedule {
    /// Every machine named by the schedule with its unavailability.
    #[must_use]
    pub fn unavailabilities(&self) -> BTreeMap<MachineId, Unavailability> {
        let mut machines = BTreeMap::new();
        for window in &self.windows {
            for id in &window.machine_ids {
                machines.insert(id.clone(), window.unavailability);
            }
        }
        machines
    }

    /// Whether the schedule names the machine.
    #[must_use]
    pub fn contains(&self, id: &MachineId) -> bool {
        self.windows.iter().any(|w| w.machine_ids.contains(id))
    }
}

/// Maintenance state of one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    /// The machine.
    pub id: MachineId,
    /// Current mode.
    pub mode: MachineMode,
    /// Scheduled unavailability, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailability: Option<Unavailability>,
}

impl MachineInfo {
    /// A machine with no maintenance state.
    #[must_use]
    pub const fn up(id: MachineId) -> Self {
        Self {
            id,
            mode: MachineMode::Up,
            unavailability: None,
        }
    }
}

/// A framework's answer to an inverse offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InverseOfferResponse {
    /// No answer yet.
    Unknown,
    /// The framework will vacate the resources.
    Accept,
    /// The framework refuses to vacate.
    Decline,
}

/// Latest inverse offer answer of one framework on one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InverseOfferStatus {
    /// The answer.
    pub status: InverseOfferResponse,
    /// The framework that answered.
    pub framework_id: FrameworkId,
    /// Seconds since the Unix epoch when the answer was recorded.
    pub timestamp: f64,
}

/// A draining machine together with inverse offer answers for its agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainingMachine {
    /// The machine.
    pub id: MachineId,
    /// Answers from frameworks using the machine.
    #[serde(default)]
    pub statuses: Vec<InverseOfferStatus>,
}

/// Maintenance status of the whole cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    /// Machines in DRAINING mode.
    #[serde(default)]
    pub draining_machines: Vec<DrainingMachine>,
    /// Machines in DOWN mode.
    #[serde(default)]
    pub down_machines: Vec<MachineId>,
}

// =============================================================================
// Validation
// =============================================================================

/// Validate a list of machines given to machine/down or machine/up.
///
/// # Errors
///
/// Returns an error if the list is empty, holds duplicates, or holds an
/// invalid machine id.
pub fn validate_machines(ids: &[MachineId]) -> Result<()> {
    if ids.is_empty() {
        return Err(CoreError::InvalidMaintenance(
            "List of machines is empty".into(),
        ));
    }

    let mut unique = BTreeSet::new();
    for id in ids {
        id.validate()?;
        if !unique.insert(id) {
            return Err(CoreError::InvalidMaintenance(format!(
                "Machine '{id}' appears more than once in the list"
            )));
        }
    }

    Ok(())
}

/// Validate an unavailability interval.
///
/// # Errors
///
/// Returns an error if the duration is negative.
pub fn validate_unavailability(unavailability: &Unavailability) -> Result<()> {
    if unavailability
        .duration
        .is_some_and(|duration| duration.nanoseconds < 0)
    {
        return Err(CoreError::InvalidMaintenance(
            "Unavailability 'duration' is negative".into(),
        ));
    }

    Ok(())
}

/// Validate a replacement schedule against the current machine infos.
///
/// Windows must be non-empty, machines valid and named at most once across the
/// whole schedule, and every DOWN machine must remain in the schedule.
///
/// # Errors
///
/// Returns `CoreError::InvalidMaintenance` describing the first violation.
pub fn validate_schedule<'a>(
    schedule: &Schedule,
    machines: impl IntoIterator<Item = &'a MachineInfo>,
) -> Result<()> {
    let mut scheduled = BTreeSet::new();

    for window in &schedule.windows {
        if window.machine_ids.is_empty() {
            return Err(CoreError::InvalidMaintenance(
                "List of machines in the maintenance window is empty".into(),
            ));
        }

        validate_unavailability(&window.unavailability)?;

        for id in &window.machine_ids {
            id.validate()?;
            if !scheduled.insert(id) {
                return Err(CoreError::InvalidMaintenance(format!(
                    "Maintenance schedule has duplicate machine '{id}'"
                )));
            }
        }
    }

    for info in machines {
        if info.mode == MachineMode::Down && !scheduled.contains(&info.id) {
            return Err(CoreError::InvalidMaintenance(format!(
                "Machine '{}' is deactivated and cannot be removed from the schedule",
                info.id
            )));
        }
    }

    Ok(())
}

// =============================================================================
// Diffing
// =============================================================================

/// Compute machine infos after installing `schedule`.
///
/// - machines named by the schedule take the window's unavailability and
///   become DRAINING, except DOWN machines which stay DOWN;
/// - known machines absent from the schedule return to UP with no
///   unavailability;
/// - machines not known before start DRAINING.
///
/// The result holds one entry per known or scheduled machine.
#[must_use]
pub fn diff_schedule<'a>(
    current: impl IntoIterator<Item = &'a MachineInfo>,
    schedule: &Schedule,
) -> BTreeMap<MachineId, MachineInfo> {
    let scheduled = schedule.unavailabilities();
    let mut next = BTreeMap::new();

    for info in current {
        let updated = match scheduled.get(&info.id) {
            Some(unavailability) => MachineInfo {
                id: info.id.clone(),
                mode: if info.mode == MachineMode::Down {
                    MachineMode::Down
                } else {
                    MachineMode::Draining
                },
                unavailability: Some(*unavailability),
            },
            None => MachineInfo::up(info.id.clone()),
        };
        next.insert(info.id.clone(), updated);
    }

    for (id, unavailability) in scheduled {
        next.entry(id.clone()).or_insert(MachineInfo {
            id,
            mode: MachineMode::Draining,
            unavailability: Some(unavailability),
        });
    }

    next
}

/// Remove machines from every window, dropping empty windows.
///
/// Returns `None` when no window remains.
#[must_use]
pub fn prune_schedule(schedule: &Schedule, ids: &BTreeSet<MachineId>) -> Option<Schedule> {
    let windows: Vec<Window> = schedule
        .windows
        .iter()
        .filter_map(|window| {
            let machine_ids: Vec<MachineId> = window
                .machine_ids
                .iter()
                .filter(|id| !ids.contains(*id))
                .cloned()
                .collect();

            (!machine_ids.is_empty()).then(|| Window {
                machine_ids,
                unavailability: window.unavailability,
            })
        })
        .collect();

    (!windows.is_empty()).then_some(Schedule { windows })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(name: &str) -> MachineId {
        MachineId::hostname(name)
    }

    fn info(name: &str, mode: MachineMode) -> MachineInfo {
        MachineInfo {
            id: machine(name),
            mode,
            unavailability: Some(Unavailability::new(0, Some(10))),
        }
    }

    fn window(names: &[&str], start: i64) -> Window {
        Window {
            machine_ids: names.iter().map(|n| machine(n)).collect(),
            unavailability: Unavailability::new(start, Some(3_600_000_000_000)),
        }
    }

    #[test]
    fn machine_id_validation() {
        assert!(machine("m1").validate().is_ok());
        assert!(MachineId::new(None, Some("10.0.0.1")).validate().is_ok());
        assert!(MachineId::new(None, None).validate().is_err());
        assert!(MachineId::new(Some(""), Some("")).validate().is_err());
        assert!(MachineId::new(Some("m1"), Some("not-an-ip")).validate().is_err());
    }

    #[test]
    fn machines_list_validation() {
        assert!(validate_machines(&[]).is_err());
        assert!(validate_machines(&[machine("a"), machine("a")]).is_err());
        assert!(validate_machines(&[machine("a"), machine("b")]).is_ok());
    }

    #[test]
    fn schedule_validation() {
        let ok = Schedule {
            windows: vec![window(&["a"], 0), window(&["b", "c"], 10)],
        };
        assert!(validate_schedule(&ok, &[]).is_ok());

        let empty_window = Schedule {
            windows: vec![window(&[], 0)],
        };
        assert!(validate_schedule(&empty_window, &[]).is_err());

        let duplicate = Schedule {
            windows: vec![window(&["a"], 0), window(&["a"], 10)],
        };
        assert!(validate_schedule(&duplicate, &[]).is_err());

        let mut negative = window(&["a"], 0);
        negative.unavailability.duration = Some(DurationInfo { nanoseconds: -1 });
        let negative = Schedule {
            windows: vec![negative],
        };
        assert!(validate_schedule(&negative, &[]).is_err());
    }

    #[test]
    fn down_machine_must_stay_scheduled() {
        let down = [info("a", MachineMode::Down)];
        let without = Schedule {
            windows: vec![window(&["b"], 0)],
        };
        assert!(validate_schedule(&without, &down).is_err());

        let with = Schedule {
            windows: vec![window(&["a", "b"], 0)],
        };
        assert!(validate_schedule(&with, &down).is_ok());
    }

    #[test]
    fn empty_schedule_is_valid() {
        assert!(validate_schedule(&Schedule::default(), &[]).is_ok());
    }

    #[test]
    fn diff_is_incremental() {
        let current = [
            info("m1", MachineMode::Draining),
            info("m2", MachineMode::Draining),
        ];
        let schedule = Schedule {
            windows: vec![window(&["m2", "m3"], 42)],
        };

        let next = diff_schedule(&current, &schedule);
        assert_eq!(next.len(), 3);

        let m1 = &next[&machine("m1")];
        assert_eq!(m1.mode, MachineMode::Up);
        assert!(m1.unavailability.is_none());

        let m2 = &next[&machine("m2")];
        assert_eq!(m2.mode, MachineMode::Draining);
        assert_eq!(m2.unavailability.unwrap().start.nanoseconds, 42);

        let m3 = &next[&machine("m3")];
        assert_eq!(m3.mode, MachineMode::Draining);
        assert_eq!(m3.unavailability.unwrap().start.nanoseconds, 42);
    }

    #[test]
    fn diff_keeps_down_machines_down() {
        let current = [info("m1", MachineMode::Down)];
        let schedule = Schedule {
            windows: vec![window(&["m1"], 7)],
        };

        let next = diff_schedule(&current, &schedule);
        let m1 = &next[&machine("m1")];
        assert_eq!(m1.mode, MachineMode::Down);
        assert_eq!(m1.unavailability.unwrap().start.nanoseconds, 7);
    }

    #[test]
    fn diff_leaves_unscheduled_up_machines_up() {
        let current = [MachineInfo::up(machine("m1"))];
        let next = diff_schedule(&current, &Schedule::default());
        assert_eq!(next[&machine("m1")], MachineInfo::up(machine("m1")));
    }

    #[test]
    fn prune_drops_empty_windows() {
        let schedule = Schedule {
            windows: vec![window(&["a", "b"], 0), window(&["c"], 10)],
        };

        let pruned = prune_schedule(&schedule, &BTreeSet::from([machine("c")])).unwrap();
        assert_eq!(pruned.windows.len(), 1);
        assert_eq!(pruned.windows[0].machine_ids, vec![machine("a"), machine("b")]);

        let pruned = prune_schedule(&schedule, &BTreeSet::from([machine("a")])).unwrap();
        assert_eq!(pruned.windows.len(), 2);
        assert_eq!(pruned.windows[0].machine_ids, vec![machine("b")]);
    }

    #[test]
    fn prune_everything_drops_schedule() {
        let schedule = Schedule {
            windows: vec![window(&["a"], 0), window(&["b"], 10)],
        };
        let all = BTreeSet::from([machine("a"), machine("b")]);
        assert!(prune_schedule(&schedule, &all).is_none());
    }

    #[test]
    fn schedule_json_shape() {
        let json = r#"{"windows":[{"machine_ids":[{"hostname":"m1"},{"ip":"10.0.0.2"}],
            "unavailability":{"start":{"nanoseconds":1},"duration":{"nanoseconds":2}}}]}"#;
        let schedule: Schedule = serde_json::from_str(json).unwrap();
        assert_eq!(schedule.windows[0].machine_ids.len(), 2);
        assert!(schedule.contains(&MachineId::new(None, Some("10.0.0.2"))));
        assert_eq!(
            schedule.windows[0].unavailability,
            Unavailability::new(1, Some(2))
        );
    }
}
