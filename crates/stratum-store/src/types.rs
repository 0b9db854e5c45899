//! Registry contents and the operations that mutate them.
//!
//! The registry is the durable part of the master's maintenance state: the
//! current schedule and every machine that is not plainly UP. Agents,
//! frameworks, and offers are never persisted.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use stratum_core::maintenance::{diff_schedule, prune_schedule};
use stratum_core::{MachineId, MachineInfo, MachineMode, Schedule};

/// Durable maintenance state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    /// The active schedule. At most one entry.
    #[serde(default)]
    pub schedules: Vec<Schedule>,
    /// Machines in DRAINING or DOWN mode.
    #[serde(default)]
    pub machines: Vec<MachineInfo>,
}

/// A mutation of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryOperation {
    /// Replace the maintenance schedule.
    UpdateSchedule(Schedule),
    /// Move machines to DOWN.
    StartMaintenance(Vec<MachineId>),
    /// Move machines back to UP and out of the schedule.
    StopMaintenance(Vec<MachineId>),
}

impl RegistryOperation {
    /// Short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::UpdateSchedule(_) => "update_schedule",
            Self::StartMaintenance(_) => "start_maintenance",
            Self::StopMaintenance(_) => "stop_maintenance",
        }
    }
}

impl Registry {
    /// The current schedule, if any.
    #[must_use]
    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedules.first()
    }

    /// Apply an operation, returning whether anything changed.
    ///
    /// Callers validate requests against the master's in-memory state first;
    /// machines the registry does not know are skipped here.
    pub fn apply(&mut self, operation: &RegistryOperation) -> bool {
        let before = self.clone();

        match operation {
            RegistryOperation::UpdateSchedule(schedule) => {
                self.machines = diff_schedule(&self.machines, schedule)
                    .into_values()
                    .filter(|info| info.mode != MachineMode::Up)
                    .collect();

                self.schedules = if schedule.windows.is_empty() {
                    Vec::new()
                } else {
                    vec![schedule.clone()]
                };
            }
            RegistryOperation::StartMaintenance(ids) => {
                for info in &mut self.machines {
                    if ids.contains(&info.id) {
                        info.mode = MachineMode::Down;
                    }
                }
            }
            RegistryOperation::StopMaintenance(ids) => {
                let ids: BTreeSet<MachineId> = ids.iter().cloned().collect();

                self.machines.retain(|info| !ids.contains(&info.id));
                self.schedules = self
                    .schedule()
                    .and_then(|schedule| prune_schedule(schedule, &ids))
                    .into_iter()
                    .collect();
            }
        }

        *self != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{Unavailability, Window};

    fn machine(name: &str) -> MachineId {
        MachineId::hostname(name)
    }

    fn schedule(names: &[&str]) -> Schedule {
        Schedule {
            windows: vec![Window {
                machine_ids: names.iter().map(|n| machine(n)).collect(),
                unavailability: Unavailability::new(100, None),
            }],
        }
    }

    fn mode_of(registry: &Registry, name: &str) -> Option<MachineMode> {
        registry
            .machines
            .iter()
            .find(|info| info.id == machine(name))
            .map(|info| info.mode)
    }

    #[test]
    fn update_schedule_marks_draining() {
        let mut registry = Registry::default();
        assert!(registry.apply(&RegistryOperation::UpdateSchedule(schedule(&["a", "b"]))));

        assert_eq!(registry.schedule(), Some(&schedule(&["a", "b"])));
        assert_eq!(mode_of(&registry, "a"), Some(MachineMode::Draining));
        assert_eq!(mode_of(&registry, "b"), Some(MachineMode::Draining));
    }

    #[test]
    fn update_schedule_drops_unscheduled_machines() {
        let mut registry = Registry::default();
        registry.apply(&RegistryOperation::UpdateSchedule(schedule(&["a", "b"])));
        registry.apply(&RegistryOperation::UpdateSchedule(schedule(&["b"])));

        assert_eq!(mode_of(&registry, "a"), None);
        assert_eq!(mode_of(&registry, "b"), Some(MachineMode::Draining));
    }

    #[test]
    fn empty_schedule_clears_everything() {
        let mut registry = Registry::default();
        registry.apply(&RegistryOperation::UpdateSchedule(schedule(&["a"])));
        registry.apply(&RegistryOperation::UpdateSchedule(Schedule::default()));

        assert!(registry.schedules.is_empty());
        assert!(registry.machines.is_empty());
    }

    #[test]
    fn same_schedule_is_not_a_change() {
        let mut registry = Registry::default();
        registry.apply(&RegistryOperation::UpdateSchedule(schedule(&["a"])));
        assert!(!registry.apply(&RegistryOperation::UpdateSchedule(schedule(&["a"]))));
    }

    #[test]
    fn start_and_stop_maintenance() {
        let mut registry = Registry::default();
        registry.apply(&RegistryOperation::UpdateSchedule(schedule(&["a", "b"])));

        assert!(registry.apply(&RegistryOperation::StartMaintenance(vec![machine("a")])));
        assert_eq!(mode_of(&registry, "a"), Some(MachineMode::Down));

        assert!(registry.apply(&RegistryOperation::StopMaintenance(vec![machine("a")])));
        assert_eq!(mode_of(&registry, "a"), None);
        assert_eq!(registry.schedule(), Some(&schedule(&["b"])));

        registry.apply(&RegistryOperation::StartMaintenance(vec![machine("b")]));
        registry.apply(&RegistryOperation::StopMaintenance(vec![machine("b")]));
        assert!(registry.schedules.is_empty());
        assert!(registry.machines.is_empty());
    }

    #[test]
    fn start_unknown_machine_is_noop() {
        let mut registry = Registry::default();
        assert!(!registry.apply(&RegistryOperation::StartMaintenance(vec![machine("x")])));
    }
}
