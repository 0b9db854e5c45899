//! Machine maintenance: schedules, machine down, machine up, and status.
//!
//! Every change is validated on the coordinator, persisted through the
//! registrar, and only then applied to memory. Maintenance requests run one at
//! a time from validation to apply, so a check never goes stale while the
//! registrar is writing. Registrar failures abort the process (see
//! [`Master::persist`]).

use std::collections::{BTreeMap, BTreeSet};

use stratum_core::maintenance::{diff_schedule, prune_schedule, validate_machines, validate_schedule};
use stratum_core::{
    AgentId, ClusterStatus, CoreError, DrainingMachine, MachineId, MachineInfo, MachineMode,
    OfferId, Schedule,
};
use stratum_store::RegistryOperation;

use crate::agent_link::AgentMessage;
use crate::coordinator::Master;
use crate::error::Result;
use crate::state::MasterState;

impl MasterState {
    fn validate_new_schedule(&self, schedule: &Schedule) -> Result<()> {
        validate_schedule(schedule, self.machines.values().map(|m| &m.info))?;
        Ok(())
    }

    /// Install a persisted schedule, updating every machine whose
    /// maintenance window changed.
    fn install_schedule(&mut self, schedule: Schedule) {
        let current: Vec<MachineInfo> = self.machines.values().map(|m| m.info.clone()).collect();
        let next = diff_schedule(&current, &schedule);

        for (id, info) in next {
            let machine = self.machine_mut(&id);
            if machine.info == info {
                continue;
            }

            tracing::info!(
                machine = %id,
                from = ?machine.info.mode,
                to = ?info.mode,
                "Updated machine maintenance"
            );

            let changed = machine.info.unavailability != info.unavailability;
            machine.info = info;
            if changed {
                self.update_unavailability(&id);
            }
        }

        self.schedule = (!schedule.windows.is_empty()).then_some(schedule);
    }

    /// Tell the allocator about a machine's new unavailability and withdraw
    /// inverse offers made for the previous one.
    fn update_unavailability(&mut self, machine_id: &MachineId) {
        let unavailability = self.unavailability_of(machine_id);
        let agents: Vec<AgentId> = self
            .machines
            .get(machine_id)
            .map(|m| m.agents.iter().cloned().collect())
            .unwrap_or_default();

        for agent_id in agents {
            let inverse_offers: Vec<OfferId> = self
                .agents
                .get(&agent_id)
                .map(|a| a.inverse_offers.iter().cloned().collect())
                .unwrap_or_default();
            for offer_id in inverse_offers {
                self.remove_inverse_offer(&offer_id, true);
            }

            self.allocator
                .update_unavailability(&agent_id, unavailability);
        }
    }

    fn validate_machine_mode(&self, ids: &[MachineId], required: MachineMode) -> Result<()> {
        validate_machines(ids)?;

        for id in ids {
            let machine = self.machines.get(id).ok_or_else(|| {
                CoreError::InvalidMaintenance(format!(
                    "Machine '{id}' is not part of a maintenance schedule"
                ))
            })?;

            if machine.info.mode != required {
                let message = match required {
                    MachineMode::Draining => format!(
                        "Machine '{id}' is not in DRAINING mode and cannot be brought down"
                    ),
                    _ => format!("Machine '{id}' is not in DOWN mode and cannot be brought up"),
                };
                return Err(CoreError::InvalidMaintenance(message).into());
            }
        }

        Ok(())
    }

    /// Shut down and remove every agent on the machines, then mark them DOWN.
    fn machines_down(&mut self, ids: &[MachineId]) {
        for id in ids {
            let agents: Vec<AgentId> = self
                .machines
                .get(id)
                .map(|m| m.agents.iter().cloned().collect())
                .unwrap_or_default();

            for agent_id in agents {
                if let Some(agent) = self.agents.get(&agent_id) {
                    agent.send(AgentMessage::ShutdownAgent {
                        message: "Operator initiated 'Machine DOWN'".into(),
                    });
                }
                self.remove_agent(&agent_id, "Agent removed for maintenance");
            }

            self.machine_mut(id).info.mode = MachineMode::Down;
            tracing::info!(machine = %id, "Machine is DOWN");
        }
    }

    /// Mark machines UP and drop them from the schedule.
    fn machines_up(&mut self, ids: &[MachineId]) {
        for id in ids {
            let machine = self.machine_mut(id);
            machine.info.mode = MachineMode::Up;
            machine.info.unavailability = None;
            tracing::info!(machine = %id, "Machine is UP");
        }

        let ids: BTreeSet<MachineId> = ids.iter().cloned().collect();
        self.schedule = self
            .schedule
            .as_ref()
            .and_then(|schedule| prune_schedule(schedule, &ids));
    }
}

impl Master {
    /// Replace the maintenance schedule.
    ///
    /// # Errors
    ///
    /// Returns an error if the schedule is invalid, e.g. it drops a machine
    /// that is DOWN.
    pub async fn update_schedule(&self, schedule: Schedule) -> Result<()> {
        let _serial = self.shared.maintenance.lock().await;
        let candidate = schedule.clone();
        self.dispatch(move |state| state.validate_new_schedule(&candidate))
            .await??;

        self.persist(RegistryOperation::UpdateSchedule(schedule.clone()))
            .await;

        self.dispatch(move |state| state.install_schedule(schedule))
            .await
    }

    /// The current maintenance schedule; empty when none is installed.
    ///
    /// # Errors
    ///
    /// Returns `MasterError::Stopped` if the coordinator is gone.
    pub async fn schedule(&self) -> Result<Schedule> {
        self.dispatch(|state| state.schedule.clone().unwrap_or_default())
            .await
    }

    /// Bring DRAINING machines down, removing their agents.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is invalid or a machine is not DRAINING.
    pub async fn start_maintenance(&self, ids: Vec<MachineId>) -> Result<()> {
        let _serial = self.shared.maintenance.lock().await;
        let candidate = ids.clone();
        self.dispatch(move |state| state.validate_machine_mode(&candidate, MachineMode::Draining))
            .await??;

        self.persist(RegistryOperation::StartMaintenance(ids.clone()))
            .await;

        self.dispatch(move |state| state.machines_down(&ids)).await
    }

    /// Bring DOWN machines back up.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is invalid or a machine is not DOWN.
    pub async fn stop_maintenance(&self, ids: Vec<MachineId>) -> Result<()> {
        let _serial = self.shared.maintenance.lock().await;
        let candidate = ids.clone();
        self.dispatch(move |state| state.validate_machine_mode(&candidate, MachineMode::Down))
            .await??;

        self.persist(RegistryOperation::StopMaintenance(ids.clone()))
            .await;

        self.dispatch(move |state| state.machines_up(&ids)).await
    }

    /// DRAINING machines with their inverse offer answers, and DOWN machines.
    ///
    /// # Errors
    ///
    /// Returns `MasterError::Stopped` if the coordinator is gone.
    pub async fn maintenance_status(&self) -> Result<ClusterStatus> {
        let machines = self
            .dispatch(|state| {
                state
                    .machines
                    .values()
                    .filter(|m| m.info.mode != MachineMode::Up)
                    .map(|m| (m.info.id.clone(), m.info.mode, m.agents.clone()))
                    .collect::<Vec<_>>()
            })
            .await?;

        let statuses = self.shared.allocator.inverse_offer_statuses().await;
        let mut status = ClusterStatus::default();

        for (id, mode, agents) in machines {
            match mode {
                MachineMode::Draining => {
                    let statuses = agents
                        .iter()
                        .filter_map(|agent_id| statuses.get(agent_id))
                        .flatten()
                        .cloned()
                        .collect();
                    status
                        .draining_machines
                        .push(DrainingMachine { id, statuses });
                }
                MachineMode::Down => status.down_machines.push(id),
                MachineMode::Up => {}
            }
        }

        Ok(status)
    }

    /// Machine infos that are not UP, keyed by machine.
    ///
    /// # Errors
    ///
    /// Returns `MasterError::Stopped` if the coordinator is gone.
    pub async fn machines(&self) -> Result<BTreeMap<MachineId, MachineInfo>> {
        self.dispatch(|state| {
            state
                .machines
                .iter()
                .filter(|(_, m)| m.info.mode != MachineMode::Up)
                .map(|(id, m)| (id.clone(), m.info.clone()))
                .collect()
        })
        .await
    }
}
