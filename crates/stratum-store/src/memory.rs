//! In-memory registrar.
//!
//! Used when the master runs without a replicated log and in tests. State is
//! lost on restart.

use parking_lot::Mutex;

use crate::error::Result;
use crate::types::{Registry, RegistryOperation};
use crate::Registrar;

/// Registrar keeping the registry in process memory.
#[derive(Debug, Default)]
pub struct MemoryRegistrar {
    registry: Mutex<Registry>,
}

impl MemoryRegistrar {
    /// Create an empty registrar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registrar pre-populated with `registry`.
    #[must_use]
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry: Mutex::new(registry),
        }
    }
}

impl Registrar for MemoryRegistrar {
    fn recover(&self) -> Result<Registry> {
        Ok(self.registry.lock().clone())
    }

    fn apply(&self, operation: &RegistryOperation) -> Result<bool> {
        Ok(self.registry.lock().apply(operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{MachineId, Schedule, Unavailability, Window};

    #[test]
    fn applies_in_memory() {
        let registrar = MemoryRegistrar::new();
        let schedule = Schedule {
            windows: vec![Window {
                machine_ids: vec![MachineId::hostname("a")],
                unavailability: Unavailability::new(0, None),
            }],
        };

        assert!(registrar
            .apply(&RegistryOperation::UpdateSchedule(schedule.clone()))
            .unwrap());

        let registry = registrar.recover().unwrap();
        assert_eq!(registry.schedule(), Some(&schedule));
        assert_eq!(registry.machines.len(), 1);
    }
}
