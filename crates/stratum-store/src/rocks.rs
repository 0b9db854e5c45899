//! `RocksDB` registrar implementation.
//!
//! This module provides the `RocksRegistrar` implementation of the `Registrar` trait.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};
use stratum_core::{MachineInfo, Schedule};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf, CURRENT_SCHEDULE};
use crate::types::{Registry, RegistryOperation};
use crate::Registrar;

/// RocksDB-backed registrar.
///
/// The registry is small, so a copy is cached in memory and every mutation
/// is written as one batch.
pub struct RocksRegistrar {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    cache: Mutex<Registry>,
}

impl RocksRegistrar {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or its contents
    /// cannot be decoded.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let registrar = Self {
            db: Arc::new(db),
            cache: Mutex::new(Registry::default()),
        };

        let registry = registrar.load()?;
        *registrar.cache.lock() = registry;

        Ok(registrar)
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read the registry from disk.
    fn load(&self) -> Result<Registry> {
        let cf_schedules = self.cf(cf::SCHEDULES)?;
        let cf_machines = self.cf(cf::MACHINES)?;

        let schedules = self
            .db
            .get_cf(&cf_schedules, CURRENT_SCHEDULE)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize::<Schedule>(&data))
            .transpose()?
            .into_iter()
            .collect();

        let mut machines = Vec::new();
        for item in self.db.iterator_cf(&cf_machines, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let info: MachineInfo = Self::deserialize(&value)?;
            machines.push(info);
        }

        Ok(Registry {
            schedules,
            machines,
        })
    }

    /// Write `next` over `previous` in one batch.
    fn write(&self, previous: &Registry, next: &Registry) -> Result<()> {
        let cf_schedules = self.cf(cf::SCHEDULES)?;
        let cf_machines = self.cf(cf::MACHINES)?;

        let mut batch = WriteBatch::default();

        match next.schedule() {
            Some(schedule) => {
                batch.put_cf(&cf_schedules, CURRENT_SCHEDULE, Self::serialize(schedule)?);
            }
            None => batch.delete_cf(&cf_schedules, CURRENT_SCHEDULE),
        }

        for info in &previous.machines {
            if !next.machines.iter().any(|m| m.id == info.id) {
                batch.delete_cf(&cf_machines, keys::machine_key(&info.id));
            }
        }

        for info in &next.machines {
            batch.put_cf(&cf_machines, keys::machine_key(&info.id), Self::serialize(info)?);
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

impl Registrar for RocksRegistrar {
    fn recover(&self) -> Result<Registry> {
        let registry = self.load()?;
        *self.cache.lock() = registry.clone();
        Ok(registry)
    }

    fn apply(&self, operation: &RegistryOperation) -> Result<bool> {
        let mut cache = self.cache.lock();

        let mut next = cache.clone();
        if !next.apply(operation) {
            return Ok(false);
        }

        self.write(&cache, &next)?;
        *cache = next;

        tracing::debug!(operation = operation.name(), "Registry updated");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{MachineId, MachineMode, Unavailability, Window};
    use tempfile::TempDir;

    fn create_test_registrar() -> (RocksRegistrar, TempDir) {
        let dir = TempDir::new().unwrap();
        let registrar = RocksRegistrar::open(dir.path()).unwrap();
        (registrar, dir)
    }

    fn schedule(names: &[&str]) -> Schedule {
        Schedule {
            windows: vec![Window {
                machine_ids: names.iter().map(|n| MachineId::hostname(n)).collect(),
                unavailability: Unavailability::new(1_000, Some(60)),
            }],
        }
    }

    #[test]
    fn empty_registry() {
        let (registrar, _dir) = create_test_registrar();
        assert_eq!(registrar.recover().unwrap(), Registry::default());
    }

    #[test]
    fn schedule_survives_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let registrar = RocksRegistrar::open(dir.path()).unwrap();
            let changed = registrar
                .apply(&RegistryOperation::UpdateSchedule(schedule(&["a", "b"])))
                .unwrap();
            assert!(changed);
            registrar
                .apply(&RegistryOperation::StartMaintenance(vec![MachineId::hostname("a")]))
                .unwrap();
        }

        let registrar = RocksRegistrar::open(dir.path()).unwrap();
        let registry = registrar.recover().unwrap();

        assert_eq!(registry.schedule(), Some(&schedule(&["a", "b"])));
        assert_eq!(registry.machines.len(), 2);

        let a = registry
            .machines
            .iter()
            .find(|m| m.id == MachineId::hostname("a"))
            .unwrap();
        assert_eq!(a.mode, MachineMode::Down);
    }

    #[test]
    fn removed_machines_are_deleted() {
        let (registrar, _dir) = create_test_registrar();

        registrar
            .apply(&RegistryOperation::UpdateSchedule(schedule(&["a", "b"])))
            .unwrap();
        registrar
            .apply(&RegistryOperation::UpdateSchedule(schedule(&["b"])))
            .unwrap();

        let registry = registrar.load().unwrap();
        assert_eq!(registry.machines.len(), 1);
        assert_eq!(registry.machines[0].id, MachineId::hostname("b"));
    }

    #[test]
    fn clearing_schedule_deletes_key() {
        let (registrar, _dir) = create_test_registrar();

        registrar
            .apply(&RegistryOperation::UpdateSchedule(schedule(&["a"])))
            .unwrap();
        registrar
            .apply(&RegistryOperation::UpdateSchedule(Schedule::default()))
            .unwrap();

        let registry = registrar.load().unwrap();
        assert!(registry.schedules.is_empty());
        assert!(registry.machines.is_empty());
    }

    #[test]
    fn unchanged_apply_reports_false() {
        let (registrar, _dir) = create_test_registrar();

        assert!(!registrar
            .apply(&RegistryOperation::StopMaintenance(vec![MachineId::hostname("x")]))
            .unwrap());
    }
}
