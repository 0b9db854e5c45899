//! Registry storage for the stratum master.
//!
//! The registry holds the state that must survive a master failover: the
//! maintenance schedule and the mode of every machine under maintenance.
//!
//! # Architecture
//!
//! The `RocksDB` backend uses the following column families:
//!
//! - `schedules`: The current maintenance schedule, under the key `current`
//! - `machines`: Machine maintenance records, keyed by hostname and ip
//!
//! Values are CBOR-encoded.
//!
//! # Example
//!
//! ```no_run
//! use stratum_store::{Registrar, RegistryOperation, RocksRegistrar};
//! use stratum_core::Schedule;
//!
//! let registrar = RocksRegistrar::open("/tmp/stratum-registry").unwrap();
//! registrar
//!     .apply(&RegistryOperation::UpdateSchedule(Schedule::default()))
//!     .unwrap();
//! let registry = registrar.recover().unwrap();
//! assert!(registry.schedules.is_empty());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod memory;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::MemoryRegistrar;
pub use rocks::RocksRegistrar;
pub use types::{Registry, RegistryOperation};

/// The registrar trait: durable storage of the registry.
///
/// Calls are blocking; async callers should run them on a blocking thread.
pub trait Registrar: Send + Sync {
    /// Read the full registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn recover(&self) -> Result<Registry>;

    /// Apply an operation durably.
    ///
    /// Returns whether the registry changed. The change is visible to
    /// `recover` once this returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns an error if the change could not be persisted; the registry is
    /// then unchanged.
    fn apply(&self, operation: &RegistryOperation) -> Result<bool>;
}
