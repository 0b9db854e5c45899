//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// The maintenance schedule, stored under a single key.
    pub const SCHEDULES: &str = "schedules";

    /// Machine maintenance records, keyed by the encoded machine id.
    pub const MACHINES: &str = "machines";
}

/// Key of the current schedule in the `schedules` column family.
pub const CURRENT_SCHEDULE: &[u8] = b"current";

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::SCHEDULES, cf::MACHINES]
}
