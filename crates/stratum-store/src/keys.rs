//! Key encoding utilities for `RocksDB`.

use stratum_core::MachineId;

/// Encode a machine key: `hostname || 0x00 || ip`.
///
/// Either part may be empty; the separator keeps a hostname-only id distinct
/// from an ip-only id with the same text.
#[must_use]
pub fn machine_key(id: &MachineId) -> Vec<u8> {
    let hostname = id.hostname.as_deref().unwrap_or_default();
    let ip = id.ip.as_deref().unwrap_or_default();

    let mut key = Vec::with_capacity(hostname.len() + ip.len() + 1);
    key.extend_from_slice(hostname.as_bytes());
    key.push(0);
    key.extend_from_slice(ip.as_bytes());
    key
}
