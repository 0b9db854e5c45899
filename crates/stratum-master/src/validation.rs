//! Validation of resource operations against an agent.
//!
//! These checks run before any offer is rescinded or any resource changes
//! hands. They return a human-readable reason; callers attach the operation
//! type.

use std::collections::BTreeSet;

use stratum_core::{Operation, Resources};

/// Validate a RESERVE request made by `principal`.
///
/// # Errors
///
/// Returns the reason the reservation is invalid.
pub fn validate_reserve(resources: &Resources, principal: Option<&str>) -> Result<(), String> {
    resources.validate().map_err(|e| e.to_string())?;

    for resource in resources {
        if !resource.is_dynamically_reserved() {
            return Err(format!("Resource {resource} is not dynamically reserved"));
        }

        let Some(principal) = principal else {
            continue;
        };

        match resource
            .reservation
            .as_ref()
            .and_then(|r| r.principal.as_deref())
        {
            None => {
                return Err(format!(
                    "A reserve operation was attempted by principal '{principal}', but there \
                     is a reserved resource in the request with no principal set"
                ));
            }
            Some(reserved_by) if reserved_by != principal => {
                return Err(format!(
                    "A reserve operation was attempted by principal '{principal}', but there \
                     is a reserved resource in the request with principal '{reserved_by}' set"
                ));
            }
            Some(_) => {}
        }
    }

    Ok(())
}

/// Validate an UNRESERVE request.
///
/// # Errors
///
/// Returns the reason the request is invalid.
pub fn validate_unreserve(resources: &Resources) -> Result<(), String> {
    resources.validate().map_err(|e| e.to_string())?;

    for resource in resources {
        if !resource.is_dynamically_reserved() {
            return Err(format!("Resource {resource} is not dynamically reserved"));
        }
        if resource.is_persistent_volume() {
            return Err(format!(
                "A dynamically reserved persistent volume {resource} cannot be unreserved \
                 directly. Please destroy the persistent volume first then unreserve the resource"
            ));
        }
    }

    Ok(())
}

/// Validate a CREATE request against the agent's checkpointed resources.
///
/// # Errors
///
/// Returns the reason the volumes cannot be created.
pub fn validate_create(
    volumes: &Resources,
    checkpointed: &Resources,
    checkpoint: bool,
) -> Result<(), String> {
    if !checkpoint {
        return Err("Agent does not have checkpointing enabled".into());
    }

    volumes.validate().map_err(|e| e.to_string())?;

    let existing: BTreeSet<&str> = checkpointed
        .iter()
        .filter_map(|r| r.persistence_id())
        .collect();
    let mut requested = BTreeSet::new();

    for volume in volumes {
        let disk = volume
            .disk
            .as_ref()
            .ok_or_else(|| format!("Resource {volume} does not have DiskInfo"))?;
        let persistence = disk
            .persistence
            .as_ref()
            .ok_or_else(|| format!("Resource {volume} does not have a persistence ID"))?;
        if disk.volume.is_none() {
            return Err(format!("Resource {volume} does not have volume information"));
        }

        let id = persistence.id.as_str();
        if id.is_empty() {
            return Err(format!("Resource {volume} has an empty persistence ID"));
        }
        if existing.contains(id) {
            return Err(format!("Persistence ID '{id}' already exists"));
        }
        if !requested.insert(id) {
            return Err(format!("Persistence ID '{id}' is not unique in the request"));
        }
    }

    Ok(())
}

/// Validate a DESTROY request against the agent's checkpointed resources.
///
/// # Errors
///
/// Returns the reason the volumes cannot be destroyed.
pub fn validate_destroy(
    volumes: &Resources,
    checkpointed: &Resources,
    checkpoint: bool,
) -> Result<(), String> {
    if !checkpoint {
        return Err("Agent does not have checkpointing enabled".into());
    }

    volumes.validate().map_err(|e| e.to_string())?;

    for volume in volumes {
        if !volume.is_persistent_volume() {
            return Err(format!("Resource {volume} is not a persistent volume"));
        }
    }

    if !checkpointed.contains(volumes) {
        return Err("Persistent volumes not found".into());
    }

    Ok(())
}

/// Validate any non-launch operation.
///
/// # Errors
///
/// Returns the reason the operation is invalid.
pub fn validate_operation(
    operation: &Operation,
    checkpointed: &Resources,
    checkpoint: bool,
    principal: Option<&str>,
) -> Result<(), String> {
    match operation {
        Operation::Launch { .. } => Ok(()),
        Operation::Reserve { resources } => validate_reserve(resources, principal),
        Operation::Unreserve { resources } => validate_unreserve(resources),
        Operation::Create { volumes } => validate_create(volumes, checkpointed, checkpoint),
        Operation::Destroy { volumes } => validate_destroy(volumes, checkpointed, checkpoint),
    }
}
