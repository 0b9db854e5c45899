//! Scalar resource algebra.
//!
//! A [`Resources`] bundle is a normalized multiset of [`Resource`] entries: two
//! entries with the same name, role, reservation, and disk information are
//! merged into one, except persistent volumes which are never merged or split.
//! Scalar values are kept at millesimal precision so repeated arithmetic does
//! not accumulate floating point drift.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::operation::Operation;

/// The role of resources that are not reserved for anyone.
pub const DEFAULT_ROLE: &str = "*";

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

/// Round a scalar to the precision used by the resource algebra.
fn normalize(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// The value type of a resource. Only scalars are supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    /// A single floating point quantity.
    #[default]
    Scalar,
}

/// A scalar quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scalar {
    /// The quantity.
    pub value: f64,
}

/// Dynamic reservation metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationInfo {
    /// Principal that made the reservation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
}

/// Identity of a persistent volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Persistence {
    /// Volume identifier, unique per role on an agent.
    pub id: String,
}

/// Access mode of a mounted volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeMode {
    /// Read-write.
    Rw,
    /// Read-only.
    Ro,
}

/// Where a volume is mounted inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Volume {
    /// Path inside the container.
    pub container_path: String,
    /// Access mode.
    pub mode: VolumeMode,
}

/// Disk-specific resource information.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiskInfo {
    /// Set for persistent volumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<Persistence>,
    /// Mount information for persistent volumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<Volume>,
}

/// A single named resource quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource name, e.g. `cpus`, `mem`, `disk`.
    pub name: String,
    /// Value type.
    #[serde(rename = "type", default)]
    pub kind: ValueType,
    /// The quantity.
    pub scalar: Scalar,
    /// Role the resource is reserved for, `*` when unreserved.
    #[serde(default = "default_role")]
    pub role: String,
    /// Present for dynamically reserved resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation: Option<ReservationInfo>,
    /// Present for disk resources carrying volume information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskInfo>,
}

impl Resource {
    /// Create an unreserved scalar resource.
    #[must_use]
    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            kind: ValueType::Scalar,
            scalar: Scalar {
                value: normalize(value),
            },
            role: default_role(),
            reservation: None,
            disk: None,
        }
    }

    /// Return this resource dynamically reserved for `role` by `principal`.
    #[must_use]
    pub fn reserved(mut self, role: impl Into<String>, principal: Option<&str>) -> Self {
        self.role = role.into();
        self.reservation = Some(ReservationInfo {
            principal: principal.map(ToString::to_string),
        });
        self
    }

    /// Return this resource turned into a persistent volume.
    #[must_use]
    pub fn persistent(mut self, id: impl Into<String>, container_path: impl Into<String>) -> Self {
        self.disk = Some(DiskInfo {
            persistence: Some(Persistence { id: id.into() }),
            volume: Some(Volume {
                container_path: container_path.into(),
                mode: VolumeMode::Rw,
            }),
        });
        self
    }

    /// The scalar quantity.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.scalar.value
    }

    /// Whether the resource belongs to the default role.
    #[must_use]
    pub fn is_unreserved(&self) -> bool {
        self.role == DEFAULT_ROLE && self.reservation.is_none()
    }

    /// Whether the resource carries a dynamic reservation.
    #[must_use]
    pub const fn is_dynamically_reserved(&self) -> bool {
        self.reservation.is_some()
    }

    /// Whether the resource is a persistent volume.
    #[must_use]
    pub fn is_persistent_volume(&self) -> bool {
        self.disk.as_ref().is_some_and(|d| d.persistence.is_some())
    }

    /// The persistence id for persistent volumes.
    #[must_use]
    pub fn persistence_id(&self) -> Option<&str> {
        self.disk
            .as_ref()
            .and_then(|d| d.persistence.as_ref())
            .map(|p| p.id.as_str())
    }

    /// The same quantity in the default role without reservation.
    #[must_use]
    pub fn flattened(&self) -> Self {
        Self {
            role: default_role(),
            reservation: None,
            ..self.clone()
        }
    }

    /// The same quantity without disk information.
    #[must_use]
    pub fn without_disk(&self) -> Self {
        Self {
            disk: None,
            ..self.clone()
        }
    }

    /// Check the structural rules of a single resource.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidResource` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CoreError::InvalidResource("empty resource name".into()));
        }

        if !self.scalar.value.is_finite() || self.scalar.value < 0.0 {
            return Err(CoreError::InvalidResource(format!(
                "invalid scalar value {} for '{}'",
                self.scalar.value, self.name
            )));
        }

        if self.role.is_empty() {
            return Err(CoreError::InvalidResource(format!(
                "empty role for '{}'",
                self.name
            )));
        }

        if self.role == DEFAULT_ROLE && self.reservation.is_some() {
            return Err(CoreError::InvalidResource(format!(
                "'{}' in role '*' cannot be dynamically reserved",
                self.name
            )));
        }

        if self.disk.is_some() && self.name != "disk" {
            return Err(CoreError::InvalidResource(format!(
                "'{}' is not a disk resource but carries disk information",
                self.name
            )));
        }

        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.scalar.value <= 0.0
    }

    /// Same name, role, reservation, and disk information.
    fn same_shape(&self, other: &Self) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.role == other.role
            && self.reservation == other.reservation
            && self.disk == other.disk
    }

    fn addable(&self, other: &Self) -> bool {
        self.same_shape(other) && !self.is_persistent_volume()
    }

    fn subtractable(&self, other: &Self) -> bool {
        if !self.same_shape(other) {
            return false;
        }

        // Persistent volumes can only be removed whole.
        !self.is_persistent_volume() || self.scalar.value == other.scalar.value
    }

    fn covers(&self, other: &Self) -> bool {
        self.subtractable(other) && self.scalar.value >= other.scalar.value
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}", self.name, self.role)?;
        if let Some(principal) = self.reservation.as_ref().and_then(|r| r.principal.as_ref()) {
            write!(f, ", {principal}")?;
        }
        write!(f, ")")?;
        if let Some(disk) = &self.disk {
            if let Some(persistence) = &disk.persistence {
                write!(f, "[{}", persistence.id)?;
                if let Some(volume) = &disk.volume {
                    write!(f, ":{}", volume.container_path)?;
                }
                write!(f, "]")?;
            }
        }
        write!(f, ":{}", self.scalar.value)
    }
}

/// A normalized bundle of resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Resource>", into = "Vec<Resource>")]
pub struct Resources(Vec<Resource>);

impl Resources {
    /// Create an empty bundle.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Iterate over the normalized entries.
    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.0.iter()
    }

    /// Whether the bundle holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of normalized entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Sum of every entry with the given name, regardless of role.
    #[must_use]
    pub fn scalar(&self, name: &str) -> f64 {
        normalize(
            self.0
                .iter()
                .filter(|r| r.name == name)
                .map(Resource::value)
                .sum(),
        )
    }

    /// Validate every entry.
    ///
    /// # Errors
    ///
    /// Returns the first invalid entry's error.
    pub fn validate(&self) -> Result<()> {
        self.0.iter().try_for_each(Resource::validate)
    }

    /// Add a single resource, merging it into an existing entry when possible.
    pub fn add_resource(&mut self, resource: &Resource) {
        if resource.is_empty() {
            return;
        }

        if let Some(existing) = self.0.iter_mut().find(|r| r.addable(resource)) {
            existing.scalar.value = normalize(existing.scalar.value + resource.scalar.value);
        } else {
            let mut resource = resource.clone();
            resource.scalar.value = normalize(resource.scalar.value);
            self.0.push(resource);
        }
    }

    /// Subtract a single resource. Subtracting something not held is a no-op,
    /// and an entry that drops to zero is removed.
    pub fn subtract_resource(&mut self, resource: &Resource) {
        if resource.is_empty() {
            return;
        }

        if let Some(index) = self.0.iter().position(|r| r.subtractable(resource)) {
            let remaining = normalize(self.0[index].scalar.value - resource.scalar.value);
            if self.0[index].is_persistent_volume() || remaining <= 0.0 {
                self.0.remove(index);
            } else {
                self.0[index].scalar.value = remaining;
            }
        }
    }

    /// Whether a single resource is fully covered by this bundle.
    #[must_use]
    pub fn contains_resource(&self, resource: &Resource) -> bool {
        resource.is_empty() || self.0.iter().any(|r| r.covers(resource))
    }

    /// Whether every resource of `other` is covered by this bundle.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        let mut remaining = self.clone();
        for resource in &other.0 {
            if !remaining.contains_resource(resource) {
                return false;
            }
            remaining.subtract_resource(resource);
        }
        true
    }

    /// Keep only entries matching the predicate.
    #[must_use]
    pub fn filter(&self, predicate: impl Fn(&Resource) -> bool) -> Self {
        self.0.iter().filter(|r| predicate(r)).cloned().collect()
    }

    /// Every entry moved to the default role without reservation.
    #[must_use]
    pub fn flatten(&self) -> Self {
        self.0.iter().map(Resource::flattened).collect()
    }

    /// Every entry with disk information removed.
    #[must_use]
    pub fn strip_disk(&self) -> Self {
        self.0.iter().map(Resource::without_disk).collect()
    }

    /// Entries an agent must checkpoint: dynamic reservations and persistent volumes.
    #[must_use]
    pub fn checkpointed(&self) -> Self {
        self.filter(|r| r.is_dynamically_reserved() || r.is_persistent_volume())
    }

    /// Persistent volumes only.
    #[must_use]
    pub fn persistent_volumes(&self) -> Self {
        self.filter(Resource::is_persistent_volume)
    }

    /// Apply an operation, returning the transformed bundle.
    ///
    /// Launching tasks does not change the bundle. The function is pure: on
    /// failure `self` is untouched and no partial result is returned.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::OperationFailed` when the bundle does not hold what
    /// the operation consumes or the operation input is malformed.
    pub fn apply(&self, operation: &Operation) -> Result<Self> {
        let mut result = self.clone();

        match operation {
            Operation::Launch { .. } => {}
            Operation::Reserve { resources } => {
                for resource in resources.iter() {
                    if !resource.is_dynamically_reserved() {
                        return Err(CoreError::OperationFailed(format!(
                            "Invalid RESERVE Operation: {resource} is not dynamically reserved"
                        )));
                    }

                    let unreserved = resource.flattened();
                    if !result.contains_resource(&unreserved) {
                        return Err(CoreError::OperationFailed(format!(
                            "Invalid RESERVE Operation: {result} does not contain {unreserved}"
                        )));
                    }

                    result.subtract_resource(&unreserved);
                    result.add_resource(resource);
                }
            }
            Operation::Unreserve { resources } => {
                for resource in resources.iter() {
                    if !resource.is_dynamically_reserved() {
                        return Err(CoreError::OperationFailed(format!(
                            "Invalid UNRESERVE Operation: {resource} is not dynamically reserved"
                        )));
                    }

                    if !result.contains_resource(resource) {
                        return Err(CoreError::OperationFailed(format!(
                            "Invalid UNRESERVE Operation: {result} does not contain {resource}"
                        )));
                    }

                    result.subtract_resource(resource);
                    result.add_resource(&resource.flattened());
                }
            }
            Operation::Create { volumes } => {
                for volume in volumes.iter() {
                    if !volume.is_persistent_volume() {
                        return Err(CoreError::OperationFailed(format!(
                            "Invalid CREATE Operation: {volume} is not a persistent volume"
                        )));
                    }

                    let stripped = volume.without_disk();
                    if !result.contains_resource(&stripped) {
                        return Err(CoreError::OperationFailed(format!(
                            "Insufficient disk resources: {result} does not contain {stripped}"
                        )));
                    }

                    result.subtract_resource(&stripped);
                    result.add_resource(volume);
                }
            }
            Operation::Destroy { volumes } => {
                for volume in volumes.iter() {
                    if !volume.is_persistent_volume() {
                        return Err(CoreError::OperationFailed(format!(
                            "Invalid DESTROY Operation: {volume} is not a persistent volume"
                        )));
                    }

                    if !result.contains_resource(volume) {
                        return Err(CoreError::OperationFailed(format!(
                            "Invalid DESTROY Operation: persistent volume {volume} does not exist"
                        )));
                    }

                    result.subtract_resource(volume);
                    result.add_resource(&volume.without_disk());
                }
            }
        }

        Ok(result)
    }
}

impl PartialEq for Resources {
    fn eq(&self, other: &Self) -> bool {
        self.contains(other) && other.contains(self)
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for resource in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            first = false;
            write!(f, "{resource}")?;
        }
        Ok(())
    }
}

impl From<Vec<Resource>> for Resources {
    fn from(resources: Vec<Resource>) -> Self {
        resources.into_iter().collect()
    }
}

impl From<Resources> for Vec<Resource> {
    fn from(resources: Resources) -> Self {
        resources.0
    }
}

impl FromIterator<Resource> for Resources {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        let mut resources = Self::new();
        for resource in iter {
            resources.add_resource(&resource);
        }
        resources
    }
}

impl<'a> IntoIterator for &'a Resources {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl AddAssign<&Resources> for Resources {
    fn add_assign(&mut self, other: &Resources) {
        for resource in &other.0 {
            self.add_resource(resource);
        }
    }
}

impl SubAssign<&Resources> for Resources {
    fn sub_assign(&mut self, other: &Resources) {
        for resource in &other.0 {
            self.subtract_resource(resource);
        }
    }
}

impl Add<&Resources> for &Resources {
    type Output = Resources;

    fn add(self, other: &Resources) -> Resources {
        let mut result = self.clone();
        result += other;
        result
    }
}

impl Sub<&Resources> for &Resources {
    type Output = Resources;

    fn sub(self, other: &Resources) -> Resources {
        let mut result = self.clone();
        result -= other;
        result
    }
}
