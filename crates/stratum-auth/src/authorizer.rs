//! ACL-based authorization.
//!
//! An ACL pairs a subject entity (the principal) with an object entity. For a
//! request, the first ACL whose entities both *match* decides: the request is
//! authorized if both entities are also *allowed*. When no ACL matches the
//! `permissive` flag decides.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{AuthError, Result};

/// An action to authorize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationRequest {
    /// Launch tasks as `user`.
    RunTask {
        /// The framework's principal, `None` when anonymous.
        principal: Option<String>,
        /// The user the tasks run as.
        user: Option<String>,
    },
    /// Tear down a framework.
    ShutdownFramework {
        /// The requesting principal, `None` when anonymous.
        principal: Option<String>,
        /// The principal the framework registered with.
        framework_principal: Option<String>,
    },
}

/// Trait for authorizing actions.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Decide whether the request is allowed.
    ///
    /// # Errors
    ///
    /// Returns an error if a decision cannot be made.
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<bool>;
}

// =============================================================================
// ACL definitions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum EntityType {
    Any,
    None,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(default)]
    values: Vec<String>,
    #[serde(default, rename = "type")]
    kind: Option<EntityType>,
}

/// One side of an ACL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "RawEntity")]
pub enum Entity {
    /// Matches anything, including anonymous requests.
    #[default]
    Any,
    /// Matches nothing specific; used to deny.
    None,
    /// Matches the listed names.
    Some(Vec<String>),
}

impl From<RawEntity> for Entity {
    fn from(raw: RawEntity) -> Self {
        match raw.kind {
            Some(EntityType::Any) => Self::Any,
            Some(EntityType::None) => Self::None,
            None if raw.values.is_empty() => Self::Any,
            None => Self::Some(raw.values),
        }
    }
}

impl Entity {
    /// Whether the ACL entity applies to the requested value.
    ///
    /// An anonymous request (`None`) is treated as "any" and only matches
    /// `Any` or `None` entities.
    fn matches(&self, request: Option<&str>) -> bool {
        match (request, self) {
            (None, Self::Some(_)) => false,
            (Some(value), Self::Some(values)) => values.iter().any(|v| v == value),
            (_, Self::Any | Self::None) => true,
        }
    }

    /// Whether the ACL entity permits the requested value.
    fn allows(&self, request: Option<&str>) -> bool {
        match (request, self) {
            (_, Self::None) | (None, Self::Some(_)) => false,
            (Some(value), Self::Some(values)) => values.iter().any(|v| v == value),
            (_, Self::Any) => true,
        }
    }
}

/// Who may run tasks as which users.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunTaskAcl {
    /// Framework principals.
    #[serde(default)]
    pub principals: Entity,
    /// Users the tasks run as.
    #[serde(default)]
    pub users: Entity,
}

/// Who may tear down frameworks of which principals.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShutdownFrameworkAcl {
    /// Requesting principals.
    #[serde(default)]
    pub principals: Entity,
    /// Principals of the frameworks being torn down.
    #[serde(default)]
    pub framework_principals: Entity,
}

/// The full ACL configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Acls {
    /// Decision when no ACL matches.
    #[serde(default = "default_permissive")]
    pub permissive: bool,
    /// ACLs for launching tasks.
    #[serde(default)]
    pub run_tasks: Vec<RunTaskAcl>,
    /// ACLs for tearing down frameworks.
    #[serde(default)]
    pub shutdown_frameworks: Vec<ShutdownFrameworkAcl>,
}

const fn default_permissive() -> bool {
    true
}

impl Default for Acls {
    fn default() -> Self {
        Self {
            permissive: default_permissive(),
            run_tasks: Vec::new(),
            shutdown_frameworks: Vec::new(),
        }
    }
}

impl Acls {
    /// Parse ACLs from JSON.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Load` if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AuthError::Load {
            what: "ACLs",
            reason: e.to_string(),
        })
    }

    /// Load ACLs from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Load` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| AuthError::Load {
            what: "ACLs",
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_json(&json)
    }
}

// =============================================================================
// Local authorizer
// =============================================================================

/// Authorizer evaluating a local ACL configuration.
#[derive(Debug, Clone, Default)]
pub struct LocalAuthorizer {
    acls: Acls,
}

impl LocalAuthorizer {
    /// Create an authorizer over `acls`.
    #[must_use]
    pub const fn new(acls: Acls) -> Self {
        Self { acls }
    }

    fn decide<'a>(
        &self,
        subject: Option<&str>,
        object: Option<&str>,
        acls: impl IntoIterator<Item = (&'a Entity, &'a Entity)>,
    ) -> bool {
        for (subjects, objects) in acls {
            if subjects.matches(subject) && objects.matches(object) {
                return subjects.allows(subject) && objects.allows(object);
            }
        }
        self.acls.permissive
    }
}

#[async_trait]
impl Authorizer for LocalAuthorizer {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<bool> {
        let allowed = match request {
            AuthorizationRequest::RunTask { principal, user } => self.decide(
                principal.as_deref(),
                user.as_deref(),
                self.acls.run_tasks.iter().map(|acl| (&acl.principals, &acl.users)),
            ),
            AuthorizationRequest::ShutdownFramework {
                principal,
                framework_principal,
            } => self.decide(
                principal.as_deref(),
                framework_principal.as_deref(),
                self.acls
                    .shutdown_frameworks
                    .iter()
                    .map(|acl| (&acl.principals, &acl.framework_principals)),
            ),
        };

        if !allowed {
            tracing::debug!(?request, "Authorization denied");
        }

        Ok(allowed)
    }
}

/// An authorizer returning a fixed answer, for testing.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Copy)]
pub struct StaticAuthorizer {
    /// The answer to every request.
    pub allow: bool,
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authorize(&self, _request: &AuthorizationRequest) -> Result<bool> {
        Ok(self.allow)
    }
}
