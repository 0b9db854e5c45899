//! Authentication and authorization for stratum.
//!
//! This crate provides the two security seams of the master:
//!
//! - HTTP Basic authentication against a configured credential list
//! - ACL-based authorization of task launches and framework teardown
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │   Gateway        │────▶│   Credentials    │  Basic header → principal
//! │   (HTTP)         │     └──────────────────┘
//! └────────┬─────────┘
//!          │
//! ┌────────▼─────────┐     ┌──────────────────┐
//! │   Master         │────▶│   Authorizer     │  request → bool
//! │                  │     │   (trait)        │
//! └──────────────────┘     └────────┬─────────┘
//!                                   │
//!                          ┌────────▼─────────┐
//!                          │ LocalAuthorizer  │
//!                          │ (ACLs)           │
//!                          └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use stratum_auth::{Acls, AuthorizationRequest, Authorizer, LocalAuthorizer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let acls = Acls::from_json(r#"{"permissive": false,
//!     "run_tasks": [{"principals": {"values": ["web"]}, "users": {"type": "ANY"}}]}"#)?;
//! let authorizer = LocalAuthorizer::new(acls);
//!
//! let request = AuthorizationRequest::RunTask {
//!     principal: Some("web".to_string()),
//!     user: Some("nobody".to_string()),
//! };
//! assert!(authorizer.authorize(&request).await?);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod authorizer;
pub mod credentials;
pub mod error;

pub use authorizer::{
    Acls, AuthorizationRequest, Authorizer, Entity, LocalAuthorizer, RunTaskAcl,
    ShutdownFrameworkAcl,
};
pub use credentials::{authenticate, Credential, Credentials};
pub use error::{AuthError, Result};

#[cfg(any(test, feature = "test-utils"))]
pub use authorizer::StaticAuthorizer;
