//! Operator authentication.
//!
//! [`Principal`] authenticates the `Authorization: Basic …` header against
//! the configured credentials. Without credentials every request is
//! anonymous.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::error::ApiError;
use crate::state::GatewayState;

/// The authenticated principal of a request, `None` when anonymous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub Option<String>);

#[async_trait]
impl FromRequestParts<Arc<GatewayState>> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let principal = stratum_auth::authenticate(state.credentials.as_deref(), header)?;
        Ok(Self(principal))
    }
}
