//! Gateway application state.

use std::sync::Arc;

use stratum_auth::Credentials;
use stratum_master::Master;

use crate::config::GatewayConfig;

/// Shared application state for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayState {
    /// The running master.
    pub master: Master,
    /// Operator credentials; requests are anonymous when absent.
    pub credentials: Option<Arc<Credentials>>,
    /// Gateway configuration.
    pub config: GatewayConfig,
}

impl GatewayState {
    /// Create a new gateway state.
    #[must_use]
    pub const fn new(
        master: Master,
        credentials: Option<Arc<Credentials>>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            master,
            credentials,
            config,
        }
    }
}
