//! Shared application state passed to the control-channel handlers.

use std::sync::Arc;

use tether_domain::config::BrokerConfig;

use crate::handlers::routes::StaticRouteCatalog;
use crate::permissions::PermissionManager;
use crate::sessions::SessionManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BrokerConfig>,
    pub sessions: Arc<SessionManager>,
    pub permissions: Arc<PermissionManager>,
    /// Legacy static route catalog (`routes` / `set_active_route` /
    /// `set_stable_route`).
    pub static_routes: Arc<StaticRouteCatalog>,
}

impl AppState {
    pub fn new(
        config: Arc<BrokerConfig>,
        sessions: Arc<SessionManager>,
        permissions: Arc<PermissionManager>,
    ) -> Self {
        Self {
            config,
            sessions,
            permissions,
            static_routes: Arc::new(StaticRouteCatalog::new()),
        }
    }
}
