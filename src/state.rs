//! Application state shared across the web layer and the fleet.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::core::{CredentialStore, FleetManager, PairingCoordinator, SessionStore};
use crate::status::ServiceStatusRegistry;
use crate::web::rate_limit::ApiRateLimiters;

#[derive(Clone)]
pub struct AppState {
    pub fleet: Arc<FleetManager>,
    pub session_store: Arc<SessionStore>,
    pub credential_store: Arc<CredentialStore>,
    pub pairing: Arc<PairingCoordinator>,
    pub db_pool: PgPool,
    pub jwt_secret: Arc<str>,
    pub jwt_expiry: std::time::Duration,
    pub max_sessions: usize,
    pub rate_limiters: Arc<ApiRateLimiters>,
    pub service_statuses: ServiceStatusRegistry,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fleet: Arc<FleetManager>,
        session_store: Arc<SessionStore>,
        credential_store: Arc<CredentialStore>,
        pairing: Arc<PairingCoordinator>,
        db_pool: PgPool,
        config: &Config,
        service_statuses: ServiceStatusRegistry,
    ) -> Self {
        Self {
            fleet,
            session_store,
            credential_store,
            pairing,
            db_pool,
            jwt_secret: Arc::from(config.jwt_secret.as_str()),
            jwt_expiry: config.jwt_expiry,
            max_sessions: config.max_sessions,
            rate_limiters: Arc::new(ApiRateLimiters::new(&config.rate_limiting)),
            service_statuses,
        }
    }
}
