//! Application bring-up: config, database pool, stores, and the fleet.
//!
//! Grounded in the teacher's `App::new` (previously in this file): load
//! config, open the Postgres pool, run migrations, construct the domain
//! layer, then register and spawn services.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use figment::value::UncasedStr;
use figment::{Figment, providers::Env};
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::{
    ConnectionFactory, CredentialCipher, CredentialStore, FleetLimits, FleetManager, PairingCoordinator, ProtocolSocket,
    SessionId, SessionStore, SocketConfig, SocketEvent,
};
use crate::db::{MongoSessionBacking, PostgresCredentialBacking, PostgresSessionBacking};
use crate::services::manager::ServiceManager;
use crate::services::web::WebService;
use crate::state::AppState;
use crate::status::ServiceStatusRegistry;

/// Placeholder socket used until a real chat-protocol client is wired in.
/// The protocol library itself is out of scope (named only by interface);
/// this adapter satisfies `ConnectionFactory`/`ProtocolSocket` so the fleet
/// runs end to end against something, and is the integration seam a real
/// backend plugs into.
struct UnimplementedSocket;

#[async_trait]
impl ProtocolSocket for UnimplementedSocket {
    async fn connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn request_pairing_code(&self, _phone_number: &str) -> Result<String, crate::core::errors::PairingError> {
        Err(crate::core::errors::PairingError::UpstreamRejected(
            "no chat-protocol backend configured".to_owned(),
        ))
    }

    async fn close(&self) {}
}

struct UnimplementedConnectionFactory;

#[async_trait]
impl ConnectionFactory for UnimplementedConnectionFactory {
    async fn create(
        &self,
        _session_id: &SessionId,
        _config: &SocketConfig,
    ) -> anyhow::Result<(Box<dyn ProtocolSocket>, mpsc::Receiver<SocketEvent>)> {
        let (_tx, rx) = mpsc::channel(1);
        Ok((Box::new(UnimplementedSocket), rx))
    }
}

/// Application struct holding all necessary components for the fleet's
/// lifetime.
pub struct App {
    config: Config,
    db_pool: sqlx::PgPool,
    fleet: Arc<FleetManager>,
    session_store: Arc<SessionStore>,
    credential_store: Arc<CredentialStore>,
    pairing: Arc<PairingCoordinator>,
    service_statuses: ServiceStatusRegistry,
    service_manager: ServiceManager,
}

impl App {
    /// Create a new App instance with all necessary components initialized.
    pub async fn new() -> Result<Self, anyhow::Error> {
        let config: Config = Figment::new()
            .merge(Env::raw().map(|k| {
                if k == UncasedStr::new("RAILWAY_DEPLOYMENT_DRAINING_SECONDS") {
                    "SHUTDOWN_TIMEOUT".into()
                } else {
                    k.into()
                }
            }))
            .extract()
            .context("Failed to load config")?;

        let is_private = config.database_url.contains("railway.internal");
        let slow_threshold = Duration::from_millis(if is_private { 200 } else { 500 });

        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(10)
            .acquire_slow_threshold(slow_threshold)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect(&config.database_url)
            .await
            .context("Failed to create database pool")?;

        info!(
            is_private = is_private,
            slow_threshold = format!("{:.2?}", slow_threshold),
            "database pool established"
        );

        info!("running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        info!("database migrations completed");

        let key_bytes = decode_encryption_key(&config.session_encryption_key)
            .context("SESSION_ENCRYPTION_KEY must be 32 bytes, base64 or hex encoded")?;
        let cipher = CredentialCipher::new(&key_bytes).context("failed to initialize credential cipher")?;

        let credential_backing = Arc::new(PostgresCredentialBacking::new(db_pool.clone(), cipher));
        let credential_store = Arc::new(CredentialStore::new(credential_backing));

        let session_primary = Arc::new(PostgresSessionBacking::new(db_pool.clone()));
        let session_secondary: Option<Arc<dyn crate::core::SessionBacking>> = match &config.mongo_url {
            Some(uri) => {
                let backing = MongoSessionBacking::connect(uri, "fleetd")
                    .await
                    .context("failed to connect to MongoDB secondary session backing")?;
                info!("connected secondary session backing (MongoDB)");
                Some(Arc::new(backing))
            }
            None => None,
        };
        let session_store = Arc::new(SessionStore::new(session_primary, session_secondary));

        let pairing = Arc::new(PairingCoordinator::new());
        let service_statuses = ServiceStatusRegistry::new();

        let connection_factory: Arc<dyn ConnectionFactory> = Arc::new(UnimplementedConnectionFactory);
        let statuses_for_hook = service_statuses.clone();
        let on_handover_timeout: Arc<dyn Fn(&SessionId) + Send + Sync> = Arc::new(move |session_id: &SessionId| {
            warn!(
                session_id = %session_id,
                "no worker-tier claim within the handover window, session stays web-tier"
            );
            statuses_for_hook.set("fleet", crate::status::ServiceStatus::Active);
        });

        let fleet = Arc::new(FleetManager::new(
            FleetLimits {
                max_sessions: config.max_sessions,
            },
            connection_factory,
            SocketConfig::default(),
            session_store.clone(),
            credential_store.clone(),
            pairing.clone(),
            on_handover_timeout,
        ));

        Ok(App {
            config,
            db_pool,
            fleet,
            session_store,
            credential_store,
            pairing,
            service_statuses,
            service_manager: ServiceManager::new(),
        })
    }

    /// Replay persisted sessions and register the web service.
    pub async fn setup_services(&mut self) -> Result<(), anyhow::Error> {
        self.fleet.bootstrap().await.context("fleet bootstrap failed")?;

        let app_state = AppState::new(
            self.fleet.clone(),
            self.session_store.clone(),
            self.credential_store.clone(),
            self.pairing.clone(),
            self.db_pool.clone(),
            &self.config,
            self.service_statuses.clone(),
        );

        let web_service = Box::new(WebService::new(self.config.port, app_state, self.fleet.clone()));
        self.service_manager.register_service("web", web_service);
        Ok(())
    }

    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    pub async fn run(self) -> ExitCode {
        use crate::signals::handle_shutdown_signals;
        handle_shutdown_signals(self.service_manager, self.config.shutdown_timeout).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Decode `SESSION_ENCRYPTION_KEY` as hex first, falling back to base64.
///
/// A 64-char all-hex string is also valid base64 (it decodes to 48 bytes),
/// so base64-first would silently accept the canonical hex key and then
/// fail the 32-byte check in `CredentialCipher::new` instead of decoding it
/// correctly here.
fn decode_encryption_key(raw: &str) -> anyhow::Result<Vec<u8>> {
    use base64::Engine;

    let looks_like_hex = !raw.is_empty() && raw.len() % 2 == 0 && raw.bytes().all(|b| b.is_ascii_hexdigit());
    if looks_like_hex
        && let Ok(bytes) = (0..raw.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&raw[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
    {
        return Ok(bytes);
    }

    base64::engine::general_purpose::STANDARD
        .decode(raw)
        .context("key is neither valid hex nor valid base64")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_canonical_64_char_hex_key_to_32_bytes() {
        let hex_key = "00".repeat(32);
        let bytes = decode_encryption_key(&hex_key).unwrap();
        assert_eq!(bytes, vec![0u8; 32]);
    }

    #[test]
    fn decodes_a_32_byte_base64_key() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        let bytes = decode_encryption_key(&encoded).unwrap();
        assert_eq!(bytes, vec![7u8; 32]);
    }

    #[test]
    fn rejects_garbage_input() {
        assert!(decode_encryption_key("not a key").is_err());
    }
}
