use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, trace, warn};

use super::Service;
use crate::core::{CredentialStore, FleetManager};
use crate::state::AppState;
use crate::status::ServiceStatus;
use crate::web::create_router;

/// Web server service implementation: serves the REST surface and keeps
/// the fleet's database health reflected in `ServiceStatusRegistry`.
pub struct WebService {
    port: u16,
    app_state: AppState,
    fleet: Arc<FleetManager>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl WebService {
    pub fn new(port: u16, app_state: AppState, fleet: Arc<FleetManager>) -> Self {
        Self {
            port,
            app_state,
            fleet,
            shutdown_tx: None,
        }
    }

    /// Periodically pings the database and updates the "database" service status.
    async fn db_health_check_loop(state: AppState, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(Duration::from_secs(30));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let status = match sqlx::query_scalar::<_, i32>("SELECT 1")
                        .fetch_one(&state.db_pool)
                        .await
                    {
                        Ok(_) => ServiceStatus::Connected,
                        Err(e) => {
                            warn!(error = %e, "DB health check failed");
                            ServiceStatus::Error
                        }
                    };
                    state.service_statuses.set("database", status);
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    /// Periodically logs fleet-wide stats (spec §4.6 `Stats()`).
    async fn fleet_stats_loop(fleet: Arc<FleetManager>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(Duration::from_secs(60));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let stats = fleet.stats().await;
                    info!(
                        total = stats.total,
                        connected = stats.connected,
                        reconnecting = stats.reconnecting,
                        capacity = stats.capacity,
                        "fleet stats"
                    );
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    /// Evicts credential cache entries idle longer than the eviction age
    /// (spec §4.1: every 120s, evict entries older than 300s).
    async fn credential_maintenance_loop(credential_store: Arc<CredentialStore>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(CredentialStore::maintenance_interval());

        loop {
            tokio::select! {
                _ = interval.tick() => credential_store.evict_stale(),
                _ = shutdown_rx.recv() => break,
            }
        }
    }
}

#[async_trait::async_trait]
impl Service for WebService {
    fn name(&self) -> &'static str {
        "web"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        let app = create_router(self.app_state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;
        self.app_state.service_statuses.set("web", ServiceStatus::Active);
        info!(
            service = "web",
            address = %addr,
            link = format!("http://localhost:{}", addr.port()),
            "web server listening"
        );

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let health_state = self.app_state.clone();
        let health_shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            Self::db_health_check_loop(health_state, health_shutdown_rx).await;
        });

        let stats_fleet = self.fleet.clone();
        let stats_shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            Self::fleet_stats_loop(stats_fleet, stats_shutdown_rx).await;
        });

        let maintenance_credential_store = self.app_state.credential_store.clone();
        let maintenance_shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            Self::credential_maintenance_loop(maintenance_credential_store, maintenance_shutdown_rx).await;
        });

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                trace!(service = "web", "received shutdown signal, starting graceful shutdown");
            })
            .await?;

        trace!(service = "web", "graceful shutdown completed");
        info!(service = "web", "web server stopped");

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
            trace!(service = "web", "sent shutdown signal to axum");
        } else {
            warn!(service = "web", "no shutdown channel found, cannot trigger graceful shutdown");
        }

        match self.fleet.shutdown_all(Duration::from_secs(5)).await {
            Ok(elapsed) => info!(elapsed = format!("{elapsed:.2?}"), "fleet stores flushed"),
            Err(pending) => warn!(pending = pending.len(), "fleet shutdown timed out for some sessions"),
        }
        Ok(())
    }
}
