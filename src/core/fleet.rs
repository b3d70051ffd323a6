//! FleetManager (spec §4.6, component C6): the per-process registry of live
//! `SessionController`s.
//!
//! Grounded in the teacher's `ServiceManager` (`services/manager.rs`): a
//! registry of named long-running tasks with `spawn_all`/`run`/`shutdown`.
//! Here the registry is dynamic (sessions come and go at runtime) rather
//! than fixed at startup, so `FleetManager` wraps a `DashMap` of handles
//! instead of a `Vec`, but the shutdown-with-timeout shape is carried over
//! directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::connection_factory::{ConnectionFactory, SocketConfig};
use super::controller::{ControllerHandle, SessionController};
use super::credential_store::CredentialStore;
use super::errors::{CapacityError, CreateError};
use super::handover::WebHandoverCoordinator;
use super::model::{ConnectionStatus, Session};
use super::pairing::PairingCoordinator;
use super::session_id::SessionId;
use super::session_store::SessionStore;

/// How many sessions a single fleet process will keep connected at once.
#[derive(Debug, Clone, Copy)]
pub struct FleetLimits {
    pub max_sessions: usize,
}

/// Point-in-time counters, the `Stats()` operation in spec §4.6.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FleetStats {
    pub total: usize,
    pub connected: usize,
    pub reconnecting: usize,
    pub capacity: usize,
}

struct RunningController {
    handle: ControllerHandle,
    task: JoinHandle<()>,
}

pub struct FleetManager {
    limits: FleetLimits,
    connection_factory: Arc<dyn ConnectionFactory>,
    socket_config: SocketConfig,
    session_store: Arc<SessionStore>,
    credential_store: Arc<CredentialStore>,
    pairing: Arc<PairingCoordinator>,
    controllers: Arc<DashMap<SessionId, RunningController>>,
    /// Gates whether newly spawned controllers fire their web-tier handover
    /// hook. Disabled during bootstrap replay so historical reconnects don't
    /// race a handover before the fleet has finished loading.
    event_handlers_enabled: Arc<AtomicBool>,
    /// Arms a handover timer for each web-tier session that reaches `open`;
    /// called back if the window elapses with no worker-tier claim.
    on_handover_timeout: Arc<dyn Fn(&SessionId) + Send + Sync>,
    handover: Arc<WebHandoverCoordinator>,
}

impl FleetManager {
    pub fn new(
        limits: FleetLimits,
        connection_factory: Arc<dyn ConnectionFactory>,
        socket_config: SocketConfig,
        session_store: Arc<SessionStore>,
        credential_store: Arc<CredentialStore>,
        pairing: Arc<PairingCoordinator>,
        on_handover_timeout: Arc<dyn Fn(&SessionId) + Send + Sync>,
    ) -> Self {
        Self {
            limits,
            connection_factory,
            socket_config,
            session_store,
            credential_store,
            pairing,
            controllers: Arc::new(DashMap::new()),
            event_handlers_enabled: Arc::new(AtomicBool::new(false)),
            on_handover_timeout,
            handover: Arc::new(WebHandoverCoordinator::new()),
        }
    }

    /// Spawn a controller for `user_id`, rejecting duplicates and enforcing
    /// the fleet capacity limit (spec §4.6 Create flow).
    pub async fn create(&self, user_id: u64) -> Result<ControllerHandle, CreateError> {
        let session_id = SessionId::for_user(user_id);

        if self.controllers.contains_key(&session_id) {
            return Err(CreateError::AlreadyInitializing(session_id));
        }
        if self.controllers.len() >= self.limits.max_sessions {
            return Err(CreateError::FleetFull);
        }

        let source = session_id.source().unwrap_or(super::session_id::Source::Native);
        let session = Session::new(session_id.clone(), user_id, source);
        self.session_store
            .create(session)
            .await
            .map_err(|e| CreateError::ConnectionFailed(e.into()))?;

        self.spawn_controller(session_id.clone(), user_id).await
    }

    async fn spawn_controller(&self, session_id: SessionId, user_id: u64) -> Result<ControllerHandle, CreateError> {
        let hook: Option<Box<dyn Fn(&SessionId) + Send + Sync>> = if self.event_handlers_enabled.load(Ordering::Acquire) {
            let handover = self.handover.clone();
            let on_timeout = self.on_handover_timeout.clone();
            Some(Box::new(move |sid: &SessionId| {
                let on_timeout = on_timeout.clone();
                handover.arm(sid.clone(), move |sid: &SessionId| on_timeout(sid));
            }))
        } else {
            None
        };

        let spawned = SessionController::create(
            session_id.clone(),
            user_id,
            self.connection_factory.clone(),
            self.socket_config.clone(),
            self.session_store.clone(),
            self.credential_store.clone(),
            self.pairing.clone(),
            hook,
        )
        .await
        .map_err(CreateError::ConnectionFailed)?;

        let mut controller = spawned.controller;
        let controllers = self.controllers.clone();
        let reaped_id = session_id.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = controller.run().await {
                warn!(session_id = %controller.session_id(), error = %e, "controller exited with error");
            }
            // The controller stops on its own when a reconnect attempt lands on
            // a terminal classification or the reconnect budget runs out, with
            // no `disconnect()`/`shutdown_all()` call to reap the entry. Do it
            // here so `create()` doesn't treat the session as still live.
            controllers.remove(&reaped_id);
        });

        self.controllers.insert(
            session_id,
            RunningController {
                handle: spawned.handle.clone(),
                task,
            },
        );

        Ok(spawned.handle)
    }

    pub fn get(&self, session_id: &SessionId) -> Option<ControllerHandle> {
        self.controllers.get(session_id).map(|r| r.handle.clone())
    }

    pub fn is_connected(&self, session_id: &SessionId) -> bool {
        self.controllers
            .get(session_id)
            .map(|r| r.handle.is_connected())
            .unwrap_or(false)
    }

    pub async fn disconnect(&self, session_id: &SessionId, force: bool) {
        if force {
            self.handover.disarm(session_id);
        }
        if let Some((_, running)) = self.controllers.remove(session_id) {
            running.handle.disconnect(force).await;
            running.task.abort();
        }
    }

    /// Cross-process race-free claim: a worker-tier fleet process attached to
    /// the same `SessionStore` calls this when it discovers a `source=web`
    /// session whose handover window is still open. Only meaningful when two
    /// fleet deployments share a database — within a single process the
    /// `create` path already rejects a duplicate `SessionId`, so there is
    /// never a second controller here to race against.
    pub async fn claim_handover(&self, session_id: &SessionId) -> bool {
        self.handover.try_claim(session_id).await
    }

    pub async fn stats(&self) -> FleetStats {
        let total = self.controllers.len();
        let connected = self
            .controllers
            .iter()
            .filter(|r| r.handle.is_connected())
            .count();
        let reconnecting = self
            .session_store
            .list_all()
            .await
            .iter()
            .filter(|s| s.connection_status == ConnectionStatus::Reconnecting)
            .count();
        FleetStats {
            total,
            connected,
            reconnecting,
            capacity: self.limits.max_sessions,
        }
    }

    /// Replay stored sessions on process start: newest-first, capped at the
    /// fleet limit, in small batches so the upstream isn't hit with a burst
    /// of simultaneous connects. Sessions with no remaining credential
    /// record are purged instead of reconnected.
    pub async fn bootstrap(&self) -> anyhow::Result<()> {
        let mut sessions: Vec<_> = self
            .session_store
            .list_all()
            .await
            .into_iter()
            .filter(|s| s.is_connected || matches!(s.connection_status, ConnectionStatus::Connected | ConnectionStatus::Connecting))
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(self.limits.max_sessions);

        const BATCH_SIZE: usize = 5;
        const BATCH_PAUSE: Duration = Duration::from_millis(500);

        let mut restored = 0usize;
        let mut purged = 0usize;

        for batch in sessions.chunks(BATCH_SIZE) {
            for session in batch {
                if !self.credential_store.is_registered(&session.session_id).await {
                    purged += 1;
                    let _ = self.session_store.delete(&session.session_id).await;
                    continue;
                }
                match self.spawn_controller(session.session_id.clone(), session.user_id).await {
                    Ok(_) => restored += 1,
                    Err(e) => warn!(session_id = %session.session_id, error = %e, "bootstrap restore failed"),
                }
            }
            tokio::time::sleep(BATCH_PAUSE).await;
        }

        info!(restored, purged, "fleet bootstrap complete");
        self.event_handlers_enabled.store(true, Ordering::Release);
        Ok(())
    }

    /// Disconnect every controller, used during graceful process shutdown.
    pub async fn shutdown_all(&self, timeout: Duration) -> Result<Duration, Vec<SessionId>> {
        let started = std::time::Instant::now();
        let session_ids: Vec<SessionId> = self.controllers.iter().map(|e| e.key().clone()).collect();

        for session_id in &session_ids {
            self.handover.disarm(session_id);
            if let Some((_, running)) = self.controllers.remove(session_id) {
                running.handle.disconnect(false).await;
                running.task.abort();
            }
        }

        self.session_store.flush_all().await;

        if started.elapsed() > timeout {
            return Err(session_ids);
        }
        Ok(started.elapsed())
    }
}
