//! SessionController (spec §4.4, component C5): the per-session state
//! machine that owns one upstream connection end to end.
//!
//! Grounded in the teacher's `Service` trait (`services/mod.rs`) and
//! `run_service` shape: a `tokio::select!` between inbound work and a
//! shutdown signal. Here "inbound work" is two streams instead of one —
//! upstream socket events and operator commands — so the controller keeps
//! its own select loop rather than implementing `Service` directly; the
//! fleet wraps it in a thin `Service` adapter instead (see `core::fleet`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::classification::{backoff_delay, classify, is_restart_required};
use super::connection_factory::{ConnState, ConnectionFactory, ProtocolSocket, SocketConfig, SocketEvent};
use super::credential_store::CredentialStore;
use super::errors::DisconnectAction;
use super::model::{ConnectionStatus, SessionPatch};
use super::pairing::{PairingCoordinator, PRE_REQUEST_DELAY};
use super::session_id::{Source, SessionId};
use super::session_store::SessionStore;

/// Commands accepted from outside the controller's own task.
#[derive(Debug)]
pub enum SessionCommand {
    /// `force = true` skips the graceful close and tears the socket down
    /// immediately; `force = false` requests the upstream log out cleanly.
    Disconnect { force: bool },
    RequestPairingCode { phone_number: String },
}

/// A cheap, cloneable reference a `FleetManager` holds instead of the
/// controller's task itself.
#[derive(Clone)]
pub struct ControllerHandle {
    pub session_id: SessionId,
    commands: mpsc::Sender<SessionCommand>,
    connected: Arc<AtomicBool>,
}

impl ControllerHandle {
    pub async fn disconnect(&self, force: bool) {
        let _ = self.commands.send(SessionCommand::Disconnect { force }).await;
    }

    pub async fn request_pairing_code(&self, phone_number: String) {
        let _ = self
            .commands
            .send(SessionCommand::RequestPairingCode { phone_number })
            .await;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// A freshly constructed controller plus the handle its owner should keep.
pub struct Spawned {
    pub controller: SessionController,
    pub handle: ControllerHandle,
}

pub struct SessionController {
    session_id: SessionId,
    user_id: u64,
    source: Source,
    socket: Arc<dyn ProtocolSocket>,
    events: mpsc::Receiver<SocketEvent>,
    commands: mpsc::Receiver<SessionCommand>,
    connection_factory: Arc<dyn ConnectionFactory>,
    socket_config: SocketConfig,
    session_store: Arc<SessionStore>,
    credential_store: Arc<CredentialStore>,
    pairing: Arc<PairingCoordinator>,
    /// Fires once on `open` for a web-tier session so the fleet can hand the
    /// socket off to a worker-tier claimant (component C7).
    on_web_tier_open: Option<Box<dyn Fn(&SessionId) + Send + Sync>>,
    voluntary_disconnect: bool,
    pending_phone_number: Option<String>,
    connected: Arc<AtomicBool>,
    /// Consecutive `BadSession` (500) disconnects with no intervening
    /// `connected` transition. Two in a row means remediation didn't take,
    /// so the third is promoted to a terminal cleanup (spec §7).
    consecutive_bad_sessions: u32,
}

impl SessionController {
    /// Build a controller and its socket for a brand-new or re-adopted
    /// session. Does not start the run loop.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        session_id: SessionId,
        user_id: u64,
        connection_factory: Arc<dyn ConnectionFactory>,
        socket_config: SocketConfig,
        session_store: Arc<SessionStore>,
        credential_store: Arc<CredentialStore>,
        pairing: Arc<PairingCoordinator>,
        on_web_tier_open: Option<Box<dyn Fn(&SessionId) + Send + Sync>>,
    ) -> anyhow::Result<Spawned> {
        let source = session_id.source().unwrap_or(Source::Native);
        let (socket, events) = connection_factory.create(&session_id, &socket_config).await?;
        let (command_tx, command_rx) = mpsc::channel(32);
        let connected = Arc::new(AtomicBool::new(false));

        let handle = ControllerHandle {
            session_id: session_id.clone(),
            commands: command_tx,
            connected: connected.clone(),
        };

        let controller = SessionController {
            session_id,
            user_id,
            source,
            socket: Arc::from(socket),
            events,
            commands: command_rx,
            connection_factory,
            socket_config,
            session_store,
            credential_store,
            pairing,
            on_web_tier_open,
            voluntary_disconnect: false,
            pending_phone_number: None,
            connected,
            consecutive_bad_sessions: 0,
        };

        Ok(Spawned { controller, handle })
    }

    /// Drive the controller until the session reaches a terminal state or a
    /// forced disconnect tears it down. Mirrors `run_service`'s select loop.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.socket.connect().await?;

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(event) => {
                            if self.handle_event(event).await? {
                                return Ok(());
                            }
                        }
                        None => {
                            warn!(session_id = %self.session_id, "socket event stream closed unexpectedly");
                            return Ok(());
                        }
                    }
                }
                command = self.commands.recv() => {
                    match command {
                        Some(SessionCommand::Disconnect { force }) => {
                            self.voluntary_disconnect = true;
                            if force {
                                self.socket.close().await;
                                self.terminate().await;
                                return Ok(());
                            }
                            self.socket.close().await;
                        }
                        Some(SessionCommand::RequestPairingCode { phone_number }) => {
                            self.pending_phone_number = Some(phone_number);
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    /// Returns `Ok(true)` when the controller should stop running.
    async fn handle_event(&mut self, event: SocketEvent) -> anyhow::Result<bool> {
        match event {
            SocketEvent::ConnectionUpdate { state, disconnect, phone_number } => {
                match state {
                    ConnState::Connecting => self.on_connecting().await,
                    ConnState::Open => self.on_open(phone_number).await,
                    ConnState::Close => return self.on_close(disconnect).await,
                }
                Ok(false)
            }
            SocketEvent::CredsUpdate => {
                // The socket's own backing (app-state sync keys, sender keys,
                // etc.) is flushed by its implementation directly against
                // `CredentialStore`; this event is a notification hook for
                // callers that want to observe write activity.
                Ok(false)
            }
        }
    }

    async fn on_connecting(&mut self) {
        self.session_store.update(
            &self.session_id,
            SessionPatch {
                connection_status: Some(ConnectionStatus::Connecting),
                ..Default::default()
            },
        );

        let already_registered = self.credential_store.is_registered(&self.session_id).await;
        if !already_registered
            && let Some(phone_number) = self.pending_phone_number.clone()
        {
            self.spawn_pairing_code_request(phone_number);
        }
    }

    /// Requests a pairing code on a background task so the select loop keeps
    /// servicing events and commands during the pre-request delay.
    fn spawn_pairing_code_request(&self, phone_number: String) {
        let socket = self.socket.clone();
        let pairing = self.pairing.clone();
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(PRE_REQUEST_DELAY).await;
            match socket.request_pairing_code(&phone_number).await {
                Ok(raw_code) => {
                    let formatted = pairing.record(&session_id, &raw_code);
                    info!(%session_id, code = %formatted, "pairing code issued");
                }
                Err(e) => {
                    warn!(%session_id, error = %e, "pairing code request failed");
                }
            }
        });
    }

    async fn on_open(&mut self, phone_number: Option<String>) {
        self.voluntary_disconnect = false;
        self.consecutive_bad_sessions = 0;

        if !self.commit_root_durably().await {
            warn!(
                session_id = %self.session_id,
                "root credential record not durable after open, holding session out of connected"
            );
            self.session_store.update(
                &self.session_id,
                SessionPatch {
                    phone_number: phone_number.map(Some),
                    ..Default::default()
                },
            );
            return;
        }

        self.connected.store(true, Ordering::Release);
        self.pairing.clear(&self.session_id);

        self.session_store.update(
            &self.session_id,
            SessionPatch {
                is_connected: Some(true),
                connection_status: Some(ConnectionStatus::Connected),
                reconnect_attempts: Some(0),
                phone_number: phone_number.map(Some),
                ..Default::default()
            },
        );

        if self.source == Source::Web
            && let Some(hook) = &self.on_web_tier_open
        {
            hook(&self.session_id);
        }
    }

    /// Persists the root identity record and confirms it reached durable
    /// storage before the caller is allowed to advance to `connected` (spec
    /// §4.1, invariant §8.1: every connected session has a durable root
    /// record). Retries a few times with a short backoff — most failures
    /// here are a brief backing outage racing the write, not a permanent one.
    async fn commit_root_durably(&self) -> bool {
        const ATTEMPTS: u32 = 3;
        for attempt in 0..ATTEMPTS {
            if self.credential_store.save_root(&self.session_id).await.is_ok() && self.credential_store.is_durable() {
                return true;
            }
            if attempt + 1 < ATTEMPTS {
                tokio::time::sleep(std::time::Duration::from_millis(100 * 2u64.pow(attempt))).await;
            }
        }
        false
    }

    /// Returns `Ok(true)` when the controller loop should stop.
    async fn on_close(&mut self, disconnect: Option<super::connection_factory::DisconnectInfo>) -> anyhow::Result<bool> {
        self.connected.store(false, Ordering::Release);
        let status_code = disconnect.as_ref().and_then(|d| d.status_code);
        let classification = classify(status_code);

        info!(
            session_id = %self.session_id,
            classification = classification.name,
            status_code = ?status_code,
            "session disconnected"
        );

        match classification.action {
            DisconnectAction::Terminal => {
                self.terminate().await;
                Ok(true)
            }
            DisconnectAction::Remediate => {
                self.consecutive_bad_sessions += 1;
                if self.consecutive_bad_sessions >= 2 {
                    warn!(session_id = %self.session_id, "BadSession remediation failed twice in a row, giving up");
                    self.terminate().await;
                    return Ok(true);
                }
                let _ = self.credential_store.remediate_bad_session(&self.session_id).await;
                self.reconnect_after(backoff_delay(0, true)).await?;
                Ok(false)
            }
            DisconnectAction::Reconnect { short_delay, max_attempts } => {
                let restart_required = is_restart_required(status_code);
                if restart_required {
                    self.pairing.mark_restart_handled(&self.session_id);
                }

                // 515/516 fire routinely mid-pairing; a voluntary disconnect
                // request must not be treated as satisfied by one of these —
                // only a non-restart-required close confirms it.
                if self.voluntary_disconnect && !restart_required {
                    self.terminate().await;
                    return Ok(true);
                }

                let session = self.session_store.get_cached(&self.session_id);
                let attempts = session.as_ref().map(|s| s.reconnect_attempts).unwrap_or(0);
                if attempts >= max_attempts {
                    warn!(session_id = %self.session_id, attempts, "reconnect attempts exhausted");
                    self.terminate().await;
                    return Ok(true);
                }

                self.session_store.update(
                    &self.session_id,
                    SessionPatch {
                        connection_status: Some(ConnectionStatus::Reconnecting),
                        reconnect_attempts: Some(attempts + 1),
                        ..Default::default()
                    },
                );

                self.reconnect_after(backoff_delay(attempts, short_delay)).await?;
                Ok(false)
            }
        }
    }

    async fn reconnect_after(&mut self, delay: std::time::Duration) -> anyhow::Result<()> {
        tokio::time::sleep(delay).await;
        let (socket, events) = self
            .connection_factory
            .create(&self.session_id, &self.socket_config)
            .await?;
        self.socket = Arc::from(socket);
        self.events = events;
        self.socket.connect().await
    }

    async fn terminate(&mut self) {
        self.connected.store(false, Ordering::Release);
        self.session_store.update(
            &self.session_id,
            SessionPatch {
                is_connected: Some(false),
                connection_status: Some(ConnectionStatus::Disconnected),
                ..Default::default()
            },
        );
        self.pairing.clear(&self.session_id);
        let _ = self.session_store.delete(&self.session_id).await;
        let _ = self.credential_store.cleanup_session(&self.session_id).await;
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }
}
