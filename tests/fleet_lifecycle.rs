//! End-to-end coverage of `FleetManager` driving `SessionController` through
//! its `SessionStore`/`CredentialStore`/`PairingCoordinator` dependencies,
//! against fake in-memory backings and a fake `ConnectionFactory` the test
//! drives directly. Each module's own `#[cfg(test)]` block already covers
//! its unit behavior in isolation; this exercises the seams between them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use fleetd::core::connection_factory::{ConnState, DisconnectInfo, ProtocolSocket, SocketEvent};
use fleetd::core::errors::{PairingError, StoreError};
use fleetd::core::{
    ConnectionFactory, ConnectionStatus, CredentialBacking, CredentialStore, FleetLimits, FleetManager, PairingCoordinator,
    Session, SessionBacking, SessionId, SessionStore, SocketConfig, Source,
};

/// A `ConnectionFactory` the test drives by holding onto the event sender
/// handed to each session's fake socket, keyed by session id so a test can
/// push events for one session without needing the controller's handle.
#[derive(Default)]
struct FakeFactory {
    senders: DashMap<SessionId, mpsc::Sender<SocketEvent>>,
}

impl FakeFactory {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn push(&self, session_id: &SessionId, event: SocketEvent) {
        if let Some(tx) = self.senders.get(session_id) {
            let _ = tx.send(event).await;
        }
    }

    async fn open(&self, session_id: &SessionId, phone_number: &str) {
        self.push(
            session_id,
            SocketEvent::ConnectionUpdate {
                state: ConnState::Open,
                disconnect: None,
                phone_number: Some(phone_number.to_owned()),
            },
        )
        .await;
    }

    async fn close(&self, session_id: &SessionId, status_code: Option<u16>) {
        self.push(
            session_id,
            SocketEvent::ConnectionUpdate {
                state: ConnState::Close,
                disconnect: Some(DisconnectInfo { status_code, reason: None }),
                phone_number: None,
            },
        )
        .await;
    }
}

struct FakeSocket {
    events: mpsc::Sender<SocketEvent>,
}

#[async_trait]
impl ProtocolSocket for FakeSocket {
    async fn connect(&self) -> anyhow::Result<()> {
        let _ = self
            .events
            .send(SocketEvent::ConnectionUpdate {
                state: ConnState::Connecting,
                disconnect: None,
                phone_number: None,
            })
            .await;
        Ok(())
    }

    async fn request_pairing_code(&self, _phone_number: &str) -> Result<String, PairingError> {
        Ok("ABCD1234".to_owned())
    }

    async fn close(&self) {}
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn create(
        &self,
        session_id: &SessionId,
        _config: &SocketConfig,
    ) -> anyhow::Result<(Box<dyn ProtocolSocket>, mpsc::Receiver<SocketEvent>)> {
        let (tx, rx) = mpsc::channel(16);
        self.senders.insert(session_id.clone(), tx.clone());
        Ok((Box::new(FakeSocket { events: tx }), rx))
    }
}

#[derive(Default)]
struct MemSessionBacking {
    data: StdMutex<HashMap<SessionId, fleetd::core::Session>>,
}

impl MemSessionBacking {
    fn seed(&self, session: fleetd::core::Session) {
        self.data.lock().unwrap().insert(session.session_id.clone(), session);
    }
}

#[async_trait]
impl SessionBacking for MemSessionBacking {
    async fn get(&self, session_id: &SessionId) -> Option<fleetd::core::Session> {
        self.data.lock().unwrap().get(session_id).cloned()
    }

    async fn get_by_phone(&self, phone_number: &str) -> Option<fleetd::core::Session> {
        self.data
            .lock()
            .unwrap()
            .values()
            .find(|s| s.phone_number.as_deref() == Some(phone_number))
            .cloned()
    }

    async fn list_all(&self) -> Vec<fleetd::core::Session> {
        self.data.lock().unwrap().values().cloned().collect()
    }

    async fn upsert(&self, session: &fleetd::core::Session) -> Result<(), StoreError> {
        self.data.lock().unwrap().insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), StoreError> {
        self.data.lock().unwrap().remove(session_id);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct MemCredentialBacking {
    data: StdMutex<HashMap<(SessionId, String), Vec<u8>>>,
}

#[async_trait]
impl CredentialBacking for MemCredentialBacking {
    async fn get(&self, session_id: &SessionId, file_name: &str) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(&(session_id.clone(), file_name.to_owned())).cloned()
    }

    async fn set(&self, session_id: &SessionId, file_name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.data
            .lock()
            .unwrap()
            .insert((session_id.clone(), file_name.to_owned()), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId, file_name: &str) -> Result<(), StoreError> {
        self.data.lock().unwrap().remove(&(session_id.clone(), file_name.to_owned()));
        Ok(())
    }

    async fn delete_all_except(&self, session_id: &SessionId, keep: &str) -> Result<(), StoreError> {
        self.data.lock().unwrap().retain(|(sid, name), _| sid != session_id || name == keep);
        Ok(())
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<(), StoreError> {
        self.data.lock().unwrap().retain(|(sid, _), _| sid != session_id);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

/// Always fails writes, so `CredentialStore::save_root` never reaches durable.
#[derive(Default)]
struct FailingCredentialBacking;

#[async_trait]
impl CredentialBacking for FailingCredentialBacking {
    async fn get(&self, _session_id: &SessionId, _file_name: &str) -> Option<Vec<u8>> {
        None
    }

    async fn set(&self, _session_id: &SessionId, _file_name: &str, _bytes: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("backing offline".to_owned()))
    }

    async fn delete(&self, _session_id: &SessionId, _file_name: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete_all_except(&self, _session_id: &SessionId, _keep: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn delete_session(&self, _session_id: &SessionId) -> Result<(), StoreError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        false
    }
}

struct Harness {
    fleet: Arc<FleetManager>,
    factory: Arc<FakeFactory>,
}

fn build_fleet(max_sessions: usize) -> Harness {
    build_fleet_with_credential_backing(max_sessions, Arc::new(MemCredentialBacking::default()))
}

fn build_fleet_with_credential_backing(max_sessions: usize, credential_backing: Arc<dyn CredentialBacking>) -> Harness {
    build_fleet_full(max_sessions, Arc::new(MemSessionBacking::default()), credential_backing).0
}

fn build_fleet_full(
    max_sessions: usize,
    session_backing: Arc<MemSessionBacking>,
    credential_backing: Arc<dyn CredentialBacking>,
) -> (Harness, Arc<MemSessionBacking>) {
    let factory = FakeFactory::new();
    let session_store = Arc::new(SessionStore::new(session_backing.clone(), None));
    let credential_store = Arc::new(CredentialStore::new(credential_backing));
    let pairing = Arc::new(PairingCoordinator::new());
    let timed_out = Arc::new(AtomicBool::new(false));
    let timed_out_hook = timed_out.clone();

    let fleet = Arc::new(FleetManager::new(
        FleetLimits { max_sessions },
        factory.clone(),
        SocketConfig::default(),
        session_store,
        credential_store,
        pairing,
        Arc::new(move |_session_id: &SessionId| {
            timed_out_hook.store(true, Ordering::Release);
        }),
    ));

    (Harness { fleet, factory }, session_backing)
}

#[tokio::test]
async fn create_then_open_marks_the_session_connected() {
    let harness = build_fleet(10);
    let user_id = 42;
    let session_id = SessionId::for_user(user_id);

    let handle = harness.fleet.create(user_id).await.unwrap();
    assert!(!handle.is_connected());

    harness.factory.open(&session_id, "+15551234567").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(harness.fleet.is_connected(&session_id));
    let stats = harness.fleet.stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.connected, 1);
}

#[tokio::test]
async fn open_does_not_advance_to_connected_while_the_credential_backing_is_down() {
    let harness = build_fleet_with_credential_backing(10, Arc::new(FailingCredentialBacking::default()));
    let user_id = 43;
    let session_id = SessionId::for_user(user_id);

    harness.fleet.create(user_id).await.unwrap();
    harness.factory.open(&session_id, "+15551234568").await;
    tokio::time::sleep(Duration::from_millis(800)).await;

    assert!(!harness.fleet.is_connected(&session_id));
}

#[tokio::test]
async fn bootstrap_skips_cleanly_disconnected_sessions() {
    let session_backing = Arc::new(MemSessionBacking::default());
    let credential_backing = Arc::new(MemCredentialBacking::default());

    let connected_id = SessionId::for_user(201);
    let connecting_id = SessionId::for_user(202);
    let disconnected_id = SessionId::for_user(203);

    for (session_id, user_id, is_connected, status) in [
        (&connected_id, 201u64, true, ConnectionStatus::Connected),
        (&connecting_id, 202u64, false, ConnectionStatus::Connecting),
        (&disconnected_id, 203u64, false, ConnectionStatus::Disconnected),
    ] {
        let mut session = Session::new(session_id.clone(), user_id, Source::Native);
        session.is_connected = is_connected;
        session.connection_status = status;
        session_backing.seed(session);
        credential_backing.set(session_id, "creds.json", b"root").await.unwrap();
    }

    let (harness, _) = build_fleet_full(10, session_backing, credential_backing);
    harness.fleet.bootstrap().await.unwrap();

    assert!(harness.fleet.get(&connected_id).is_some());
    assert!(harness.fleet.get(&connecting_id).is_some());
    assert!(harness.fleet.get(&disconnected_id).is_none());
}

#[tokio::test]
async fn duplicate_create_is_rejected_while_a_controller_is_live() {
    let harness = build_fleet(10);
    let user_id = 7;

    harness.fleet.create(user_id).await.unwrap();
    let err = harness.fleet.create(user_id).await.unwrap_err();
    assert!(matches!(err, fleetd::core::errors::CreateError::AlreadyInitializing(_)));
}

#[tokio::test]
async fn fleet_full_rejects_additional_sessions() {
    let harness = build_fleet(1);
    harness.fleet.create(1).await.unwrap();
    let err = harness.fleet.create(2).await.unwrap_err();
    assert!(matches!(err, fleetd::core::errors::CreateError::FleetFull));
}

#[tokio::test]
async fn forced_disconnect_removes_the_controller() {
    let harness = build_fleet(10);
    let user_id = 99;
    let session_id = SessionId::for_user(user_id);

    harness.fleet.create(user_id).await.unwrap();
    harness.factory.open(&session_id, "+15559998888").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.fleet.is_connected(&session_id));

    harness.fleet.disconnect(&session_id, true).await;
    assert!(harness.fleet.get(&session_id).is_none());

    // The slot is free again immediately, not just eventually.
    harness.fleet.create(user_id).await.unwrap();
}

#[tokio::test]
async fn terminal_close_reaps_itself_without_an_explicit_disconnect_call() {
    let harness = build_fleet(10);
    let user_id = 55;
    let session_id = SessionId::for_user(user_id);

    harness.fleet.create(user_id).await.unwrap();
    harness.factory.open(&session_id, "+15551112222").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // 401 (LoggedOut) is a terminal classification: the controller tears
    // itself down with no `disconnect()` call from the fleet side.
    harness.factory.close(&session_id, Some(401)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(harness.fleet.get(&session_id).is_none());
    // A stale entry here would make this fail with `AlreadyInitializing`.
    harness.fleet.create(user_id).await.unwrap();
}

#[tokio::test]
async fn web_tier_open_arms_a_handover_that_a_worker_tier_claim_can_win() {
    let harness = build_fleet(10);
    let user_id = 9_000_000_100;
    let session_id = SessionId::for_user(user_id);

    // `bootstrap()` is what normally flips `event_handlers_enabled`; call it
    // directly on an otherwise-empty store so the handover hook is armed.
    harness.fleet.bootstrap().await.unwrap();
    harness.fleet.create(user_id).await.unwrap();
    harness.factory.open(&session_id, "+15550001111").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(harness.fleet.claim_handover(&session_id).await);
    // A second claim attempt finds nothing armed and loses.
    assert!(!harness.fleet.claim_handover(&session_id).await);
}

#[tokio::test]
async fn shutdown_all_disconnects_every_live_session_within_the_timeout() {
    let harness = build_fleet(10);
    for user_id in [1u64, 2, 3] {
        harness.fleet.create(user_id).await.unwrap();
    }

    let elapsed = harness.fleet.shutdown_all(Duration::from_secs(5)).await.unwrap();
    assert!(elapsed < Duration::from_secs(5));

    let stats = harness.fleet.stats().await;
    assert_eq!(stats.total, 0);
}
