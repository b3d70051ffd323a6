//! SessionStore (spec §4.1, component C2).
//!
//! Dual-backed session metadata store: writes go to both backings
//! (succeeding if either succeeds), reads prefer the primary and fall back
//! to the secondary. Updates are coalesced over a short debounce window with
//! last-write-wins merging, mirroring the teacher's `SessionCache` read
//! strategy generalized to a write path.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::warn;

use super::errors::StoreError;
use super::model::{Session, SessionPatch};
use super::session_id::SessionId;

/// Quiescence window before a coalesced patch is flushed to the backings.
const UPDATE_DEBOUNCE_WINDOW: Duration = Duration::from_millis(200);

#[async_trait::async_trait]
pub trait SessionBacking: Send + Sync {
    async fn get(&self, session_id: &SessionId) -> Option<Session>;
    async fn get_by_phone(&self, phone_number: &str) -> Option<Session>;
    async fn list_all(&self) -> Vec<Session>;
    async fn upsert(&self, session: &Session) -> Result<(), StoreError>;
    async fn delete(&self, session_id: &SessionId) -> Result<(), StoreError>;
    fn is_connected(&self) -> bool;
}

struct PendingUpdate {
    patch: SessionPatch,
    generation: u64,
}

pub struct SessionStore {
    primary: Arc<dyn SessionBacking>,
    secondary: Option<Arc<dyn SessionBacking>>,
    /// In-memory view, authoritative between flushes and when both
    /// backings are unreachable.
    memory: Arc<DashMap<SessionId, Session>>,
    pending: Arc<DashMap<SessionId, PendingUpdate>>,
    next_generation: Arc<std::sync::atomic::AtomicU64>,
}

impl SessionStore {
    pub fn new(primary: Arc<dyn SessionBacking>, secondary: Option<Arc<dyn SessionBacking>>) -> Self {
        Self {
            primary,
            secondary,
            memory: Arc::new(DashMap::new()),
            pending: Arc::new(DashMap::new()),
            next_generation: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    /// Insert a brand-new session record, writing through immediately (no
    /// debounce — the create path needs a durable row before it proceeds).
    pub async fn create(&self, session: Session) -> Result<(), StoreError> {
        self.memory.insert(session.session_id.clone(), session.clone());
        self.write_through(&session).await
    }

    pub fn get_cached(&self, session_id: &SessionId) -> Option<Session> {
        self.memory.get(session_id).map(|e| e.clone())
    }

    /// Read path: prefer the in-memory view (which reflects any un-flushed
    /// patch), otherwise prefer the primary backing, falling back to the
    /// secondary.
    pub async fn get(&self, session_id: &SessionId) -> Option<Session> {
        if let Some(session) = self.get_cached(session_id) {
            return Some(session);
        }
        if let Some(session) = self.primary.get(session_id).await {
            self.memory.insert(session_id.clone(), session.clone());
            return Some(session);
        }
        if let Some(secondary) = &self.secondary
            && let Some(session) = secondary.get(session_id).await
        {
            self.memory.insert(session_id.clone(), session.clone());
            return Some(session);
        }
        None
    }

    /// Lookup by E.164 phone number, used by `/api/connect` to reject
    /// re-pairing a number already bound to a different session. Checks the
    /// in-memory view first so an un-flushed claim is still visible.
    pub async fn get_by_phone(&self, phone_number: &str) -> Option<Session> {
        if let Some(session) = self.memory.iter().find(|e| e.phone_number.as_deref() == Some(phone_number)) {
            return Some(session.clone());
        }
        if let Some(session) = self.primary.get_by_phone(phone_number).await {
            return Some(session);
        }
        if let Some(secondary) = &self.secondary {
            return secondary.get_by_phone(phone_number).await;
        }
        None
    }

    /// List every session known to either backing, preferring the primary's
    /// copy when both have a record. Used by the fleet bootstrap sequence.
    pub async fn list_all(&self) -> Vec<Session> {
        let mut by_id: std::collections::HashMap<SessionId, Session> = std::collections::HashMap::new();
        if let Some(secondary) = &self.secondary {
            for session in secondary.list_all().await {
                by_id.insert(session.session_id.clone(), session);
            }
        }
        for session in self.primary.list_all().await {
            by_id.insert(session.session_id.clone(), session);
        }
        by_id.into_values().collect()
    }

    /// Apply `patch` to the in-memory view immediately and schedule a
    /// debounced flush. Repeated updates within the debounce window fold
    /// together via [`SessionPatch::merge`], last-write-wins per key.
    pub fn update(&self, session_id: &SessionId, patch: SessionPatch) {
        let Some(mut entry) = self.memory.get_mut(session_id) else {
            warn!(%session_id, "update for unknown session, dropping");
            return;
        };
        entry.apply(&patch);
        drop(entry);

        let generation = self
            .next_generation
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.pending
            .entry(session_id.clone())
            .and_modify(|p| {
                p.patch = p.patch.clone().merge(patch.clone());
                p.generation = generation;
            })
            .or_insert(PendingUpdate { patch, generation });

        let memory = self.memory.clone();
        let pending = self.pending.clone();
        let primary = self.primary.clone();
        let secondary = self.secondary.clone();
        let session_id = session_id.clone();

        tokio::spawn(async move {
            tokio::time::sleep(UPDATE_DEBOUNCE_WINDOW).await;
            Self::flush_one(session_id, generation, &memory, &pending, &primary, &secondary).await;
        });
    }

    async fn flush_one(
        session_id: SessionId,
        generation: u64,
        memory: &DashMap<SessionId, Session>,
        pending: &DashMap<SessionId, PendingUpdate>,
        primary: &Arc<dyn SessionBacking>,
        secondary: &Option<Arc<dyn SessionBacking>>,
    ) {
        let still_current = pending.get(&session_id).map(|p| p.generation) == Some(generation);
        if !still_current {
            return;
        }
        let Some(session) = memory.get(&session_id).map(|e| e.clone()) else {
            return;
        };

        let (primary_result, secondary_result) = match secondary {
            Some(backing) => {
                let (p, s) = tokio::join!(primary.upsert(&session), backing.upsert(&session));
                (p, Some(s))
            }
            None => (primary.upsert(&session).await, None),
        };

        let succeeded = primary_result.is_ok() || matches!(secondary_result, Some(Ok(())));
        if succeeded {
            pending.remove(&session_id);
        } else if let Err(e) = primary_result {
            warn!(%session_id, error = %e, "session flush failed on both backings");
        }
    }

    /// Mark a session terminated: deletes from both backings and the
    /// in-memory view.
    pub async fn delete(&self, session_id: &SessionId) -> Result<(), StoreError> {
        self.memory.remove(session_id);
        self.pending.remove(session_id);
        let primary_result = self.primary.delete(session_id).await;
        if let Some(secondary) = &self.secondary {
            let _ = secondary.delete(session_id).await;
        }
        primary_result
    }

    async fn write_through(&self, session: &Session) -> Result<(), StoreError> {
        let (primary_result, secondary_result) = match &self.secondary {
            Some(backing) => {
                let (p, s) = tokio::join!(self.primary.upsert(session), backing.upsert(session));
                (p, Some(s))
            }
            None => (self.primary.upsert(session).await, None),
        };
        if primary_result.is_ok() || matches!(secondary_result, Some(Ok(()))) {
            Ok(())
        } else {
            primary_result
        }
    }

    /// Whether any write path is currently reachable.
    pub fn is_durable(&self) -> bool {
        self.primary.is_connected() || self.secondary.as_ref().is_some_and(|s| s.is_connected())
    }

    /// Force-flush every pending update immediately. Called on shutdown so
    /// the debounce window doesn't drop a trailing write.
    pub async fn flush_all(&self) {
        let keys: Vec<SessionId> = self.pending.iter().map(|e| e.key().clone()).collect();
        for session_id in keys {
            let Some(generation) = self.pending.get(&session_id).map(|p| p.generation) else {
                continue;
            };
            Self::flush_one(
                session_id,
                generation,
                &self.memory,
                &self.pending,
                &self.primary,
                &self.secondary,
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ConnectionStatus;
    use crate::core::session_id::Source;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeBacking {
        data: StdMutex<std::collections::HashMap<SessionId, Session>>,
        connected: std::sync::atomic::AtomicBool,
    }

    impl FakeBacking {
        fn new(connected: bool) -> Self {
            Self {
                data: StdMutex::new(std::collections::HashMap::new()),
                connected: std::sync::atomic::AtomicBool::new(connected),
            }
        }
    }

    #[async_trait::async_trait]
    impl SessionBacking for FakeBacking {
        async fn get(&self, session_id: &SessionId) -> Option<Session> {
            self.data.lock().unwrap().get(session_id).cloned()
        }

        async fn get_by_phone(&self, phone_number: &str) -> Option<Session> {
            self.data
                .lock()
                .unwrap()
                .values()
                .find(|s| s.phone_number.as_deref() == Some(phone_number))
                .cloned()
        }

        async fn list_all(&self) -> Vec<Session> {
            self.data.lock().unwrap().values().cloned().collect()
        }

        async fn upsert(&self, session: &Session) -> Result<(), StoreError> {
            if !self.connected.load(std::sync::atomic::Ordering::Acquire) {
                return Err(StoreError::Unavailable("fake backing down".into()));
            }
            self.data
                .lock()
                .unwrap()
                .insert(session.session_id.clone(), session.clone());
            Ok(())
        }

        async fn delete(&self, session_id: &SessionId) -> Result<(), StoreError> {
            self.data.lock().unwrap().remove(session_id);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(std::sync::atomic::Ordering::Acquire)
        }
    }

    fn sample_session() -> Session {
        Session::new(SessionId::for_user(1), 1, Source::Native)
    }

    #[tokio::test]
    async fn create_is_visible_immediately() {
        let store = SessionStore::new(Arc::new(FakeBacking::new(true)), None);
        let session = sample_session();
        store.create(session.clone()).await.unwrap();
        assert_eq!(store.get(&session.session_id).await.unwrap().user_id, 1);
    }

    #[tokio::test]
    async fn debounced_update_coalesces_and_flushes() {
        let primary = Arc::new(FakeBacking::new(true));
        let store = SessionStore::new(primary.clone(), None);
        let session = sample_session();
        store.create(session.clone()).await.unwrap();

        store.update(
            &session.session_id,
            SessionPatch {
                reconnect_attempts: Some(1),
                ..Default::default()
            },
        );
        store.update(
            &session.session_id,
            SessionPatch {
                reconnect_attempts: Some(2),
                connection_status: Some(ConnectionStatus::Connected),
                ..Default::default()
            },
        );

        tokio::time::sleep(Duration::from_millis(350)).await;

        let flushed = primary.get(&session.session_id).await.unwrap();
        assert_eq!(flushed.reconnect_attempts, 2);
        assert_eq!(flushed.connection_status, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn write_succeeds_if_secondary_is_up_while_primary_is_down() {
        let primary = Arc::new(FakeBacking::new(false));
        let secondary = Arc::new(FakeBacking::new(true));
        let store = SessionStore::new(primary.clone(), Some(secondary.clone()));
        let session = sample_session();

        store.create(session.clone()).await.unwrap();
        assert!(secondary.get(&session.session_id).await.is_some());
        assert!(primary.get(&session.session_id).await.is_none());
    }

    #[tokio::test]
    async fn in_memory_view_survives_both_backings_down() {
        let primary = Arc::new(FakeBacking::new(false));
        let secondary = Arc::new(FakeBacking::new(false));
        let store = SessionStore::new(primary, Some(secondary));
        let session = sample_session();

        assert!(store.create(session.clone()).await.is_err());
        assert_eq!(store.get(&session.session_id).await.unwrap().user_id, 1);
    }
}
