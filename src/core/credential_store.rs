//! CredentialStore (spec §4.1, component C1).
//!
//! Debounced write-behind cache over a pluggable backing, grounded in the
//! teacher's `SessionCache` read-through cache (`web/session_cache.rs`)
//! generalized to also cover writes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::errors::StoreError;
use super::session_id::SessionId;

/// Read cache TTL: subkeys older than this are re-fetched from the backing.
const CACHE_TTL: Duration = Duration::from_secs(30);
/// Periodic maintenance sweeps entries idle longer than this.
const EVICTION_AGE: Duration = Duration::from_secs(300);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(120);
/// Quiescence window before a pending write is flushed.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(50);
/// Bound on concurrent flushes issued by a single `set_batch` call.
const MAX_CONCURRENT_BATCH_FLUSHES: usize = 20;

pub const ROOT_FILE_NAME: &str = "creds.json";

/// Pluggable persistence for credential blobs, keyed by `(sessionId, fileName)`.
#[async_trait::async_trait]
pub trait CredentialBacking: Send + Sync {
    async fn get(&self, session_id: &SessionId, file_name: &str) -> Option<Vec<u8>>;
    async fn set(&self, session_id: &SessionId, file_name: &str, bytes: &[u8]) -> Result<(), StoreError>;
    async fn delete(&self, session_id: &SessionId, file_name: &str) -> Result<(), StoreError>;
    async fn delete_all_except(&self, session_id: &SessionId, keep: &str) -> Result<(), StoreError>;
    async fn delete_session(&self, session_id: &SessionId) -> Result<(), StoreError>;
    /// Whether the backing is currently reachable. Used by `CredentialStore::is_durable`.
    fn is_connected(&self) -> bool;
}

#[derive(Clone)]
struct CacheEntry {
    bytes: Option<Vec<u8>>,
    cached_at: Instant,
}

/// Key used by both the cache and the pending-flush map.
type CacheKey = (SessionId, String);

pub struct CredentialStore {
    backing: Arc<dyn CredentialBacking>,
    cache: Arc<DashMap<CacheKey, CacheEntry>>,
    /// Generation counter per key: a flush task only writes if its captured
    /// generation is still the latest one when it wakes, which collapses
    /// repeated writes to the same key into a single flush.
    generations: Arc<DashMap<CacheKey, u64>>,
    next_generation: Arc<AtomicU64>,
    durable: Arc<AtomicBool>,
}

impl CredentialStore {
    pub fn new(backing: Arc<dyn CredentialBacking>) -> Self {
        Self {
            backing,
            cache: Arc::new(DashMap::new()),
            generations: Arc::new(DashMap::new()),
            next_generation: Arc::new(AtomicU64::new(0)),
            durable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether the last observed write reached durable storage. The
    /// controller must not advance to `connected` while this is false.
    pub fn is_durable(&self) -> bool {
        self.durable.load(Ordering::Acquire) && self.backing.is_connected()
    }

    pub async fn get(&self, session_id: &SessionId, file_name: &str) -> Option<Vec<u8>> {
        let key = (session_id.clone(), file_name.to_owned());
        if let Some(entry) = self.cache.get(&key)
            && entry.cached_at.elapsed() < CACHE_TTL
        {
            return entry.bytes.clone();
        }

        // Cache miss or stale: read errors are treated as "new session" (spec §4.1).
        let bytes = self.backing.get(session_id, file_name).await;
        self.cache.insert(
            key,
            CacheEntry {
                bytes: bytes.clone(),
                cached_at: Instant::now(),
            },
        );
        bytes
    }

    /// Write `bytes` to the cache immediately and schedule a debounced flush.
    pub fn set(&self, session_id: &SessionId, file_name: &str, bytes: Vec<u8>) {
        let key = self.stage(session_id, file_name, Some(bytes));
        self.schedule_flush(key);
    }

    pub fn delete(&self, session_id: &SessionId, file_name: &str) {
        let key = self.stage(session_id, file_name, None);
        self.schedule_flush(key);
    }

    /// Write `bytes` to the cache immediately, returning the key a caller
    /// can then flush (debounced via [`schedule_flush`](Self::schedule_flush)
    /// or immediately, as `set_batch` does).
    fn stage(&self, session_id: &SessionId, file_name: &str, bytes: Option<Vec<u8>>) -> CacheKey {
        let key = (session_id.clone(), file_name.to_owned());
        self.cache.insert(
            key.clone(),
            CacheEntry {
                bytes,
                cached_at: Instant::now(),
            },
        );
        key
    }

    fn schedule_flush(&self, key: CacheKey) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.generations.insert(key.clone(), generation);

        let cache = self.cache.clone();
        let generations = self.generations.clone();
        let backing = self.backing.clone();
        let durable = self.durable.clone();

        tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE_WINDOW).await;
            Self::flush_one(key, generation, &cache, &generations, &backing, &durable).await;
        });
    }

    async fn flush_one(
        key: CacheKey,
        generation: u64,
        cache: &DashMap<CacheKey, CacheEntry>,
        generations: &DashMap<CacheKey, u64>,
        backing: &Arc<dyn CredentialBacking>,
        durable: &AtomicBool,
    ) {
        // A newer write superseded this flush; let that one win instead.
        if generations.get(&key).map(|g| *g) != Some(generation) {
            return;
        }
        let Some(entry) = cache.get(&key).map(|e| e.clone()) else {
            return;
        };

        let (session_id, file_name) = key.clone();
        let result = match &entry.bytes {
            Some(bytes) => backing.set(&session_id, &file_name, bytes).await,
            None => backing.delete(&session_id, &file_name).await,
        };

        match result {
            Ok(()) => {
                durable.store(true, Ordering::Release);
                generations.remove(&key);
            }
            Err(e) => {
                // In-memory value remains the truth until the next successful flush.
                warn!(session_id = %session_id, file_name, error = %e, "credential flush failed");
                durable.store(false, Ordering::Release);
            }
        }
    }

    /// Persist the root identity record synchronously.
    pub async fn save_root(&self, session_id: &SessionId) -> Result<(), StoreError> {
        let key = (session_id.clone(), ROOT_FILE_NAME.to_owned());
        let Some(entry) = self.cache.get(&key).map(|e| e.clone()) else {
            return Ok(());
        };
        match &entry.bytes {
            Some(bytes) => match self.backing.set(session_id, ROOT_FILE_NAME, bytes).await {
                Ok(()) => {
                    self.durable.store(true, Ordering::Release);
                    self.generations.remove(&key);
                    Ok(())
                }
                Err(e) => {
                    self.durable.store(false, Ordering::Release);
                    Err(e)
                }
            },
            None => Ok(()),
        }
    }

    /// Batched key retrieval.
    pub async fn get_batch(
        &self,
        session_id: &SessionId,
        file_names: &[String],
    ) -> HashMap<String, Vec<u8>> {
        let mut out = HashMap::new();
        for name in file_names {
            if let Some(bytes) = self.get(session_id, name).await {
                out.insert(name.clone(), bytes);
            }
        }
        out
    }

    /// Batched write; `None` values delete. Stages every key in the cache
    /// immediately, then flushes them to the backing with at most
    /// `MAX_CONCURRENT_BATCH_FLUSHES` writes in flight at once — unlike
    /// `set`/`delete`'s debounced flush, this awaits the batch's own writes
    /// directly so the bound is on real I/O, not permits nobody releases.
    pub async fn set_batch(&self, session_id: &SessionId, batch: HashMap<String, Option<Vec<u8>>>) {
        let keys: Vec<CacheKey> = batch
            .into_iter()
            .map(|(file_name, value)| self.stage(session_id, &file_name, value))
            .collect();

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_BATCH_FLUSHES));
        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
            self.generations.insert(key.clone(), generation);

            let semaphore = semaphore.clone();
            let cache = self.cache.clone();
            let generations = self.generations.clone();
            let backing = self.backing.clone();
            let durable = self.durable.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.unwrap();
                Self::flush_one(key, generation, &cache, &generations, &backing, &durable).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Remove every record for this session: clears the cache and cancels
    /// any pending flushes, then deletes from the backing.
    pub async fn cleanup_session(&self, session_id: &SessionId) -> Result<(), StoreError> {
        self.cache.retain(|(sid, _), _| sid != session_id);
        self.generations.retain(|(sid, _), _| sid != session_id);
        self.backing.delete_session(session_id).await
    }

    /// Remediation for a `BadSession` (500) disconnect: clear every subkey
    /// except the root identity record. Does not touch `creds.json`.
    pub async fn remediate_bad_session(&self, session_id: &SessionId) -> Result<(), StoreError> {
        self.cache
            .retain(|(sid, file_name), _| sid != session_id || file_name == ROOT_FILE_NAME);
        self.generations
            .retain(|(sid, file_name), _| sid != session_id || file_name == ROOT_FILE_NAME);
        self.backing
            .delete_all_except(session_id, ROOT_FILE_NAME)
            .await
    }

    /// Probe whether this session already has a persisted root identity.
    pub async fn is_registered(&self, session_id: &SessionId) -> bool {
        self.get(session_id, ROOT_FILE_NAME).await.is_some()
    }

    /// Periodic maintenance: evict cache entries idle longer than
    /// `EVICTION_AGE`. Intended to be driven by a `tokio::time::interval`
    /// loop spawned alongside the fleet.
    pub fn evict_stale(&self) {
        let before = self.cache.len();
        self.cache.retain(|_, entry| entry.cached_at.elapsed() < EVICTION_AGE);
        let evicted = before - self.cache.len();
        if evicted > 0 {
            debug!(evicted, "credential cache maintenance sweep");
        }
    }

    pub fn maintenance_interval() -> Duration {
        MAINTENANCE_INTERVAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeBacking {
        data: StdMutex<HashMap<(SessionId, String), Vec<u8>>>,
        connected: AtomicBool,
    }

    impl FakeBacking {
        fn new() -> Self {
            Self {
                data: StdMutex::new(HashMap::new()),
                connected: AtomicBool::new(true),
            }
        }
    }

    #[async_trait::async_trait]
    impl CredentialBacking for FakeBacking {
        async fn get(&self, session_id: &SessionId, file_name: &str) -> Option<Vec<u8>> {
            self.data
                .lock()
                .unwrap()
                .get(&(session_id.clone(), file_name.to_owned()))
                .cloned()
        }

        async fn set(&self, session_id: &SessionId, file_name: &str, bytes: &[u8]) -> Result<(), StoreError> {
            self.data
                .lock()
                .unwrap()
                .insert((session_id.clone(), file_name.to_owned()), bytes.to_vec());
            Ok(())
        }

        async fn delete(&self, session_id: &SessionId, file_name: &str) -> Result<(), StoreError> {
            self.data
                .lock()
                .unwrap()
                .remove(&(session_id.clone(), file_name.to_owned()));
            Ok(())
        }

        async fn delete_all_except(&self, session_id: &SessionId, keep: &str) -> Result<(), StoreError> {
            self.data
                .lock()
                .unwrap()
                .retain(|(sid, name), _| sid != session_id || name == keep);
            Ok(())
        }

        async fn delete_session(&self, session_id: &SessionId) -> Result<(), StoreError> {
            self.data.lock().unwrap().retain(|(sid, _), _| sid != session_id);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::Acquire)
        }
    }

    #[tokio::test]
    async fn set_then_get_is_immediately_visible_from_cache() {
        let store = CredentialStore::new(Arc::new(FakeBacking::new()));
        let sid = SessionId::for_user(1);
        store.set(&sid, ROOT_FILE_NAME, b"identity".to_vec());
        assert_eq!(store.get(&sid, ROOT_FILE_NAME).await, Some(b"identity".to_vec()));
    }

    #[tokio::test]
    async fn debounced_write_eventually_reaches_backing() {
        let backing = Arc::new(FakeBacking::new());
        let store = CredentialStore::new(backing.clone());
        let sid = SessionId::for_user(1);
        store.set(&sid, ROOT_FILE_NAME, b"identity".to_vec());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(
            backing.get(&sid, ROOT_FILE_NAME).await,
            Some(b"identity".to_vec())
        );
    }

    #[tokio::test]
    async fn remediation_keeps_only_root_record() {
        let backing = Arc::new(FakeBacking::new());
        let store = CredentialStore::new(backing.clone());
        let sid = SessionId::for_user(1);
        backing.set(&sid, ROOT_FILE_NAME, b"root").await.unwrap();
        backing.set(&sid, "app-state-sync-key-1", b"subkey").await.unwrap();

        store.remediate_bad_session(&sid).await.unwrap();

        assert!(backing.get(&sid, ROOT_FILE_NAME).await.is_some());
        assert!(backing.get(&sid, "app-state-sync-key-1").await.is_none());
    }

    #[tokio::test]
    async fn cleanup_session_removes_everything() {
        let backing = Arc::new(FakeBacking::new());
        let store = CredentialStore::new(backing.clone());
        let sid = SessionId::for_user(1);
        backing.set(&sid, ROOT_FILE_NAME, b"root").await.unwrap();

        store.cleanup_session(&sid).await.unwrap();

        assert!(backing.get(&sid, ROOT_FILE_NAME).await.is_none());
        assert!(store.get(&sid, ROOT_FILE_NAME).await.is_none());
    }

    #[tokio::test]
    async fn is_registered_reflects_root_presence() {
        let backing = Arc::new(FakeBacking::new());
        let store = CredentialStore::new(backing.clone());
        let sid = SessionId::for_user(1);
        assert!(!store.is_registered(&sid).await);
        backing.set(&sid, ROOT_FILE_NAME, b"root").await.unwrap();
        assert!(store.is_registered(&sid).await);
    }

    #[tokio::test]
    async fn set_batch_over_the_concurrency_bound_completes_and_flushes_everything() {
        let backing = Arc::new(FakeBacking::new());
        let store = CredentialStore::new(backing.clone());
        let sid = SessionId::for_user(1);

        let key_count = MAX_CONCURRENT_BATCH_FLUSHES * 2 + 3;
        let batch: HashMap<String, Option<Vec<u8>>> = (0..key_count)
            .map(|i| (format!("key-{i}"), Some(format!("value-{i}").into_bytes())))
            .collect();

        tokio::time::timeout(Duration::from_secs(5), store.set_batch(&sid, batch))
            .await
            .expect("set_batch must not deadlock past the concurrency bound");

        for i in 0..key_count {
            assert_eq!(
                backing.get(&sid, &format!("key-{i}")).await,
                Some(format!("value-{i}").into_bytes())
            );
        }
    }
}
