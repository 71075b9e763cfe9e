//! Three-tier metadata cache.
//!
//! Reads check the process LRU, then the shared cache, then fall through to
//! the authoritative store via the caller's on-miss closure. Values are kept
//! as owned serialized bytes, never as aliases into adapter buffers.
//!
//! Writers invalidate: local removal, shared-cache deletion, and a pub/sub
//! message on the table's invalidation channel so every other gateway drops
//! its own LRU entry. The initial publish is a single attempt so the request
//! path never stalls on the cache bus; failed publishes drain through a
//! retry task with back-off.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

use crate::error::MetaError;

/// Channel name prefix for cache invalidation topics; the table name is
/// appended.
pub const INVALIDATION_CHANNEL_PREFIX: &str = "oxgate-cache-invalid-";

/// Capacity of the failed-invalidation retry queue.
const RETRY_QUEUE_CAPACITY: usize = 64;

/// Back-off between retries of a failed invalidation.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Attempts before a failed invalidation is dropped with a warning.
const RETRY_ATTEMPTS: u32 = 30;

// ---------------------------------------------------------------------------
// Cache tables and keys
// ---------------------------------------------------------------------------

/// Cached metadata tables. Each gets its own invalidation channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTable {
    /// Bucket rows, keyed by `<bucket>`.
    Buckets,
    /// Object rows, keyed by `<bucket>:<key>:<version|''>`.
    Objects,
}

impl CacheTable {
    /// Table name used in composite channel names.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buckets => "buckets",
            Self::Objects => "objects",
        }
    }

    /// Pub/sub channel carrying invalidations for this table.
    #[must_use]
    pub fn channel(&self) -> String {
        format!("{INVALIDATION_CHANNEL_PREFIX}{}", self.as_str())
    }
}

/// Composite cache key of an object lookup; `version` is empty for
/// "current version" reads.
#[must_use]
pub fn object_cache_key(bucket: &str, key: &str, version: &str) -> String {
    format!("{bucket}:{key}:{version}")
}

/// One invalidation message: drop `(table, key)` from local caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    /// Table the entry belongs to.
    pub table: CacheTable,
    /// Composite key of the entry.
    pub key: String,
}

/// Cache operating mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheKind {
    /// Bypass the LRU and shared tiers; every read hits the store.
    None,
    /// Full three-tier behavior.
    #[default]
    Layered,
}

// ---------------------------------------------------------------------------
// SharedCache seam
// ---------------------------------------------------------------------------

/// The shared cache tier: a TTL'd KV with a pub/sub invalidation bus,
/// shared by every gateway in the fleet.
#[async_trait::async_trait]
pub trait SharedCache: Send + Sync {
    /// Fetch cached bytes.
    async fn get(&self, table: CacheTable, key: &str) -> Result<Option<Vec<u8>>, MetaError>;

    /// Store bytes with a time-to-live.
    async fn set(
        &self,
        table: CacheTable,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), MetaError>;

    /// Drop the cached bytes for a key.
    async fn delete(&self, table: CacheTable, key: &str) -> Result<(), MetaError>;

    /// Publish an invalidation on the table's channel.
    async fn publish_invalid(&self, table: CacheTable, key: &str) -> Result<(), MetaError>;

    /// Subscribe to invalidations published by any gateway.
    fn subscribe_invalid(&self) -> broadcast::Receiver<Invalidation>;
}

// ---------------------------------------------------------------------------
// MetaCache
// ---------------------------------------------------------------------------

type CompositeKey = (CacheTable, String);

#[derive(Default)]
struct Lru {
    entries: HashMap<CompositeKey, Vec<u8>>,
    order: VecDeque<CompositeKey>,
}

impl Lru {
    fn get(&mut self, key: &CompositeKey) -> Option<Vec<u8>> {
        let value = self.entries.get(key).cloned()?;
        self.touch(key);
        Some(value)
    }

    fn touch(&mut self, key: &CompositeKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_front(key.clone());
    }

    fn insert(&mut self, key: CompositeKey, value: Vec<u8>, max_entries: usize) {
        self.entries.insert(key.clone(), value);
        self.touch(&key);
        while self.entries.len() > max_entries {
            // Evicting locally does not invalidate the shared tier; the
            // data there is still valid.
            let Some(oldest) = self.order.pop_back() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    fn remove(&mut self, key: &CompositeKey) {
        if self.entries.remove(key).is_some() {
            if let Some(pos) = self.order.iter().position(|k| k == key) {
                self.order.remove(pos);
            }
        }
    }
}

struct CacheCore {
    kind: CacheKind,
    max_entries: usize,
    shared_ttl: Duration,
    shared: Arc<dyn SharedCache>,
    lru: RwLock<Lru>,
    failed_tx: mpsc::Sender<Invalidation>,
}

/// Process-wide metadata cache handle. Cheap to clone.
#[derive(Clone)]
pub struct MetaCache {
    core: Arc<CacheCore>,
}

impl MetaCache {
    /// Build a cache over `shared` and start its invalidation subscriber
    /// and retry drains. Must be called within a tokio runtime.
    #[must_use]
    pub fn new(
        kind: CacheKind,
        max_entries: usize,
        shared_ttl: Duration,
        shared: Arc<dyn SharedCache>,
    ) -> Self {
        let (failed_tx, failed_rx) = mpsc::channel(RETRY_QUEUE_CAPACITY);
        let core = Arc::new(CacheCore {
            kind,
            max_entries,
            shared_ttl,
            shared: Arc::clone(&shared),
            lru: RwLock::new(Lru::default()),
            failed_tx,
        });

        if kind != CacheKind::None {
            tokio::spawn(subscriber_loop(
                Arc::downgrade(&core),
                shared.subscribe_invalid(),
            ));
            tokio::spawn(retry_loop(Arc::clone(&shared), failed_rx));
        }

        Self { core }
    }

    /// Look up `key`, falling through LRU, shared cache and finally the
    /// caller's `on_miss` closure. Misses populate both cache tiers.
    pub async fn get<T, F, Fut>(
        &self,
        table: CacheTable,
        key: &str,
        on_miss: F,
    ) -> Result<T, MetaError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, MetaError>>,
    {
        if self.core.kind == CacheKind::None {
            return on_miss().await;
        }

        let composite = (table, key.to_owned());
        if let Some(bytes) = self.core.lru.write().get(&composite) {
            trace!(table = table.as_str(), key, "metadata cache hit (local)");
            return Ok(serde_json::from_slice(&bytes)?);
        }

        match self.core.shared.get(table, key).await {
            Ok(Some(bytes)) => {
                trace!(table = table.as_str(), key, "metadata cache hit (shared)");
                let value = serde_json::from_slice(&bytes)?;
                self.core
                    .lru
                    .write()
                    .insert(composite, bytes, self.core.max_entries);
                return Ok(value);
            }
            Ok(None) => {}
            // A degraded shared cache must not fail reads; fall through to
            // the store.
            Err(e) => warn!(table = table.as_str(), key, error = %e, "shared cache read failed"),
        }

        let value = on_miss().await?;
        let bytes = serde_json::to_vec(&value)?;
        if let Err(e) = self
            .core
            .shared
            .set(table, key, &bytes, self.core.shared_ttl)
            .await
        {
            // Only costs another miss later.
            debug!(table = table.as_str(), key, error = %e, "shared cache populate failed");
        }
        self.core
            .lru
            .write()
            .insert(composite, bytes, self.core.max_entries);
        Ok(value)
    }

    /// Store a fresh value locally and invalidate every other gateway's
    /// local tier.
    pub async fn set<T: Serialize>(
        &self,
        table: CacheTable,
        key: &str,
        value: &T,
    ) -> Result<(), MetaError> {
        if self.core.kind == CacheKind::None {
            return Ok(());
        }
        let bytes = serde_json::to_vec(value)?;
        self.core
            .lru
            .write()
            .insert((table, key.to_owned()), bytes, self.core.max_entries);
        self.invalidate_shared(table, key).await;
        Ok(())
    }

    /// Drop an entry from every tier and tell other gateways to do the same.
    pub async fn remove(&self, table: CacheTable, key: &str) {
        if self.core.kind == CacheKind::None {
            return;
        }
        self.core.lru.write().remove(&(table, key.to_owned()));
        self.invalidate_shared(table, key).await;
    }

    /// Number of entries currently in the local tier.
    #[must_use]
    pub fn local_len(&self) -> usize {
        self.core.lru.read().entries.len()
    }

    async fn invalidate_shared(&self, table: CacheTable, key: &str) {
        let delete = self.core.shared.delete(table, key).await;
        let publish = self.core.shared.publish_invalid(table, key).await;
        if delete.is_err() || publish.is_err() {
            let entry = Invalidation {
                table,
                key: key.to_owned(),
            };
            if self.core.failed_tx.try_send(entry).is_err() {
                warn!(
                    table = table.as_str(),
                    key, "invalidation retry queue full, dropping entry"
                );
            }
        }
    }
}

impl std::fmt::Debug for MetaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaCache")
            .field("kind", &self.core.kind)
            .field("max_entries", &self.core.max_entries)
            .field("local_len", &self.local_len())
            .finish()
    }
}

/// Remove local entries named by invalidation messages from other gateways.
async fn subscriber_loop(
    core: Weak<CacheCore>,
    mut receiver: broadcast::Receiver<Invalidation>,
) {
    loop {
        match receiver.recv().await {
            Ok(message) => {
                let Some(core) = core.upgrade() else {
                    return;
                };
                core.lru.write().remove(&(message.table, message.key));
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Lost invalidations mean potentially stale local entries;
                // the TTL on the shared tier bounds the damage.
                warn!(skipped, "invalidation subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Re-drive invalidations whose first attempt failed.
async fn retry_loop(shared: Arc<dyn SharedCache>, mut failed_rx: mpsc::Receiver<Invalidation>) {
    while let Some(entry) = failed_rx.recv().await {
        let mut done = false;
        for _ in 0..RETRY_ATTEMPTS {
            let delete = shared.delete(entry.table, &entry.key).await;
            let publish = shared.publish_invalid(entry.table, &entry.key).await;
            if delete.is_ok() && publish.is_ok() {
                done = true;
                break;
            }
            tokio::time::sleep(RETRY_BACKOFF).await;
        }
        if !done {
            warn!(
                table = entry.table.as_str(),
                key = entry.key,
                "giving up on cache invalidation"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
