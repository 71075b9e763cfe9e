//! In-process implementation of the shared cache tier.
//!
//! Single-node deployments and tests run against [`MemorySharedCache`];
//! fleet deployments put a wire client (Redis-protocol or similar) behind
//! the same [`SharedCache`] trait, with one channel per table carrying
//! composite keys as messages.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::cache::{CacheTable, Invalidation, SharedCache};
use crate::error::MetaError;

/// Capacity of the invalidation fan-out channel.
const INVALIDATION_BUS_CAPACITY: usize = 1024;

/// Shared cache tier backed by a concurrent map, with TTL expiry checked on
/// read and a broadcast bus standing in for the fleet's pub/sub channels.
pub struct MemorySharedCache {
    entries: DashMap<(CacheTable, String), (Vec<u8>, Instant)>,
    bus: broadcast::Sender<Invalidation>,
}

impl MemorySharedCache {
    /// Create an empty shared cache.
    #[must_use]
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(INVALIDATION_BUS_CAPACITY);
        Self {
            entries: DashMap::new(),
            bus,
        }
    }

    /// Number of live (unexpired) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.value().1 > now)
            .count()
    }

    /// Whether the cache holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySharedCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SharedCache for MemorySharedCache {
    async fn get(&self, table: CacheTable, key: &str) -> Result<Option<Vec<u8>>, MetaError> {
        let composite = (table, key.to_owned());
        let Some(entry) = self.entries.get(&composite) else {
            return Ok(None);
        };
        let (value, expires) = entry.value();
        if *expires <= Instant::now() {
            drop(entry);
            self.entries.remove(&composite);
            return Ok(None);
        }
        Ok(Some(value.clone()))
    }

    async fn set(
        &self,
        table: CacheTable,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<(), MetaError> {
        self.entries.insert(
            (table, key.to_owned()),
            (value.to_vec(), Instant::now() + ttl),
        );
        Ok(())
    }

    async fn delete(&self, table: CacheTable, key: &str) -> Result<(), MetaError> {
        self.entries.remove(&(table, key.to_owned()));
        Ok(())
    }

    async fn publish_invalid(&self, table: CacheTable, key: &str) -> Result<(), MetaError> {
        // No subscribers is fine; broadcast only errors when nobody listens.
        let _ = self.bus.send(Invalidation {
            table,
            key: key.to_owned(),
        });
        Ok(())
    }

    fn subscribe_invalid(&self) -> broadcast::Receiver<Invalidation> {
        self.bus.subscribe()
    }
}
