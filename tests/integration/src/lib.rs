//! End-to-end tests for the oxgate gateway core.
//!
//! Every test drives a full gateway wired to in-memory backends: the
//! wide-column store, the blob store and the shared cache tier. A
//! fault-injecting store wrapper lets tests kill metadata writes at chosen
//! points to observe rollback and garbage-collection behavior.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use tokio::sync::mpsc;

use oxgate_core::{
    ClusterMap, Config, Credential, Gateway, GatewayResult, GcPool, GcTuning, PutObjectArgs,
    PutObjectResult, RecycleEntry, SseRequest, StreamPayload,
};
use oxgate_meta::{
    CacheKind, CannedAcl, Cells, Cluster, KvStore, MemoryKvStore, MemorySharedCache, Meta,
    MetaConfig, MetaError, Object, Table,
};

use oxgate_blob::MemoryBlobStore;

static INIT: Once = Once::new();

/// Initialize tracing (once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// The default test caller.
#[must_use]
pub fn alice() -> Credential {
    Credential::new("alice")
}

/// Another caller, for access-control tests.
#[must_use]
pub fn mallory() -> Credential {
    Credential::new("mallory")
}

/// Hex MD5 of a body.
#[must_use]
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Generate a unique bucket name for a test.
#[must_use]
pub fn test_bucket_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string()[..8].to_owned();
    format!("test-{prefix}-{id}")
}

// ---------------------------------------------------------------------------
// Fault-injecting store wrapper
// ---------------------------------------------------------------------------

/// Wide-column store that can be told to fail writes against one table,
/// simulating a metadata outage between the blob write and the commit.
pub struct FaultInjectingKv {
    inner: MemoryKvStore,
    fail_puts: parking_lot::Mutex<Option<Table>>,
}

impl FaultInjectingKv {
    /// Fresh store with no faults armed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: MemoryKvStore::new(),
            fail_puts: parking_lot::Mutex::new(None),
        }
    }

    /// Fail every `put` against `table` until cleared.
    pub fn fail_puts_on(&self, table: Table) {
        *self.fail_puts.lock() = Some(table);
    }

    /// Stop injecting faults.
    pub fn clear_faults(&self) {
        *self.fail_puts.lock() = None;
    }
}

impl Default for FaultInjectingKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for FaultInjectingKv {
    async fn get(&self, table: Table, row: &[u8]) -> Result<Option<Cells>, MetaError> {
        self.inner.get(table, row).await
    }

    async fn put(&self, table: Table, row: &[u8], cells: Cells) -> Result<(), MetaError> {
        if *self.fail_puts.lock() == Some(table) {
            return Err(MetaError::Store("injected write fault".to_owned()));
        }
        self.inner.put(table, row, cells).await
    }

    async fn delete(&self, table: Table, row: &[u8]) -> Result<(), MetaError> {
        self.inner.delete(table, row).await
    }

    async fn scan(
        &self,
        table: Table,
        start: &[u8],
        stop: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Cells)>, MetaError> {
        self.inner.scan(table, start, stop, limit).await
    }

    async fn check_and_put(
        &self,
        table: Table,
        row: &[u8],
        family: &str,
        qualifier: &str,
        expected: &[u8],
        cells: Cells,
    ) -> Result<bool, MetaError> {
        self.inner
            .check_and_put(table, row, family, qualifier, expected, cells)
            .await
    }
}

// ---------------------------------------------------------------------------
// Test environment
// ---------------------------------------------------------------------------

/// A whole gateway over in-memory backends.
pub struct TestEnv {
    /// The gateway under test.
    pub gateway: Arc<Gateway>,
    /// Its metadata adapter.
    pub meta: Arc<Meta>,
    /// The raw store, for fault injection and direct inspection.
    pub kv: Arc<FaultInjectingKv>,
    /// The single blob cluster.
    pub store: Arc<MemoryBlobStore>,
    /// The shared cache tier, reusable by a second gateway.
    pub shared: Arc<MemorySharedCache>,
    /// Recycle queue tail; taken by [`TestEnv::start_gc`].
    pub recycle_rx: Option<mpsc::Receiver<RecycleEntry>>,
    clusters: ClusterMap,
}

/// Cluster id used by every test environment.
pub const TEST_FSID: &str = "fsid-test";

impl TestEnv {
    /// Build a gateway with one weighted cluster and a layered cache.
    pub async fn new() -> Self {
        init_tracing();
        let kv = Arc::new(FaultInjectingKv::new());
        let shared = Arc::new(MemorySharedCache::new());
        let meta = Meta::new(
            kv.clone() as Arc<dyn KvStore>,
            shared.clone() as Arc<dyn oxgate_meta::SharedCache>,
            MetaConfig {
                timeout: Duration::from_secs(5),
                cache_kind: CacheKind::Layered,
                cache_max_entries: 1024,
                cache_ttl: Duration::from_secs(60),
            },
        );
        meta.put_cluster(&Cluster {
            fsid: TEST_FSID.to_owned(),
            weight: 100,
        })
        .await
        .unwrap_or_else(|e| panic!("cluster seed failed: {e}"));

        let store = Arc::new(MemoryBlobStore::new(TEST_FSID));
        let mut clusters: ClusterMap = HashMap::new();
        clusters.insert(TEST_FSID.to_owned(), store.clone() as _);

        let (gateway, recycle_rx) =
            Gateway::new(Arc::new(Config::default()), meta.clone(), clusters.clone());
        Self {
            gateway,
            meta,
            kv,
            store,
            shared,
            recycle_rx: Some(recycle_rx),
            clusters,
        }
    }

    /// Start a collector with two workers and fast test timing. Call at
    /// most once per environment.
    pub fn start_gc(&mut self) -> GcPool {
        let rx = self
            .recycle_rx
            .take()
            .unwrap_or_else(|| panic!("collector already started"));
        let tuning = GcTuning {
            idle_pause: Duration::from_millis(20),
            sweep_pause: Duration::from_millis(20),
            backpressure_pause: Duration::from_millis(1),
            record_retry_pause: Duration::from_millis(20),
        };
        GcPool::start(
            self.meta.clone(),
            vec![self.clusters.clone(), self.clusters.clone()],
            rx,
            tuning,
        )
    }

    /// Build a second gateway over the same store and shared cache, the
    /// way a second fleet member would be wired.
    pub fn second_gateway(&self) -> Arc<Gateway> {
        let meta = Meta::new(
            self.kv.clone() as Arc<dyn KvStore>,
            self.shared.clone() as Arc<dyn oxgate_meta::SharedCache>,
            MetaConfig {
                timeout: Duration::from_secs(5),
                cache_kind: CacheKind::Layered,
                cache_max_entries: 1024,
                cache_ttl: Duration::from_secs(60),
            },
        );
        let (gateway, _rx) = Gateway::new(Arc::new(Config::default()), meta, self.clusters.clone());
        gateway
    }

    /// Create a bucket owned by alice and return its name.
    pub async fn create_bucket(&self, prefix: &str) -> String {
        let name = test_bucket_name(prefix);
        self.gateway
            .make_bucket(&name, CannedAcl::Private, &alice())
            .await
            .unwrap_or_else(|e| panic!("make_bucket {name} failed: {e}"));
        name
    }

    /// PUT a body with default arguments.
    pub async fn put(&self, bucket: &str, key: &str, body: &[u8]) -> PutObjectResult {
        self.put_with(bucket, key, body, PutObjectArgs::default())
            .await
            .unwrap_or_else(|e| panic!("put {bucket}/{key} failed: {e}"))
    }

    /// PUT a body with explicit arguments.
    pub async fn put_with(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        mut args: PutObjectArgs,
    ) -> GatewayResult<PutObjectResult> {
        if args.size == 0 {
            args.size = body.len() as i64;
        }
        self.gateway
            .put_object(
                bucket,
                key,
                &alice(),
                args,
                StreamPayload::from_bytes(Bytes::copy_from_slice(body)),
            )
            .await
    }

    /// Resolve object metadata for a version (empty for current).
    pub async fn info(&self, bucket: &str, key: &str, version: &str) -> GatewayResult<Object> {
        self.gateway
            .get_object_info(bucket, key, version, &alice())
            .await
    }

    /// GET a full object body for a version (empty for current).
    pub async fn get_bytes(
        &self,
        bucket: &str,
        key: &str,
        version: &str,
    ) -> GatewayResult<Vec<u8>> {
        let object = self.info(bucket, key, version).await?;
        self.read_object(&object, 0, object.size, &SseRequest::none())
            .await
    }

    /// Stream a range of an already-resolved object into memory.
    pub async fn read_object(
        &self,
        object: &Object,
        offset: i64,
        length: i64,
        sse: &SseRequest,
    ) -> GatewayResult<Vec<u8>> {
        let mut out = Vec::new();
        self.gateway
            .get_object(object, offset, length, &mut out, sse)
            .await?;
        Ok(out)
    }
}

mod test_bucket;
mod test_cache;
mod test_encryption;
mod test_gc;
mod test_list;
mod test_versioning;
