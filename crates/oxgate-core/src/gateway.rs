//! The gateway facade: configuration, metadata, blob clusters and the
//! recycle queue, passed explicitly to every operation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, warn};

use oxgate_blob::{pick_weighted, pool_for_size, BlobBackend};
use oxgate_meta::Meta;

use crate::config::Config;
use crate::error::{GatewayError, GatewayResult};

/// Capacity of the recycle queue. Writes hitting a saturated queue wait;
/// a backed-up collector is a reason to slow intake, not to drop orphans.
pub const RECYCLE_QUEUE_CAPACITY: usize = 100;

/// Blob backend handles keyed by cluster id.
pub type ClusterMap = HashMap<String, Arc<dyn BlobBackend>>;

/// One orphan blob headed for the garbage-collection table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecycleEntry {
    /// Bucket the blob was written for.
    pub bucket: String,
    /// Key the blob was written for.
    pub key: String,
    /// Cluster holding the blob.
    pub location: String,
    /// Pool holding the blob.
    pub pool: String,
    /// The orphaned blob id.
    pub object_id: String,
}

/// The assembled gateway core.
///
/// One instance serves all requests of a process. Holds shared handles
/// only; operations borrow it immutably.
pub struct Gateway {
    pub(crate) config: Arc<Config>,
    pub(crate) meta: Arc<Meta>,
    pub(crate) clusters: ClusterMap,
    recycle_tx: mpsc::Sender<RecycleEntry>,
}

impl Gateway {
    /// Assemble a gateway. The returned receiver feeds the collector
    /// ([`crate::gc::GcPool::start`]); dropping it unread leaks orphans.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        meta: Arc<Meta>,
        clusters: ClusterMap,
    ) -> (Arc<Self>, mpsc::Receiver<RecycleEntry>) {
        let (recycle_tx, recycle_rx) = mpsc::channel(RECYCLE_QUEUE_CAPACITY);
        (
            Arc::new(Self {
                config,
                meta,
                clusters,
                recycle_tx,
            }),
            recycle_rx,
        )
    }

    /// The metadata adapter.
    #[must_use]
    pub fn meta(&self) -> &Arc<Meta> {
        &self.meta
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Look up a cluster handle.
    pub(crate) fn cluster(&self, location: &str) -> GatewayResult<&Arc<dyn BlobBackend>> {
        self.clusters.get(location).ok_or_else(|| {
            GatewayError::Internal(anyhow::anyhow!("unknown blob cluster: {location}"))
        })
    }

    /// Queue an orphan blob for asynchronous removal. Every write path that
    /// already committed bytes to the backend calls this before returning
    /// an error.
    pub(crate) async fn recycle(&self, entry: RecycleEntry) {
        if let Err(e) = self.recycle_tx.send(entry).await {
            // Collector gone during shutdown; the orphan stays until the
            // next full scan finds nothing referencing it.
            error!(error = %e, "recycle queue closed, orphan blob not recorded");
        }
    }

    /// Pick the cluster and pool a new blob of `size` bytes should land in.
    ///
    /// Clusters are drawn proportionally to their recorded weights. When
    /// weights cannot be read, any available cluster wins; writing
    /// somewhere beats failing the request.
    pub(crate) async fn pick_cluster_and_pool(
        &self,
        size: i64,
    ) -> GatewayResult<(Arc<dyn BlobBackend>, String)> {
        let pool = if self.config.plain_pool.is_empty() {
            pool_for_size(size).to_owned()
        } else {
            self.config.plain_pool.clone()
        };

        let mut weights: Vec<(&str, u32)> = Vec::with_capacity(self.clusters.len());
        for fsid in self.clusters.keys() {
            match self.meta.get_cluster(fsid).await {
                Ok(cluster) => weights.push((fsid.as_str(), cluster.weight)),
                Err(e) => {
                    warn!(fsid, error = %e, "cannot read cluster weight");
                }
            }
        }

        if let Some(fsid) = pick_weighted(&weights) {
            if let Some(backend) = self.clusters.get(fsid) {
                return Ok((Arc::clone(backend), pool));
            }
        }

        // Fall open to any cluster rather than failing the write.
        warn!("no weighted cluster available, picking any");
        self.clusters
            .values()
            .next()
            .map(|backend| (Arc::clone(backend), pool))
            .ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("no blob clusters configured")))
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("instance_id", &self.config.instance_id)
            .field("clusters", &self.clusters.keys().collect::<Vec<_>>())
            .finish()
    }
}
