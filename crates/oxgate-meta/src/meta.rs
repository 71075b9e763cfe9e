//! Typed metadata adapter.
//!
//! [`Meta`] wraps the wide-column seam with typed operations per table and
//! routes hot reads through the [`MetaCache`]. Every store call is bounded
//! by the configured timeout; a deadline miss is a terminal error for the
//! calling request.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::cache::{object_cache_key, CacheKind, CacheTable, MetaCache, SharedCache};
use crate::error::MetaError;
use crate::kv::{cells_with_family, scan_stop_row, KvStore, Table};
use crate::model::bucket::{Bucket, BUCKET_COLUMN_FAMILY};
use crate::model::gc::GcRecord;
use crate::model::multipart::{Multipart, Part, MULTIPART_COLUMN_FAMILY};
use crate::model::object::{ObjMap, Object};
use crate::model::types::Cluster;
use crate::rowkey;

/// Retry budget for compare-and-set mutations of contended user rows.
const CAS_RETRY_LIMIT: u32 = 3;

/// Column family of the cluster table.
const CLUSTER_COLUMN_FAMILY: &str = "c";
/// Column family of the user table.
const USER_COLUMN_FAMILY: &str = "u";

/// Scan batch size used when probing a bucket for remaining rows.
const EMPTINESS_PROBE_BATCH: usize = 64;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables of the metadata adapter.
#[derive(Debug, Clone)]
pub struct MetaConfig {
    /// Deadline applied to every store call.
    pub timeout: Duration,
    /// Cache operating mode.
    pub cache_kind: CacheKind,
    /// Bound of the process LRU tier.
    pub cache_max_entries: usize,
    /// TTL of shared-cache entries.
    pub cache_ttl: Duration,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            cache_kind: CacheKind::Layered,
            cache_max_entries: 100_000,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

// ---------------------------------------------------------------------------
// Meta
// ---------------------------------------------------------------------------

/// Typed facade over the metadata store and its cache.
pub struct Meta {
    kv: Arc<dyn KvStore>,
    /// Three-tier metadata cache; callers invalidate through this handle.
    pub cache: MetaCache,
    timeout: Duration,
    // Usage updates are read-modify-write; this short lock is the only one
    // held across a store call.
    usage_lock: tokio::sync::Mutex<()>,
}

impl Meta {
    /// Wire the adapter to a store and a shared cache tier. Must be called
    /// within a tokio runtime (the cache starts background tasks).
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, shared: Arc<dyn SharedCache>, config: MetaConfig) -> Arc<Self> {
        let cache = MetaCache::new(
            config.cache_kind,
            config.cache_max_entries,
            config.cache_ttl,
            shared,
        );
        Arc::new(Self {
            kv,
            cache,
            timeout: config.timeout,
            usage_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Bound a store call by the configured deadline.
    async fn bounded<T, F>(&self, fut: F) -> Result<T, MetaError>
    where
        F: Future<Output = Result<T, MetaError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| MetaError::Timeout)?
    }

    // -----------------------------------------------------------------------
    // Buckets
    // -----------------------------------------------------------------------

    /// Fetch a bucket, cache-through.
    pub async fn get_bucket(&self, name: &str) -> Result<Bucket, MetaError> {
        self.cache
            .get(CacheTable::Buckets, name, || async move {
                let cells = self
                    .bounded(self.kv.get(Table::Buckets, name.as_bytes()))
                    .await?
                    .ok_or_else(|| MetaError::NoSuchBucket {
                        bucket: name.to_owned(),
                    })?;
                Bucket::from_cells(name, &cells)
            })
            .await
    }

    /// Write a bucket row unconditionally.
    pub async fn put_bucket(&self, bucket: &Bucket) -> Result<(), MetaError> {
        let cells = bucket.to_cells()?;
        self.bounded(self.kv.put(Table::Buckets, bucket.name.as_bytes(), cells))
            .await
    }

    /// Create a bucket row iff no bucket of that name exists yet. Returns
    /// whether this call won the creation race.
    pub async fn create_bucket(&self, bucket: &Bucket) -> Result<bool, MetaError> {
        let cells = bucket.to_cells()?;
        self.bounded(self.kv.check_and_put(
            Table::Buckets,
            bucket.name.as_bytes(),
            BUCKET_COLUMN_FAMILY,
            "UID",
            b"",
            cells,
        ))
        .await
    }

    /// Owner of an existing bucket row, bypassing the cache. Used to decide
    /// between "exists" and "exists and is yours" on creation conflicts.
    pub async fn get_bucket_owner(&self, name: &str) -> Result<Option<String>, MetaError> {
        let cells = self
            .bounded(self.kv.get(Table::Buckets, name.as_bytes()))
            .await?;
        Ok(cells
            .and_then(|c| c.get(BUCKET_COLUMN_FAMILY).and_then(|f| f.get("UID").cloned()))
            .map(|raw| String::from_utf8_lossy(&raw).into_owned()))
    }

    /// Remove a bucket row.
    pub async fn delete_bucket(&self, name: &str) -> Result<(), MetaError> {
        self.bounded(self.kv.delete(Table::Buckets, name.as_bytes()))
            .await
    }

    /// Adjust the bucket's stored-bytes counter by `delta`.
    pub async fn update_usage(&self, name: &str, delta: i64) -> Result<(), MetaError> {
        let _guard = self.usage_lock.lock().await;
        let cells = self
            .bounded(self.kv.get(Table::Buckets, name.as_bytes()))
            .await?
            .ok_or_else(|| MetaError::NoSuchBucket {
                bucket: name.to_owned(),
            })?;
        let current = cells
            .get(BUCKET_COLUMN_FAMILY)
            .and_then(|f| f.get("usage"))
            .and_then(|raw| raw.as_slice().try_into().ok())
            .map(i64::from_be_bytes)
            .unwrap_or(0);
        let next = current.saturating_add(delta);
        let update = cells_with_family(
            BUCKET_COLUMN_FAMILY,
            vec![("usage".to_owned(), next.to_be_bytes().to_vec())],
        );
        self.bounded(self.kv.put(Table::Buckets, name.as_bytes(), update))
            .await
    }

    /// Current stored-bytes counter of a bucket, bypassing the cache.
    pub async fn get_usage(&self, name: &str) -> Result<i64, MetaError> {
        let cells = self
            .bounded(self.kv.get(Table::Buckets, name.as_bytes()))
            .await?
            .ok_or_else(|| MetaError::NoSuchBucket {
                bucket: name.to_owned(),
            })?;
        Ok(cells
            .get(BUCKET_COLUMN_FAMILY)
            .and_then(|f| f.get("usage"))
            .and_then(|raw| raw.as_slice().try_into().ok())
            .map(i64::from_be_bytes)
            .unwrap_or(0))
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    /// Fetch the newest version of `(bucket, key)`, cache-through. The row
    /// layout makes this a single-row prefix scan.
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Object, MetaError> {
        let cache_key = object_cache_key(bucket, key, "");
        self.cache
            .get(CacheTable::Objects, &cache_key, || async move {
                let prefix = rowkey::object_rowkey_prefix(bucket, key);
                let stop = scan_stop_row(&prefix);
                let rows = self
                    .bounded(self.kv.scan(Table::Objects, &prefix, &stop, 1))
                    .await?;
                let (row, cells) = rows.first().ok_or_else(|| MetaError::NoSuchKey {
                    key: key.to_owned(),
                })?;
                let object = Object::from_cells(row, cells)?;
                if object.name != key || object.bucket_name != bucket {
                    return Err(MetaError::NoSuchKey {
                        key: key.to_owned(),
                    });
                }
                Ok(object)
            })
            .await
    }

    /// Fetch one concrete version of `(bucket, key)`, cache-through.
    /// `version` is an opaque id, never `"null"` (resolve that through the
    /// null-version map first).
    pub async fn get_object_version(
        &self,
        bucket: &str,
        key: &str,
        version: &str,
    ) -> Result<Object, MetaError> {
        let cache_key = object_cache_key(bucket, key, version);
        self.cache
            .get(CacheTable::Objects, &cache_key, || async move {
                let row = rowkey::object_rowkey_for_version(bucket, key, version)?;
                let cells = self
                    .bounded(self.kv.get(Table::Objects, &row))
                    .await?
                    .ok_or_else(|| MetaError::NoSuchVersion {
                        key: key.to_owned(),
                        version: version.to_owned(),
                    })?;
                let object = Object::from_cells(&row, &cells)?;
                if object.name != key {
                    return Err(MetaError::NoSuchKey {
                        key: key.to_owned(),
                    });
                }
                Ok(object)
            })
            .await
    }

    /// Write an object version row.
    pub async fn put_object_entry(&self, object: &Object) -> Result<(), MetaError> {
        let cells = object.to_cells()?;
        self.bounded(self.kv.put(Table::Objects, &object.rowkey(), cells))
            .await
    }

    /// Remove an object version row.
    pub async fn delete_object_entry(&self, object: &Object) -> Result<(), MetaError> {
        self.bounded(self.kv.delete(Table::Objects, &object.rowkey()))
            .await
    }

    /// Scan object rows of one bucket in row-key order, starting at
    /// `start_after` (exclusive) when given. Rows of other buckets sharing
    /// the name prefix are filtered out after decoding.
    pub async fn scan_bucket_objects(
        &self,
        bucket: &str,
        start_after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<Object>, MetaError> {
        let mut start = match start_after {
            // The next key after `row` in byte order is `row || 0x00`.
            Some(row) => {
                let mut next = row.to_vec();
                next.push(0);
                next
            }
            None => bucket.as_bytes().to_vec(),
        };
        let stop = scan_stop_row(bucket.as_bytes());
        let mut out = Vec::new();
        loop {
            let rows = self
                .bounded(self.kv.scan(Table::Objects, &start, &stop, limit))
                .await?;
            let batch_len = rows.len();
            let mut last_row = None;
            for (row, cells) in rows {
                last_row = Some(row.clone());
                let object = Object::from_cells(&row, &cells)?;
                if object.bucket_name == bucket {
                    out.push(object);
                    if out.len() >= limit {
                        return Ok(out);
                    }
                }
            }
            if batch_len < limit {
                return Ok(out);
            }
            match last_row {
                Some(row) => {
                    start = row;
                    start.push(0);
                }
                None => return Ok(out),
            }
        }
    }

    /// Whether the bucket still has any object row.
    pub async fn bucket_has_objects(&self, bucket: &str) -> Result<bool, MetaError> {
        let rows = self
            .scan_bucket_objects(bucket, None, EMPTINESS_PROBE_BATCH)
            .await?;
        Ok(!rows.is_empty())
    }

    // -----------------------------------------------------------------------
    // Null-version map
    // -----------------------------------------------------------------------

    /// Fetch the null-version pointer of `(bucket, key)`.
    pub async fn get_objmap(&self, bucket: &str, key: &str) -> Result<ObjMap, MetaError> {
        let row = rowkey::objmap_rowkey(bucket, key);
        let cells = self
            .bounded(self.kv.get(Table::ObjMap, &row))
            .await?
            .ok_or_else(|| MetaError::NoSuchKey {
                key: key.to_owned(),
            })?;
        ObjMap::from_cells(bucket, key, &cells)
    }

    /// Write a null-version pointer.
    pub async fn put_objmap_entry(&self, objmap: &ObjMap) -> Result<(), MetaError> {
        self.bounded(
            self.kv
                .put(Table::ObjMap, &objmap.rowkey(), objmap.to_cells()),
        )
        .await
    }

    /// Remove a null-version pointer.
    pub async fn delete_objmap_entry(&self, objmap: &ObjMap) -> Result<(), MetaError> {
        self.bounded(self.kv.delete(Table::ObjMap, &objmap.rowkey()))
            .await
    }

    // -----------------------------------------------------------------------
    // Multipart uploads
    // -----------------------------------------------------------------------

    /// Write a fresh upload row (metadata cell, no parts yet).
    pub async fn create_multipart(&self, multipart: &Multipart) -> Result<(), MetaError> {
        let cells = multipart.to_cells()?;
        self.bounded(self.kv.put(Table::Multiparts, &multipart.rowkey(), cells))
            .await
    }

    /// Fetch an upload addressed by its opaque id.
    pub async fn get_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Multipart, MetaError> {
        let row = rowkey::multipart_rowkey_for_upload_id(bucket, key, upload_id).map_err(|_| {
            MetaError::NoSuchUpload {
                upload_id: upload_id.to_owned(),
            }
        })?;
        let cells = self
            .bounded(self.kv.get(Table::Multiparts, &row))
            .await?
            .ok_or_else(|| MetaError::NoSuchUpload {
                upload_id: upload_id.to_owned(),
            })?;
        Multipart::from_cells(&row, bucket, &cells)
    }

    /// Write (or overwrite) a single part cell of an upload.
    pub async fn put_multipart_part(
        &self,
        multipart: &Multipart,
        part: &Part,
    ) -> Result<(), MetaError> {
        let (qualifier, value) = part.to_cell()?;
        let cells = cells_with_family(MULTIPART_COLUMN_FAMILY, vec![(qualifier, value)]);
        self.bounded(self.kv.put(Table::Multiparts, &multipart.rowkey(), cells))
            .await
    }

    /// Remove an upload row.
    pub async fn delete_multipart(&self, multipart: &Multipart) -> Result<(), MetaError> {
        self.bounded(self.kv.delete(Table::Multiparts, &multipart.rowkey()))
            .await
    }

    /// Scan upload rows of one bucket in row-key order.
    pub async fn scan_bucket_multiparts(
        &self,
        bucket: &str,
        start_after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<Multipart>, MetaError> {
        let start = match start_after {
            Some(row) => {
                let mut next = row.to_vec();
                next.push(0);
                next
            }
            None => bucket.as_bytes().to_vec(),
        };
        let stop = scan_stop_row(bucket.as_bytes());
        let rows = self
            .bounded(self.kv.scan(Table::Multiparts, &start, &stop, limit))
            .await?;
        let mut out = Vec::new();
        for (row, cells) in rows {
            // Rows of longer bucket names share the prefix; decoding with
            // the wrong bucket produces a mismatched name, so probe first.
            if let Ok(multipart) = Multipart::from_cells(&row, bucket, &cells) {
                if multipart.rowkey() == row {
                    out.push(multipart);
                }
            }
        }
        Ok(out)
    }

    /// Whether the bucket still has any in-progress upload.
    pub async fn bucket_has_multiparts(&self, bucket: &str) -> Result<bool, MetaError> {
        let rows = self
            .scan_bucket_multiparts(bucket, None, EMPTINESS_PROBE_BATCH)
            .await?;
        Ok(!rows.is_empty())
    }

    // -----------------------------------------------------------------------
    // Clusters
    // -----------------------------------------------------------------------

    /// Fetch a cluster descriptor.
    pub async fn get_cluster(&self, fsid: &str) -> Result<Cluster, MetaError> {
        let cells = self
            .bounded(self.kv.get(Table::Cluster, fsid.as_bytes()))
            .await?
            .ok_or_else(|| MetaError::NoSuchKey {
                key: fsid.to_owned(),
            })?;
        let raw = cells
            .get(CLUSTER_COLUMN_FAMILY)
            .and_then(|f| f.get("weight"))
            .ok_or_else(|| MetaError::CorruptRow {
                table: "cluster",
                reason: "missing weight cell".to_owned(),
            })?;
        let weight = u32::from_be_bytes(raw.as_slice().try_into().map_err(|_| {
            MetaError::CorruptRow {
                table: "cluster",
                reason: "bad weight cell".to_owned(),
            }
        })?);
        Ok(Cluster {
            fsid: fsid.to_owned(),
            weight,
        })
    }

    /// Write a cluster descriptor.
    pub async fn put_cluster(&self, cluster: &Cluster) -> Result<(), MetaError> {
        let cells = cells_with_family(
            CLUSTER_COLUMN_FAMILY,
            vec![("weight".to_owned(), cluster.weight.to_be_bytes().to_vec())],
        );
        self.bounded(self.kv.put(Table::Cluster, cluster.fsid.as_bytes(), cells))
            .await
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    /// Create the user row with an empty bucket list if it does not exist.
    pub async fn ensure_user_exists(&self, user_id: &str) -> Result<(), MetaError> {
        let empty = serde_json::to_vec(&Vec::<String>::new())?;
        let cells = cells_with_family(USER_COLUMN_FAMILY, vec![("buckets".to_owned(), empty)]);
        // Losing the race means the row exists, which is the goal.
        let _ = self
            .bounded(self.kv.check_and_put(
                Table::Users,
                user_id.as_bytes(),
                USER_COLUMN_FAMILY,
                "buckets",
                b"",
                cells,
            ))
            .await?;
        Ok(())
    }

    /// Bucket names owned by a user.
    pub async fn get_user_buckets(&self, user_id: &str) -> Result<Vec<String>, MetaError> {
        let Some(cells) = self
            .bounded(self.kv.get(Table::Users, user_id.as_bytes()))
            .await?
        else {
            return Ok(Vec::new());
        };
        let raw = cells
            .get(USER_COLUMN_FAMILY)
            .and_then(|f| f.get("buckets"))
            .ok_or_else(|| MetaError::CorruptRow {
                table: "users",
                reason: "missing buckets cell".to_owned(),
            })?;
        Ok(serde_json::from_slice(raw)?)
    }

    /// Append `bucket` to the user's bucket list with a bounded CAS loop.
    pub async fn add_bucket_for_user(&self, bucket: &str, user_id: &str) -> Result<(), MetaError> {
        self.ensure_user_exists(user_id).await?;
        self.mutate_user_buckets(user_id, |mut buckets| {
            buckets.push(bucket.to_owned());
            buckets
        })
        .await
    }

    /// Remove `bucket` from the user's bucket list with a bounded CAS loop.
    pub async fn remove_bucket_for_user(
        &self,
        bucket: &str,
        user_id: &str,
    ) -> Result<(), MetaError> {
        let bucket = bucket.to_owned();
        self.mutate_user_buckets(user_id, move |buckets| {
            buckets.into_iter().filter(|b| *b != bucket).collect()
        })
        .await
    }

    async fn mutate_user_buckets<F>(&self, user_id: &str, mutate: F) -> Result<(), MetaError>
    where
        F: Fn(Vec<String>) -> Vec<String>,
    {
        for attempt in 0..CAS_RETRY_LIMIT {
            let Some(cells) = self
                .bounded(self.kv.get(Table::Users, user_id.as_bytes()))
                .await?
            else {
                return Err(MetaError::CorruptRow {
                    table: "users",
                    reason: format!("user row missing for {user_id}"),
                });
            };
            let current = cells
                .get(USER_COLUMN_FAMILY)
                .and_then(|f| f.get("buckets"))
                .cloned()
                .unwrap_or_default();
            let buckets: Vec<String> = serde_json::from_slice(&current)?;
            let updated = serde_json::to_vec(&mutate(buckets))?;
            let put = cells_with_family(USER_COLUMN_FAMILY, vec![("buckets".to_owned(), updated)]);
            let applied = self
                .bounded(self.kv.check_and_put(
                    Table::Users,
                    user_id.as_bytes(),
                    USER_COLUMN_FAMILY,
                    "buckets",
                    &current,
                    put,
                ))
                .await?;
            if applied {
                return Ok(());
            }
            debug!(user_id, attempt, "user bucket list CAS lost the race");
        }
        warn!(user_id, "user bucket list CAS exhausted retries");
        Err(MetaError::CasExhausted {
            row: user_id.to_owned(),
        })
    }

    // -----------------------------------------------------------------------
    // Garbage collection
    // -----------------------------------------------------------------------

    /// Record the blobs referenced by an object row as orphans.
    pub async fn put_object_to_gc(&self, object: &Object) -> Result<GcRecord, MetaError> {
        let record = GcRecord::from_object(object, Utc::now());
        self.put_gc_record(&record).await?;
        Ok(record)
    }

    /// Write an orphan record.
    pub async fn put_gc_record(&self, record: &GcRecord) -> Result<(), MetaError> {
        let cells = record.to_cells()?;
        self.bounded(
            self.kv
                .put(Table::GarbageCollection, &record.rowkey(), cells),
        )
        .await
    }

    /// Scan orphan records in row-key order, resuming after `start_after`.
    pub async fn scan_gc_records(
        &self,
        limit: usize,
        start_after: Option<&[u8]>,
    ) -> Result<Vec<GcRecord>, MetaError> {
        let start = match start_after {
            Some(row) => {
                let mut next = row.to_vec();
                next.push(0);
                next
            }
            None => Vec::new(),
        };
        let rows = self
            .bounded(self.kv.scan(Table::GarbageCollection, &start, &[], limit))
            .await?;
        rows.iter()
            .map(|(_, cells)| GcRecord::from_cells(cells))
            .collect()
    }

    /// Remove a reclaimed orphan record.
    pub async fn remove_gc_record(&self, record: &GcRecord) -> Result<(), MetaError> {
        self.bounded(self.kv.delete(Table::GarbageCollection, &record.rowkey()))
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
