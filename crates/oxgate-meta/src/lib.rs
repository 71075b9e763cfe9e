//! Metadata layer for the oxgate object storage gateway.
//!
//! Authoritative metadata lives in a wide-column store reached through the
//! [`KvStore`] seam: buckets, objects, the null-version map, multipart
//! uploads, users, clusters and garbage-collection records. Row keys are
//! binary and compound (see [`rowkey`]); their exact byte layout is what
//! makes "newest version first" prefix scans and tight stop-row bounds work.
//!
//! Reads go through a three-tier cache (process LRU, shared cache, store)
//! with pub/sub invalidation; see [`cache`].
//!
//! # Architecture
//!
//! ```text
//!   Meta (typed adapter)
//!     |-- MetaCache (LRU -> SharedCache -> on-miss closure)
//!     `-- KvStore (wide-column seam; MemoryKvStore for tests/embedding)
//! ```

pub mod cache;
pub mod error;
pub mod kv;
pub mod meta;
pub mod model;
pub mod rowkey;
pub mod shared;

pub use cache::{CacheKind, CacheTable, Invalidation, MetaCache, SharedCache};
pub use error::MetaError;
pub use kv::{Cells, KvStore, MemoryKvStore, Table};
pub use meta::{Meta, MetaConfig};
pub use model::bucket::Bucket;
pub use model::gc::GcRecord;
pub use model::multipart::{Multipart, Part, UploadMeta};
pub use model::object::{ObjMap, Object};
pub use model::types::{CannedAcl, Cluster, CorsRule, SseType, VersioningStatus};
pub use shared::MemorySharedCache;

/// Convenience result type for metadata operations.
pub type MetaResult<T> = Result<T, MetaError>;
