//! Blob backend layer for the oxgate object storage gateway.
//!
//! Object bytes live in a distributed blob store addressed by
//! `(pool, blob id)` within a cluster. [`BlobBackend`] is the seam one
//! cluster client implements: streaming writes in fixed-size chunks, ranged
//! reads, block-aligned readers for encrypted objects, and removal.
//! [`MemoryBlobStore`] is the in-process implementation used by tests and
//! single-node setups.
//!
//! [`placement`] picks the target `(cluster, pool)` for a new blob.

pub mod backend;
pub mod placement;

pub use backend::{
    align_down, align_up, unique_blob_id, BlobBackend, BlobError, BoxedReader, MemoryBlobStore,
    AES_BLOCK_SIZE, BLOB_ID_LENGTH, MAX_CHUNK_SIZE,
};
pub use placement::{pick_weighted, pool_for_size, BIG_FILE_POOL, BIG_FILE_THRESHOLD, SMALL_FILE_POOL};
