//! Blob backend seam and its in-process implementation.

use std::io::Cursor;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Write chunk size. Streaming writes hand the backend at most this many
/// bytes at a time; the object as a whole is never buffered.
pub const MAX_CHUNK_SIZE: usize = 512 << 10;

/// Cipher block granularity of aligned reads.
pub const AES_BLOCK_SIZE: u64 = 16;

/// Length of generated blob ids.
pub const BLOB_ID_LENGTH: usize = 36;

/// Reader handed out by [`BlobBackend::get_aligned_reader`].
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Round `value` down to the previous multiple of `block`.
#[must_use]
pub fn align_down(value: u64, block: u64) -> u64 {
    value - (value % block)
}

/// Round `value` up to the next multiple of `block`.
#[must_use]
pub fn align_up(value: u64, block: u64) -> u64 {
    value.div_ceil(block) * block
}

/// Generate a random blob id. The id space is large enough that collisions
/// within a pool are not a practical concern.
#[must_use]
pub fn unique_blob_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(BLOB_ID_LENGTH)
        .map(char::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by a blob backend.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// The addressed blob does not exist. Non-fatal for removals.
    #[error("blob not found: {pool}/{blob_id}")]
    NotFound {
        /// Pool the blob was addressed in.
        pool: String,
        /// The missing blob id.
        blob_id: String,
    },

    /// The backend failed.
    #[error("blob backend error: {0}")]
    Backend(String),

    /// Reading the caller's stream or writing the caller's sink failed.
    #[error("blob io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// BlobBackend trait
// ---------------------------------------------------------------------------

/// One blob cluster.
///
/// Implementations must be shareable across requests; the gateway keeps one
/// handle per cluster id per process.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Cluster identity (fsid).
    fn id(&self) -> &str;

    /// Stream `reader` into `(pool, blob_id)` and return the bytes written.
    /// Implementations consume the stream in [`MAX_CHUNK_SIZE`] chunks.
    /// A short count against the caller's declared size means the body
    /// ended early; judging that is the caller's job.
    async fn put(
        &self,
        pool: &str,
        blob_id: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, BlobError>;

    /// Copy `length` bytes starting at `offset` into `writer`.
    async fn get(
        &self,
        pool: &str,
        blob_id: &str,
        offset: u64,
        length: u64,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), BlobError>;

    /// Reader over the block-aligned range covering `[offset, offset+length)`:
    /// the start is rounded down and the end rounded up to
    /// [`AES_BLOCK_SIZE`]. Encrypted reads must use this entry point so the
    /// cipher stream starts on a block boundary.
    async fn get_aligned_reader(
        &self,
        pool: &str,
        blob_id: &str,
        offset: u64,
        length: u64,
    ) -> Result<BoxedReader, BlobError>;

    /// Remove a blob. Removing a missing blob returns
    /// [`BlobError::NotFound`], which collectors treat as success.
    async fn remove(&self, pool: &str, blob_id: &str) -> Result<(), BlobError>;

    /// Allocate a fresh blob id for this cluster.
    fn unique_blob_id(&self) -> String {
        unique_blob_id()
    }
}

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// In-process blob cluster keyed by `(pool, blob id)`.
pub struct MemoryBlobStore {
    fsid: String,
    blobs: DashMap<(String, String), Bytes>,
}

impl MemoryBlobStore {
    /// Create an empty cluster with the given identity.
    #[must_use]
    pub fn new(fsid: &str) -> Self {
        Self {
            fsid: fsid.to_owned(),
            blobs: DashMap::new(),
        }
    }

    /// Number of blobs currently stored across all pools.
    #[must_use]
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    /// Whether `(pool, blob_id)` exists.
    #[must_use]
    pub fn contains(&self, pool: &str, blob_id: &str) -> bool {
        self.blobs
            .contains_key(&(pool.to_owned(), blob_id.to_owned()))
    }

    fn fetch(&self, pool: &str, blob_id: &str) -> Result<Bytes, BlobError> {
        self.blobs
            .get(&(pool.to_owned(), blob_id.to_owned()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BlobError::NotFound {
                pool: pool.to_owned(),
                blob_id: blob_id.to_owned(),
            })
    }
}

impl std::fmt::Debug for MemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlobStore")
            .field("fsid", &self.fsid)
            .field("blob_count", &self.blob_count())
            .finish()
    }
}

#[async_trait]
impl BlobBackend for MemoryBlobStore {
    fn id(&self) -> &str {
        &self.fsid
    }

    async fn put(
        &self,
        pool: &str,
        blob_id: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, BlobError> {
        let mut stored = BytesMut::new();
        let mut chunk = BytesMut::with_capacity(MAX_CHUNK_SIZE);
        loop {
            chunk.clear();
            // Fill up to one chunk before appending, so arbitrarily large
            // bodies move through in bounded steps.
            while chunk.len() < MAX_CHUNK_SIZE {
                let n = reader.read_buf(&mut chunk).await?;
                if n == 0 {
                    break;
                }
            }
            if chunk.is_empty() {
                break;
            }
            stored.extend_from_slice(&chunk);
        }
        let written = stored.len() as u64;
        trace!(fsid = %self.fsid, pool, blob_id, written, "stored blob");
        self.blobs
            .insert((pool.to_owned(), blob_id.to_owned()), stored.freeze());
        Ok(written)
    }

    async fn get(
        &self,
        pool: &str,
        blob_id: &str,
        offset: u64,
        length: u64,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), BlobError> {
        let data = self.fetch(pool, blob_id)?;
        let start = (offset as usize).min(data.len());
        let end = (offset.saturating_add(length) as usize).min(data.len());
        let mut slice = data.slice(start..end);
        while !slice.is_empty() {
            let take = slice.len().min(MAX_CHUNK_SIZE);
            writer.write_all(&slice[..take]).await?;
            slice = slice.slice(take..);
        }
        writer.flush().await?;
        Ok(())
    }

    async fn get_aligned_reader(
        &self,
        pool: &str,
        blob_id: &str,
        offset: u64,
        length: u64,
    ) -> Result<BoxedReader, BlobError> {
        let data = self.fetch(pool, blob_id)?;
        let start = (align_down(offset, AES_BLOCK_SIZE) as usize).min(data.len());
        let end =
            (align_up(offset.saturating_add(length), AES_BLOCK_SIZE) as usize).min(data.len());
        Ok(Box::new(Cursor::new(data.slice(start..end))))
    }

    async fn remove(&self, pool: &str, blob_id: &str) -> Result<(), BlobError> {
        let removed = self
            .blobs
            .remove(&(pool.to_owned(), blob_id.to_owned()))
            .is_some();
        if removed {
            trace!(fsid = %self.fsid, pool, blob_id, "removed blob");
            Ok(())
        } else {
            Err(BlobError::NotFound {
                pool: pool.to_owned(),
                blob_id: blob_id.to_owned(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
