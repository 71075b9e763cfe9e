//! Core of the oxgate S3-compatible object storage gateway.
//!
//! This crate orchestrates the storage layers: object bytes stream into a
//! blob backend (`oxgate-blob`), authoritative metadata lands in a
//! wide-column store behind a three-tier cache (`oxgate-meta`), and blobs
//! orphaned by overwrites, deletes and failed commits are reclaimed
//! asynchronously by the collector in [`gc`].
//!
//! # Architecture
//!
//! ```text
//! HTTP / auth layer (external)
//!        |
//!        v
//!   Gateway  -- ops: bucket, object, multipart, list
//!     |    \
//!     |     `-- RecycleQueue --> GcPool --> blob removal
//!     v
//!   Meta (cache + wide-column store)      BlobBackend clusters
//! ```
//!
//! The HTTP router, XML codecs, signature canonicalization and IAM lookups
//! live upstream; this crate consumes their results as typed values
//! ([`types::Credential`], [`payload::StreamPayload`], resolved ACLs).

pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod gc;
mod ops;
pub mod payload;
pub mod stream;
pub mod types;

pub use config::{CacheConfig, Config};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{ClusterMap, Gateway, RecycleEntry};
pub use gc::{GcPool, GcTuning};
pub use ops::multipart::{
    CompleteMultipartResult, CompletePart, MAX_PART_NUMBER, MAX_PART_SIZE, MIN_PART_SIZE,
};
pub use payload::{PayloadVerifier, StreamPayload};
pub use types::{
    Credential, DeleteObjectResult, ListObjectsResult, ListPartsResult, ListUploadsResult,
    ListVersionsResult, ObjectVersionEntry, PutObjectArgs, PutObjectResult, SseRequest,
};
