//! Request and result types exchanged with the HTTP layer.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use oxgate_meta::{CannedAcl, Multipart, Object, Part, SseType};

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// An authenticated caller, resolved by the IAM layer upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    /// Stable user id; empty for anonymous requests.
    pub user_id: String,
    /// Human-readable name for listings.
    pub display_name: String,
}

impl Credential {
    /// Build a credential for `user_id`, reusing it as display name.
    #[must_use]
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_owned(),
            display_name: user_id.to_owned(),
        }
    }

    /// Whether this is an anonymous caller.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SseRequest
// ---------------------------------------------------------------------------

/// Resolved server-side encryption headers of one request.
#[derive(Debug, Clone, Default)]
pub struct SseRequest {
    /// Requested mode.
    pub sse_type: SseType,
    /// Customer-provided 32-byte key for customer-key mode.
    pub customer_key: Vec<u8>,
    /// Customer key of the copy source, for copy requests reading
    /// customer-encrypted objects.
    pub copy_source_customer_key: Vec<u8>,
}

impl SseRequest {
    /// No encryption requested.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Gateway-managed encryption.
    #[must_use]
    pub fn s3_managed() -> Self {
        Self {
            sse_type: SseType::S3,
            ..Self::default()
        }
    }

    /// Customer-key encryption.
    #[must_use]
    pub fn customer(key: &[u8]) -> Self {
        Self {
            sse_type: SseType::Customer,
            customer_key: key.to_vec(),
            copy_source_customer_key: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Put / delete results
// ---------------------------------------------------------------------------

/// Arguments of a PUT beyond bucket, key and body.
#[derive(Debug, Clone, Default)]
pub struct PutObjectArgs {
    /// Declared body size; negative when unknown.
    pub size: i64,
    /// Content type of the object.
    pub content_type: Option<String>,
    /// Hex MD5 from the Content-MD5 header, when the client sent one.
    pub content_md5: Option<String>,
    /// Resolved canned ACL of the new object.
    pub acl: CannedAcl,
    /// Encryption request.
    pub sse: SseRequest,
    /// Caller-supplied attributes.
    pub attributes: HashMap<String, String>,
}

/// Result of a PUT or COPY.
#[derive(Debug, Clone, Default)]
pub struct PutObjectResult {
    /// Hex MD5 of the stored bytes (the ETag for single-part objects).
    pub md5: String,
    /// Stored last-modified time.
    pub last_modified: DateTime<Utc>,
    /// Version id, present when the bucket has versioning enabled.
    pub version_id: Option<String>,
}

/// Result of a DELETE.
#[derive(Debug, Clone, Default)]
pub struct DeleteObjectResult {
    /// Version the delete addressed or created.
    pub version_id: Option<String>,
    /// Whether a delete marker was written.
    pub delete_marker: bool,
}

// ---------------------------------------------------------------------------
// Listing results
// ---------------------------------------------------------------------------

/// Result of a list-objects call (v1 or v2).
#[derive(Debug, Clone, Default)]
pub struct ListObjectsResult {
    /// Current objects in ascending key order.
    pub objects: Vec<Object>,
    /// Collapsed prefixes in ascending order, when a delimiter was given.
    pub common_prefixes: Vec<String>,
    /// Whether more keys exist past this page.
    pub is_truncated: bool,
    /// Marker to resume from, set iff truncated.
    pub next_marker: Option<String>,
}

/// One entry of a version listing.
#[derive(Debug, Clone)]
pub struct ObjectVersionEntry {
    /// The version row (object or delete marker).
    pub object: Object,
    /// Whether this is the newest version of its key.
    pub is_latest: bool,
}

/// Result of a list-object-versions call.
#[derive(Debug, Clone, Default)]
pub struct ListVersionsResult {
    /// Versions in ascending key order, newest first per key.
    pub versions: Vec<ObjectVersionEntry>,
    /// Collapsed prefixes in ascending order.
    pub common_prefixes: Vec<String>,
    /// Whether more entries exist past this page.
    pub is_truncated: bool,
    /// Key marker to resume from, set iff truncated.
    pub next_key_marker: Option<String>,
    /// Version marker to resume from, set iff truncated.
    pub next_version_id_marker: Option<String>,
}

/// Result of a list-multipart-uploads call.
#[derive(Debug, Clone, Default)]
pub struct ListUploadsResult {
    /// In-progress uploads in (key, initiation time) order.
    pub uploads: Vec<Multipart>,
    /// Collapsed prefixes in ascending order.
    pub common_prefixes: Vec<String>,
    /// Whether more uploads exist past this page.
    pub is_truncated: bool,
    /// Key marker to resume from, set iff truncated.
    pub next_key_marker: Option<String>,
    /// Upload-id marker to resume from, set iff truncated.
    pub next_upload_id_marker: Option<String>,
}

/// Result of a list-parts call.
#[derive(Debug, Clone, Default)]
pub struct ListPartsResult {
    /// Parts in ascending part-number order.
    pub parts: Vec<Part>,
    /// Whether more parts exist past this page.
    pub is_truncated: bool,
    /// Part-number marker to resume from, set iff truncated.
    pub next_part_number_marker: Option<u32>,
    /// Initiator recorded at upload creation.
    pub initiator_id: String,
    /// Owner recorded at upload creation.
    pub owner_id: String,
}
