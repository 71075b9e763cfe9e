//! Multipart upload rows and part cells.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MetaError;
use crate::kv::Cells;
use crate::model::types::{CannedAcl, SseType};
use crate::rowkey;

/// Column family holding upload metadata and part cells.
pub const MULTIPART_COLUMN_FAMILY: &str = "m";

/// Qualifier of the upload metadata cell. Part numbers start at 1, so the
/// qualifier `"0"` can never collide with a part.
pub const UPLOAD_META_QUALIFIER: &str = "0";

// ---------------------------------------------------------------------------
// Part
// ---------------------------------------------------------------------------

/// One uploaded part. Serialized as JSON into its part-number qualifier,
/// both in multipart rows and in completed object rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Part {
    /// Part number, 1 through 10000.
    pub part_number: u32,
    /// Cluster the part blob lives in.
    pub location: String,
    /// Pool the part blob lives in.
    pub pool: String,
    /// Part size in bytes.
    pub size: i64,
    /// Blob id of the part.
    pub object_id: String,
    /// Byte offset within the final object, assigned at completion.
    #[serde(default)]
    pub offset: i64,
    /// Hex MD5 of the part body.
    pub etag: String,
    /// Upload time of the part.
    pub last_modified: DateTime<Utc>,
    /// Stream IV when the part is encrypted; empty otherwise.
    #[serde(rename = "IV", default, skip_serializing_if = "Vec::is_empty")]
    pub initialization_vector: Vec<u8>,
}

impl Part {
    /// Encode this part as the JSON value of its qualifier.
    pub fn to_cell(&self) -> Result<(String, Vec<u8>), MetaError> {
        Ok((self.part_number.to_string(), serde_json::to_vec(self)?))
    }
}

// ---------------------------------------------------------------------------
// UploadMeta
// ---------------------------------------------------------------------------

/// Upload-level metadata, stored as JSON in the `"0"` qualifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMeta {
    /// User that initiated the upload.
    pub initiator_id: String,
    /// User that will own the completed object.
    pub owner_id: String,
    /// ACL the completed object is created with.
    pub acl: CannedAcl,
    /// Content type of the completed object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Encryption mode of the upload.
    #[serde(default)]
    pub sse_type: SseType,
    /// Sealed per-object key for gateway-managed encryption; empty for
    /// customer-key or unencrypted uploads.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encryption_key: Vec<u8>,
    /// IV the key above was sealed under; carried onto the completed
    /// object so the key can be opened again.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initialization_vector: Vec<u8>,
    /// Caller-supplied attributes carried onto the completed object.
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub attributes: std::collections::HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Multipart
// ---------------------------------------------------------------------------

/// An in-progress multipart upload. Identified by (bucket, key, upload id),
/// where the upload id is the opaque form of the initiation timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Multipart {
    /// Bucket the upload targets.
    pub bucket_name: String,
    /// Key the upload targets.
    pub object_name: String,
    /// Initiation time; its nanosecond value is the row-key suffix.
    pub initial_time: DateTime<Utc>,
    /// Upload-level metadata.
    pub metadata: UploadMeta,
    /// Parts uploaded so far, keyed by part number.
    pub parts: BTreeMap<u32, Part>,
}

impl Multipart {
    /// Start a new upload at `initial_time`.
    #[must_use]
    pub fn new(
        bucket_name: &str,
        object_name: &str,
        initial_time: DateTime<Utc>,
        metadata: UploadMeta,
    ) -> Self {
        Self {
            bucket_name: bucket_name.to_owned(),
            object_name: object_name.to_owned(),
            initial_time,
            metadata,
            parts: BTreeMap::new(),
        }
    }

    /// Nanosecond initiation timestamp.
    #[must_use]
    pub fn ts_nanos(&self) -> u64 {
        self.initial_time.timestamp_nanos_opt().unwrap_or(0) as u64
    }

    /// Row key of this upload.
    #[must_use]
    pub fn rowkey(&self) -> Vec<u8> {
        rowkey::multipart_rowkey(&self.bucket_name, &self.object_name, self.ts_nanos())
    }

    /// Opaque upload id handed to clients.
    #[must_use]
    pub fn upload_id(&self) -> String {
        rowkey::encode_timestamp(self.ts_nanos())
    }

    /// Encode the metadata cell and every part cell.
    pub fn to_cells(&self) -> Result<Cells, MetaError> {
        let mut qualifiers = BTreeMap::new();
        qualifiers.insert(
            UPLOAD_META_QUALIFIER.to_owned(),
            serde_json::to_vec(&self.metadata)?,
        );
        for part in self.parts.values() {
            let (qualifier, value) = part.to_cell()?;
            qualifiers.insert(qualifier, value);
        }
        let mut cells = Cells::new();
        cells.insert(MULTIPART_COLUMN_FAMILY.to_owned(), qualifiers);
        Ok(cells)
    }

    /// Decode an upload from its row key and cells.
    pub fn from_cells(rowkey_bytes: &[u8], bucket: &str, cells: &Cells) -> Result<Self, MetaError> {
        let corrupt = |reason: String| MetaError::CorruptRow {
            table: "multiparts",
            reason,
        };
        let family = cells
            .get(MULTIPART_COLUMN_FAMILY)
            .ok_or_else(|| corrupt("missing multipart column family".to_owned()))?;

        let mut metadata = UploadMeta::default();
        let mut parts = BTreeMap::new();
        for (qualifier, value) in family {
            if qualifier == UPLOAD_META_QUALIFIER {
                metadata = serde_json::from_slice(value)?;
            } else {
                let number: u32 = qualifier
                    .parse()
                    .map_err(|_| corrupt(format!("bad part qualifier {qualifier}")))?;
                let part: Part = serde_json::from_slice(value)?;
                parts.insert(number, part);
            }
        }

        let object_name = rowkey::multipart_name_from_rowkey(rowkey_bytes, bucket)?;
        let ts_nanos = rowkey::multipart_ts_from_rowkey(rowkey_bytes)?;

        Ok(Self {
            bucket_name: bucket.to_owned(),
            object_name,
            initial_time: DateTime::from_timestamp_nanos(ts_nanos as i64),
            metadata,
            parts,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
