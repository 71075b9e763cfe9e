//! Object version rows and the null-version pointer.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MetaError;
use crate::kv::Cells;
use crate::model::multipart::Part;
use crate::model::types::{format_time, CannedAcl, SseType};
use crate::rowkey;

/// Column family holding object attributes.
pub const OBJECT_COLUMN_FAMILY: &str = "o";
/// Column family holding the parts of a completed multipart object.
pub const OBJECT_PART_COLUMN_FAMILY: &str = "p";
/// Column family of the null-version pointer table.
pub const OBJMAP_COLUMN_FAMILY: &str = "v";

/// Client-facing version id of the null version.
pub const NULL_VERSION_ID: &str = "null";

// ---------------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------------

/// One version of a key: either real data or a delete marker.
///
/// The row key encodes bucket, key and the inverted last-modified timestamp,
/// so scans under the `(bucket, key)` prefix see the newest version first.
/// Delete markers carry no blob (`object_id` is empty).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Object {
    /// Object key.
    pub name: String,
    /// Bucket the object belongs to.
    pub bucket_name: String,
    /// Cluster the blob lives in; empty for delete markers and multipart
    /// objects (whose parts carry their own locations).
    pub location: String,
    /// Pool the blob lives in.
    pub pool: String,
    /// Owning user id.
    pub owner_id: String,
    /// Object size in bytes.
    pub size: i64,
    /// Blob id in the backend; empty for delete markers and multipart
    /// objects.
    pub object_id: String,
    /// Last-modified time at nanosecond precision; drives the row key and
    /// the version id.
    pub last_modified: DateTime<Utc>,
    /// Hex MD5 for single-part objects; `<md5>-<parts>` for multipart.
    pub etag: String,
    /// MIME type.
    pub content_type: String,
    /// Caller-supplied attributes.
    #[serde(default)]
    pub custom_attributes: HashMap<String, String>,
    /// Resolved canned ACL.
    pub acl: CannedAcl,
    /// Whether this row is the key's null version.
    pub null_version: bool,
    /// Whether this row is a delete marker.
    pub delete_marker: bool,
    /// Encryption mode.
    pub sse_type: SseType,
    /// Per-object key sealed under the master key; empty unless the mode is
    /// gateway-managed encryption.
    #[serde(default)]
    pub encryption_key: Vec<u8>,
    /// Stream IV; empty for unencrypted objects.
    #[serde(default)]
    pub initialization_vector: Vec<u8>,
    /// Parts of a completed multipart object, keyed by part number. Empty
    /// for single-part objects.
    #[serde(default)]
    pub parts: BTreeMap<u32, Part>,
}

impl Object {
    /// Nanosecond last-modified timestamp.
    #[must_use]
    pub fn ts_nanos(&self) -> u64 {
        self.last_modified.timestamp_nanos_opt().unwrap_or(0) as u64
    }

    /// Row key of this version.
    #[must_use]
    pub fn rowkey(&self) -> Vec<u8> {
        rowkey::object_rowkey(&self.bucket_name, &self.name, self.ts_nanos())
    }

    /// Client-facing version id: `"null"` for the null version, otherwise
    /// the opaque form of the last-modified timestamp.
    #[must_use]
    pub fn version_id(&self) -> String {
        if self.null_version {
            NULL_VERSION_ID.to_owned()
        } else {
            rowkey::encode_timestamp(self.ts_nanos())
        }
    }

    /// Whether this object was assembled from multipart uploads.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        !self.parts.is_empty()
    }

    /// Encode this object into its stored cells.
    pub fn to_cells(&self) -> Result<Cells, MetaError> {
        let attributes = serde_json::to_vec(&self.custom_attributes)?;
        let mut qualifiers = BTreeMap::new();
        qualifiers.insert("bucket".to_owned(), self.bucket_name.clone().into_bytes());
        qualifiers.insert("location".to_owned(), self.location.clone().into_bytes());
        qualifiers.insert("pool".to_owned(), self.pool.clone().into_bytes());
        qualifiers.insert("owner".to_owned(), self.owner_id.clone().into_bytes());
        qualifiers.insert("oid".to_owned(), self.object_id.clone().into_bytes());
        qualifiers.insert("size".to_owned(), self.size.to_be_bytes().to_vec());
        qualifiers.insert(
            "lastModified".to_owned(),
            format_time(self.last_modified).into_bytes(),
        );
        qualifiers.insert("etag".to_owned(), self.etag.clone().into_bytes());
        qualifiers.insert(
            "content-type".to_owned(),
            self.content_type.clone().into_bytes(),
        );
        qualifiers.insert("attributes".to_owned(), attributes);
        qualifiers.insert("ACL".to_owned(), self.acl.as_str().as_bytes().to_vec());
        qualifiers.insert(
            "nullVersion".to_owned(),
            bool_cell(self.null_version).to_vec(),
        );
        qualifiers.insert(
            "deleteMarker".to_owned(),
            bool_cell(self.delete_marker).to_vec(),
        );
        qualifiers.insert(
            "sseType".to_owned(),
            self.sse_type.as_str().as_bytes().to_vec(),
        );
        qualifiers.insert("encryptionKey".to_owned(), self.encryption_key.clone());
        qualifiers.insert("IV".to_owned(), self.initialization_vector.clone());

        let mut cells = Cells::new();
        cells.insert(OBJECT_COLUMN_FAMILY.to_owned(), qualifiers);

        if !self.parts.is_empty() {
            let mut part_cells = BTreeMap::new();
            for part in self.parts.values() {
                let (qualifier, value) = part.to_cell()?;
                part_cells.insert(qualifier, value);
            }
            cells.insert(OBJECT_PART_COLUMN_FAMILY.to_owned(), part_cells);
        }
        Ok(cells)
    }

    /// Decode an object from its row key and cells. The row key is
    /// authoritative for the key name and the nanosecond timestamp; the
    /// formatted `lastModified` cell only carries millisecond precision.
    pub fn from_cells(rowkey_bytes: &[u8], cells: &Cells) -> Result<Self, MetaError> {
        let corrupt = |reason: String| MetaError::CorruptRow {
            table: "objects",
            reason,
        };
        let family = cells
            .get(OBJECT_COLUMN_FAMILY)
            .ok_or_else(|| corrupt("missing object column family".to_owned()))?;

        let text = |qualifier: &str| -> Result<String, MetaError> {
            let value = family.get(qualifier).cloned().unwrap_or_default();
            String::from_utf8(value).map_err(|_| corrupt(format!("non-utf8 cell {qualifier}")))
        };

        let bucket_name = text("bucket")?;
        let name = rowkey::object_name_from_rowkey(rowkey_bytes, &bucket_name)?;
        let ts_nanos = rowkey::object_ts_from_rowkey(rowkey_bytes)?;

        let size = match family.get("size") {
            Some(raw) => i64::from_be_bytes(
                raw.as_slice()
                    .try_into()
                    .map_err(|_| corrupt("bad size cell".to_owned()))?,
            ),
            None => 0,
        };
        let acl: CannedAcl = text("ACL")?
            .parse()
            .map_err(|_| corrupt("bad ACL cell".to_owned()))?;
        let sse_type: SseType = text("sseType")?
            .parse()
            .map_err(|_| corrupt("bad sseType cell".to_owned()))?;
        let custom_attributes = match family.get("attributes") {
            Some(raw) if !raw.is_empty() => serde_json::from_slice(raw)?,
            _ => HashMap::new(),
        };

        let mut parts = BTreeMap::new();
        if let Some(part_family) = cells.get(OBJECT_PART_COLUMN_FAMILY) {
            for (qualifier, value) in part_family {
                let number: u32 = qualifier
                    .parse()
                    .map_err(|_| corrupt(format!("bad part qualifier {qualifier}")))?;
                let part: Part = serde_json::from_slice(value)?;
                parts.insert(number, part);
            }
        }

        Ok(Self {
            name,
            bucket_name,
            location: text("location")?,
            pool: text("pool")?,
            owner_id: text("owner")?,
            size,
            object_id: text("oid")?,
            last_modified: DateTime::from_timestamp_nanos(ts_nanos as i64),
            etag: text("etag")?,
            content_type: text("content-type")?,
            custom_attributes,
            acl,
            null_version: family.get("nullVersion").map(Vec::as_slice) == Some(b"true"),
            delete_marker: family.get("deleteMarker").map(Vec::as_slice) == Some(b"true"),
            sse_type,
            encryption_key: family.get("encryptionKey").cloned().unwrap_or_default(),
            initialization_vector: family.get("IV").cloned().unwrap_or_default(),
            parts,
        })
    }
}

fn bool_cell(value: bool) -> &'static [u8] {
    if value {
        b"true"
    } else {
        b"false"
    }
}

// ---------------------------------------------------------------------------
// ObjMap
// ---------------------------------------------------------------------------

/// Pointer from `(bucket, key)` to the timestamp of its current null
/// version. Exists iff a null version exists, and turns `versionId=null`
/// lookups into a single-row get.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjMap {
    /// Bucket of the pointed-at object.
    pub bucket_name: String,
    /// Key of the pointed-at object.
    pub name: String,
    /// Nanosecond timestamp of the null version.
    pub null_ver_num: u64,
}

impl ObjMap {
    /// Build a pointer at `null_ver_num`.
    #[must_use]
    pub fn new(bucket_name: &str, name: &str, null_ver_num: u64) -> Self {
        Self {
            bucket_name: bucket_name.to_owned(),
            name: name.to_owned(),
            null_ver_num,
        }
    }

    /// Row key of this pointer.
    #[must_use]
    pub fn rowkey(&self) -> Vec<u8> {
        rowkey::objmap_rowkey(&self.bucket_name, &self.name)
    }

    /// Opaque version id of the pointed-at null version, used to address its
    /// object row.
    #[must_use]
    pub fn null_version_id(&self) -> String {
        rowkey::encode_timestamp(self.null_ver_num)
    }

    /// Encode this pointer into its stored cells.
    #[must_use]
    pub fn to_cells(&self) -> Cells {
        let mut qualifiers = BTreeMap::new();
        qualifiers.insert(
            "nullVerNum".to_owned(),
            self.null_ver_num.to_be_bytes().to_vec(),
        );
        let mut cells = Cells::new();
        cells.insert(OBJMAP_COLUMN_FAMILY.to_owned(), qualifiers);
        cells
    }

    /// Decode a pointer from its cells.
    pub fn from_cells(bucket: &str, name: &str, cells: &Cells) -> Result<Self, MetaError> {
        let corrupt = |reason: String| MetaError::CorruptRow {
            table: "objmap",
            reason,
        };
        let raw = cells
            .get(OBJMAP_COLUMN_FAMILY)
            .and_then(|family| family.get("nullVerNum"))
            .ok_or_else(|| corrupt("missing nullVerNum cell".to_owned()))?;
        let null_ver_num = u64::from_be_bytes(
            raw.as_slice()
                .try_into()
                .map_err(|_| corrupt("bad nullVerNum cell".to_owned()))?,
        );
        Ok(Self::new(bucket, name, null_ver_num))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
