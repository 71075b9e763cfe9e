//! Garbage-collection rows: orphan blobs awaiting reclamation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MetaError;
use crate::kv::Cells;
use crate::model::multipart::Part;
use crate::model::object::Object;

/// Column family holding orphan attributes.
pub const GC_COLUMN_FAMILY: &str = "gc";
/// Column family holding orphan part cells.
pub const GC_PART_COLUMN_FAMILY: &str = "p";

/// One orphan record. Created whenever a blob becomes unreachable
/// (overwrite without versioning, delete, failed commit, aborted upload)
/// and deleted by the collector once the blob is gone from the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcRecord {
    /// Bucket the blob belonged to; informational.
    pub bucket_name: String,
    /// Key the blob belonged to; informational.
    pub object_name: String,
    /// Cluster holding the blob.
    pub location: String,
    /// Pool holding the blob.
    pub pool: String,
    /// Blob id; empty when `parts` carries the blobs instead.
    pub object_id: String,
    /// When the record was created. Makes the row key unique per orphan.
    pub created: DateTime<Utc>,
    /// How many reclamation attempts have failed so far.
    pub tries: u32,
    /// Part blobs of a multipart orphan, keyed by part number.
    pub parts: BTreeMap<u32, Part>,
}

impl GcRecord {
    /// Record for a single orphan blob.
    #[must_use]
    pub fn single(
        bucket_name: &str,
        object_name: &str,
        location: &str,
        pool: &str,
        object_id: &str,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            bucket_name: bucket_name.to_owned(),
            object_name: object_name.to_owned(),
            location: location.to_owned(),
            pool: pool.to_owned(),
            object_id: object_id.to_owned(),
            created,
            tries: 0,
            parts: BTreeMap::new(),
        }
    }

    /// Record covering everything an object row references: its own blob
    /// for single-part objects, or every part blob for multipart ones.
    #[must_use]
    pub fn from_object(object: &Object, created: DateTime<Utc>) -> Self {
        Self {
            bucket_name: object.bucket_name.clone(),
            object_name: object.name.clone(),
            location: object.location.clone(),
            pool: object.pool.clone(),
            object_id: object.object_id.clone(),
            created,
            tries: 0,
            parts: object.parts.clone(),
        }
    }

    /// Nanosecond creation timestamp.
    #[must_use]
    pub fn created_nanos(&self) -> u64 {
        self.created.timestamp_nanos_opt().unwrap_or(0) as u64
    }

    /// Row key: `bucket:key:created_unix_nano`, unique per orphan.
    #[must_use]
    pub fn rowkey(&self) -> Vec<u8> {
        format!(
            "{}:{}:{}",
            self.bucket_name,
            self.object_name,
            self.created_nanos()
        )
        .into_bytes()
    }

    /// Encode this record into its stored cells.
    pub fn to_cells(&self) -> Result<Cells, MetaError> {
        let mut qualifiers = BTreeMap::new();
        qualifiers.insert("bucket".to_owned(), self.bucket_name.clone().into_bytes());
        qualifiers.insert("object".to_owned(), self.object_name.clone().into_bytes());
        qualifiers.insert("location".to_owned(), self.location.clone().into_bytes());
        qualifiers.insert("pool".to_owned(), self.pool.clone().into_bytes());
        qualifiers.insert("oid".to_owned(), self.object_id.clone().into_bytes());
        qualifiers.insert(
            "created".to_owned(),
            self.created_nanos().to_string().into_bytes(),
        );
        qualifiers.insert("tries".to_owned(), self.tries.to_be_bytes().to_vec());

        let mut cells = Cells::new();
        cells.insert(GC_COLUMN_FAMILY.to_owned(), qualifiers);

        if !self.parts.is_empty() {
            let mut part_cells = BTreeMap::new();
            for part in self.parts.values() {
                let (qualifier, value) = part.to_cell()?;
                part_cells.insert(qualifier, value);
            }
            cells.insert(GC_PART_COLUMN_FAMILY.to_owned(), part_cells);
        }
        Ok(cells)
    }

    /// Decode a record from its cells.
    pub fn from_cells(cells: &Cells) -> Result<Self, MetaError> {
        let corrupt = |reason: String| MetaError::CorruptRow {
            table: "garbageCollection",
            reason,
        };
        let family = cells
            .get(GC_COLUMN_FAMILY)
            .ok_or_else(|| corrupt("missing gc column family".to_owned()))?;

        let text = |qualifier: &str| -> Result<String, MetaError> {
            let value = family.get(qualifier).cloned().unwrap_or_default();
            String::from_utf8(value).map_err(|_| corrupt(format!("non-utf8 cell {qualifier}")))
        };

        let created_nanos: u64 = text("created")?
            .parse()
            .map_err(|_| corrupt("bad created cell".to_owned()))?;
        let tries = match family.get("tries") {
            Some(raw) => u32::from_be_bytes(
                raw.as_slice()
                    .try_into()
                    .map_err(|_| corrupt("bad tries cell".to_owned()))?,
            ),
            None => 0,
        };

        let mut parts = BTreeMap::new();
        if let Some(part_family) = cells.get(GC_PART_COLUMN_FAMILY) {
            for (qualifier, value) in part_family {
                let number: u32 = qualifier
                    .parse()
                    .map_err(|_| corrupt(format!("bad part qualifier {qualifier}")))?;
                let part: Part = serde_json::from_slice(value)?;
                parts.insert(number, part);
            }
        }

        Ok(Self {
            bucket_name: text("bucket")?,
            object_name: text("object")?,
            location: text("location")?,
            pool: text("pool")?,
            object_id: text("oid")?,
            created: DateTime::from_timestamp_nanos(created_nanos as i64),
            tries,
            parts,
        })
    }
}
