//! Bucket rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MetaError;
use crate::kv::Cells;
use crate::model::types::{format_time, parse_time, CannedAcl, CorsRule, VersioningStatus};

/// Column family holding bucket attributes.
pub const BUCKET_COLUMN_FAMILY: &str = "b";

/// One bucket. The row key is the globally unique bucket name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    /// Bucket name.
    pub name: String,
    /// Creation time, stored with millisecond precision.
    pub create_time: DateTime<Utc>,
    /// Owning user id.
    pub owner_id: String,
    /// Resolved CORS rules.
    pub cors: Vec<CorsRule>,
    /// Resolved canned ACL.
    pub acl: CannedAcl,
    /// Versioning state.
    pub versioning: VersioningStatus,
    /// Stored bytes, updated incrementally on writes and removals.
    pub usage: i64,
}

impl Bucket {
    /// Create a bucket owned by `owner_id` with default attributes.
    #[must_use]
    pub fn new(name: &str, owner_id: &str, acl: CannedAcl, create_time: DateTime<Utc>) -> Self {
        Self {
            name: name.to_owned(),
            create_time,
            owner_id: owner_id.to_owned(),
            cors: Vec::new(),
            acl,
            versioning: VersioningStatus::Disabled,
            usage: 0,
        }
    }

    /// Encode this bucket into its stored cells.
    pub fn to_cells(&self) -> Result<Cells, MetaError> {
        let cors = serde_json::to_vec(&self.cors)?;
        let mut qualifiers = std::collections::BTreeMap::new();
        qualifiers.insert("UID".to_owned(), self.owner_id.clone().into_bytes());
        qualifiers.insert("ACL".to_owned(), self.acl.as_str().as_bytes().to_vec());
        qualifiers.insert("CORS".to_owned(), cors);
        qualifiers.insert(
            "createTime".to_owned(),
            format_time(self.create_time).into_bytes(),
        );
        qualifiers.insert(
            "versioning".to_owned(),
            self.versioning.as_str().as_bytes().to_vec(),
        );
        qualifiers.insert("usage".to_owned(), self.usage.to_be_bytes().to_vec());

        let mut cells = Cells::new();
        cells.insert(BUCKET_COLUMN_FAMILY.to_owned(), qualifiers);
        Ok(cells)
    }

    /// Decode a bucket from its stored cells.
    pub fn from_cells(name: &str, cells: &Cells) -> Result<Self, MetaError> {
        let corrupt = |reason: String| MetaError::CorruptRow {
            table: "buckets",
            reason,
        };
        let family = cells
            .get(BUCKET_COLUMN_FAMILY)
            .ok_or_else(|| corrupt("missing bucket column family".to_owned()))?;

        let text = |qualifier: &str| -> Result<String, MetaError> {
            let value = family.get(qualifier).cloned().unwrap_or_default();
            String::from_utf8(value).map_err(|_| corrupt(format!("non-utf8 cell {qualifier}")))
        };

        let create_time = parse_time("buckets", &text("createTime")?)?;
        let acl: CannedAcl = text("ACL")?
            .parse()
            .map_err(|_| corrupt("bad ACL cell".to_owned()))?;
        let versioning: VersioningStatus = text("versioning")?
            .parse()
            .map_err(|_| corrupt("bad versioning cell".to_owned()))?;
        let cors = match family.get("CORS") {
            Some(raw) if !raw.is_empty() => serde_json::from_slice(raw)?,
            _ => Vec::new(),
        };
        let usage = match family.get("usage") {
            Some(raw) => i64::from_be_bytes(
                raw.as_slice()
                    .try_into()
                    .map_err(|_| corrupt("bad usage cell".to_owned()))?,
            ),
            None => 0,
        };

        Ok(Self {
            name: name.to_owned(),
            create_time,
            owner_id: text("UID")?,
            cors,
            acl,
            versioning,
            usage,
        })
    }
}
