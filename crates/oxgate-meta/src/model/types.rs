//! Shared metadata value types: ACLs, versioning state, encryption modes,
//! CORS rules and cluster descriptors.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MetaError;

/// Timestamp layout used in stored cells, e.g. `2024-01-02T15:04:05.000Z`.
pub const CREATE_TIME_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Format a timestamp with the stored-cell layout.
#[must_use]
pub fn format_time(t: DateTime<Utc>) -> String {
    t.format(CREATE_TIME_LAYOUT).to_string()
}

/// Parse a stored-cell timestamp.
pub fn parse_time(table: &'static str, value: &str) -> Result<DateTime<Utc>, MetaError> {
    NaiveDateTime::parse_from_str(value, CREATE_TIME_LAYOUT)
        .map(|naive| naive.and_utc())
        .map_err(|_| MetaError::CorruptRow {
            table,
            reason: format!("bad timestamp cell: {value}"),
        })
}

// ---------------------------------------------------------------------------
// CannedAcl
// ---------------------------------------------------------------------------

/// Resolved canned ACL of a bucket or object. XML grant parsing happens
/// upstream; only the resolved value is stored and evaluated here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CannedAcl {
    /// Owner only (default).
    #[default]
    Private,
    /// World-readable.
    PublicRead,
    /// World-readable and writable.
    PublicReadWrite,
    /// Readable by any authenticated caller.
    AuthenticatedRead,
    /// Object owner full control, bucket owner read.
    BucketOwnerRead,
    /// Object and bucket owner full control.
    BucketOwnerFullControl,
}

impl CannedAcl {
    /// Canonical string form, as stored in cells.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::PublicRead => "public-read",
            Self::PublicReadWrite => "public-read-write",
            Self::AuthenticatedRead => "authenticated-read",
            Self::BucketOwnerRead => "bucket-owner-read",
            Self::BucketOwnerFullControl => "bucket-owner-full-control",
        }
    }
}

impl fmt::Display for CannedAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`CannedAcl`] fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown canned ACL: {0}")]
pub struct ParseCannedAclError(String);

impl FromStr for CannedAcl {
    type Err = ParseCannedAclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            // An empty cell means the bucket predates ACL writes.
            "" | "private" => Ok(Self::Private),
            "public-read" => Ok(Self::PublicRead),
            "public-read-write" => Ok(Self::PublicReadWrite),
            "authenticated-read" => Ok(Self::AuthenticatedRead),
            "bucket-owner-read" => Ok(Self::BucketOwnerRead),
            "bucket-owner-full-control" => Ok(Self::BucketOwnerFullControl),
            _ => Err(ParseCannedAclError(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// VersioningStatus
// ---------------------------------------------------------------------------

/// Per-bucket versioning state machine. `Disabled` is the initial state;
/// once `Enabled` a bucket can only move between `Enabled` and `Suspended`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersioningStatus {
    /// Versioning has never been enabled.
    #[default]
    Disabled,
    /// Every write creates a new version.
    Enabled,
    /// Writes overwrite the null version; history is kept.
    Suspended,
}

impl VersioningStatus {
    /// Canonical string form, as stored in cells.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "Disabled",
            Self::Enabled => "Enabled",
            Self::Suspended => "Suspended",
        }
    }
}

impl fmt::Display for VersioningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`VersioningStatus`] fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown versioning status: {0}")]
pub struct ParseVersioningError(String);

impl FromStr for VersioningStatus {
    type Err = ParseVersioningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "Disabled" => Ok(Self::Disabled),
            "Enabled" => Ok(Self::Enabled),
            "Suspended" => Ok(Self::Suspended),
            _ => Err(ParseVersioningError(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// SseType
// ---------------------------------------------------------------------------

/// Server-side encryption mode of an object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SseType {
    /// Stored in the clear.
    #[default]
    None,
    /// Encrypted with a gateway-managed key, sealed under the master key.
    S3,
    /// Encrypted with a customer-provided key that is never persisted.
    Customer,
}

impl SseType {
    /// Canonical string form, as stored in cells. The empty string means
    /// unencrypted.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::S3 => "S3",
            Self::Customer => "C",
        }
    }

    /// Whether object bytes are encrypted at rest.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Error returned when parsing an [`SseType`] fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown SSE type: {0}")]
pub struct ParseSseTypeError(String);

impl FromStr for SseType {
    type Err = ParseSseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Self::None),
            "S3" => Ok(Self::S3),
            "C" => Ok(Self::Customer),
            _ => Err(ParseSseTypeError(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// CorsRule
// ---------------------------------------------------------------------------

/// One resolved CORS rule of a bucket. The XML form is parsed upstream;
/// rules are stored as JSON in the bucket row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsRule {
    /// Origins the rule applies to.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// HTTP methods the rule allows.
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    /// Request headers the rule allows.
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    /// Response headers exposed to the browser.
    #[serde(default)]
    pub expose_headers: Vec<String>,
    /// Preflight cache lifetime in seconds.
    #[serde(default)]
    pub max_age_seconds: u64,
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

/// One blob backend cluster as recorded in the cluster table. Placement
/// draws clusters proportionally to `weight`; weight 0 drains a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Cluster identity.
    pub fsid: String,
    /// Relative placement weight.
    pub weight: u32,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
