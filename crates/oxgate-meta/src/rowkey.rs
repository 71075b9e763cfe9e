//! Compound binary row keys and opaque timestamp ids.
//!
//! Object rows sort newest-version-first under a per-key prefix:
//!
//! ```text
//! bucket_name
//! || big-endian u16( count('/', key) )
//! || key
//! || ':'                                  (object table only)
//! || big-endian u64( u64::MAX - last_modified_unix_nano )
//! ```
//!
//! Multipart rows use the same prefix but append the initiation timestamp
//! directly (oldest first), and the null-version map omits the timestamp
//! entirely. Keys are built as explicit byte buffers; string concatenation
//! would mangle the binary length and timestamp fields.
//!
//! Version ids and upload ids are the same nanosecond timestamps in an
//! opaque reversible encoding so clients cannot trivially forge or enumerate
//! them. The encoding is not a security boundary.

use crate::error::MetaError;

/// Sentinel byte between the object name and the inverted timestamp.
pub const OBJECT_NAME_ENDING: u8 = b':';

/// Mask key for the opaque id encoding.
const ID_MASK_KEY: &[u8; 8] = b"carapace";

// ---------------------------------------------------------------------------
// Object table keys
// ---------------------------------------------------------------------------

/// Number of `/` separators in an object key, as stored in the row key.
#[must_use]
pub fn delimiter_count(name: &str) -> u16 {
    name.bytes().filter(|b| *b == b'/').count() as u16
}

/// Row-key prefix shared by every version of `(bucket, name)`, including the
/// trailing sentinel. Append the inverted timestamp to address one version.
#[must_use]
pub fn object_rowkey_prefix(bucket: &str, name: &str) -> Vec<u8> {
    let mut row = Vec::with_capacity(bucket.len() + 2 + name.len() + 1);
    row.extend_from_slice(bucket.as_bytes());
    row.extend_from_slice(&delimiter_count(name).to_be_bytes());
    row.extend_from_slice(name.as_bytes());
    row.push(OBJECT_NAME_ENDING);
    row
}

/// Full row key for the version written at `ts_nanos`.
#[must_use]
pub fn object_rowkey(bucket: &str, name: &str, ts_nanos: u64) -> Vec<u8> {
    let mut row = object_rowkey_prefix(bucket, name);
    row.extend_from_slice(&(u64::MAX - ts_nanos).to_be_bytes());
    row
}

/// Row key (or prefix when `version` is empty) for a versioned lookup.
/// A non-empty `version` is the opaque id produced by [`encode_timestamp`].
pub fn object_rowkey_for_version(
    bucket: &str,
    name: &str,
    version: &str,
) -> Result<Vec<u8>, MetaError> {
    if version.is_empty() {
        return Ok(object_rowkey_prefix(bucket, name));
    }
    let ts_nanos = decode_timestamp(version)?;
    Ok(object_rowkey(bucket, name, ts_nanos))
}

/// Recover the object name from a full object row key.
pub fn object_name_from_rowkey(rowkey: &[u8], bucket: &str) -> Result<String, MetaError> {
    let name_start = bucket.len() + 2;
    // Name ends before the sentinel and the 8 timestamp bytes.
    let name_end = rowkey.len().checked_sub(9).ok_or(MetaError::CorruptRow {
        table: "objects",
        reason: "row key shorter than its fixed fields".to_owned(),
    })?;
    if name_start > name_end {
        return Err(MetaError::CorruptRow {
            table: "objects",
            reason: "bucket name longer than row key".to_owned(),
        });
    }
    String::from_utf8(rowkey[name_start..name_end].to_vec()).map_err(|_| MetaError::CorruptRow {
        table: "objects",
        reason: "object name is not valid utf-8".to_owned(),
    })
}

/// Recover the last-modified nanosecond timestamp from a full object row key.
pub fn object_ts_from_rowkey(rowkey: &[u8]) -> Result<u64, MetaError> {
    let tail: [u8; 8] = rowkey[rowkey.len().saturating_sub(8)..]
        .try_into()
        .map_err(|_| MetaError::CorruptRow {
            table: "objects",
            reason: "row key missing timestamp suffix".to_owned(),
        })?;
    Ok(u64::MAX - u64::from_be_bytes(tail))
}

// ---------------------------------------------------------------------------
// Null-version map and multipart keys
// ---------------------------------------------------------------------------

/// Row key of the null-version pointer for `(bucket, name)`.
#[must_use]
pub fn objmap_rowkey(bucket: &str, name: &str) -> Vec<u8> {
    let mut row = Vec::with_capacity(bucket.len() + 2 + name.len());
    row.extend_from_slice(bucket.as_bytes());
    row.extend_from_slice(&delimiter_count(name).to_be_bytes());
    row.extend_from_slice(name.as_bytes());
    row
}

/// Row key of the multipart upload initiated at `ts_nanos`.
#[must_use]
pub fn multipart_rowkey(bucket: &str, name: &str, ts_nanos: u64) -> Vec<u8> {
    let mut row = objmap_rowkey(bucket, name);
    row.extend_from_slice(&ts_nanos.to_be_bytes());
    row
}

/// Row key for an upload addressed by its opaque upload id.
pub fn multipart_rowkey_for_upload_id(
    bucket: &str,
    name: &str,
    upload_id: &str,
) -> Result<Vec<u8>, MetaError> {
    let ts_nanos = decode_timestamp(upload_id)?;
    Ok(multipart_rowkey(bucket, name, ts_nanos))
}

/// Recover the object name from a multipart row key.
pub fn multipart_name_from_rowkey(rowkey: &[u8], bucket: &str) -> Result<String, MetaError> {
    let name_start = bucket.len() + 2;
    let name_end = rowkey.len().checked_sub(8).ok_or(MetaError::CorruptRow {
        table: "multiparts",
        reason: "row key shorter than its fixed fields".to_owned(),
    })?;
    if name_start > name_end {
        return Err(MetaError::CorruptRow {
            table: "multiparts",
            reason: "bucket name longer than row key".to_owned(),
        });
    }
    String::from_utf8(rowkey[name_start..name_end].to_vec()).map_err(|_| MetaError::CorruptRow {
        table: "multiparts",
        reason: "object name is not valid utf-8".to_owned(),
    })
}

/// Recover the initiation timestamp from a multipart row key.
pub fn multipart_ts_from_rowkey(rowkey: &[u8]) -> Result<u64, MetaError> {
    let tail: [u8; 8] = rowkey[rowkey.len().saturating_sub(8)..]
        .try_into()
        .map_err(|_| MetaError::CorruptRow {
            table: "multiparts",
            reason: "row key missing timestamp suffix".to_owned(),
        })?;
    Ok(u64::from_be_bytes(tail))
}

// ---------------------------------------------------------------------------
// Opaque timestamp ids (version ids, upload ids)
// ---------------------------------------------------------------------------

/// Encode a nanosecond timestamp into an opaque hex id.
///
/// The decimal digits are masked with a fixed byte stream and hex encoded.
/// Deterministic and reversible; [`decode_timestamp`] is the inverse.
#[must_use]
pub fn encode_timestamp(ts_nanos: u64) -> String {
    let digits = ts_nanos.to_string().into_bytes();
    let masked: Vec<u8> = digits
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ ID_MASK_KEY[i % ID_MASK_KEY.len()])
        .collect();
    hex::encode(masked)
}

/// Decode an opaque id back into the nanosecond timestamp it was built from.
pub fn decode_timestamp(id: &str) -> Result<u64, MetaError> {
    let invalid = || MetaError::InvalidVersionId {
        value: id.to_owned(),
    };
    let masked = hex::decode(id).map_err(|_| invalid())?;
    let digits: Vec<u8> = masked
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ ID_MASK_KEY[i % ID_MASK_KEY.len()])
        .collect();
    let text = String::from_utf8(digits).map_err(|_| invalid())?;
    text.parse::<u64>().map_err(|_| invalid())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
