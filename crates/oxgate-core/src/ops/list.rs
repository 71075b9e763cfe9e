//! Listing: objects (v1 and v2), object versions and in-progress multipart
//! uploads.
//!
//! Scans are bounded to the bucket's row-key range. Because every version
//! of a key lives under the same prefix with the newest first, the first
//! row seen per key is its current version; older rows of the same key are
//! skipped until enough current versions are collected. Results are
//! re-sorted into ascending key order before pagination, as the row-key
//! layout groups keys by their delimiter depth first.

use std::collections::BTreeMap;

use oxgate_meta::{CannedAcl, Multipart, Object};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::Gateway;
use crate::types::{
    Credential, ListObjectsResult, ListUploadsResult, ListVersionsResult, ObjectVersionEntry,
};

/// Batch size of the underlying metadata scans.
const LIST_SCAN_BATCH: usize = 1000;

/// An entry of a merged listing: a current object or a collapsed prefix.
enum ListEntry {
    Object(Box<Object>),
    Prefix,
}

impl Gateway {
    // -----------------------------------------------------------------------
    // Objects, v1
    // -----------------------------------------------------------------------

    /// List current objects (marker-based pagination).
    pub async fn list_objects(
        &self,
        bucket_name: &str,
        prefix: &str,
        delimiter: &str,
        marker: &str,
        max_keys: usize,
        credential: &Credential,
    ) -> GatewayResult<ListObjectsResult> {
        validate_listing_args(prefix, delimiter, marker)?;
        self.readable_bucket(bucket_name, credential).await?;

        let mut merged: BTreeMap<String, ListEntry> = BTreeMap::new();
        let mut current_key: Option<String> = None;
        let mut resume: Option<Vec<u8>> = None;

        loop {
            let batch = self
                .meta
                .scan_bucket_objects(bucket_name, resume.as_deref(), LIST_SCAN_BATCH)
                .await?;
            let done = batch.len() < LIST_SCAN_BATCH;
            for object in &batch {
                resume = Some(object.rowkey());

                // First row per key is the newest version; the rest are
                // history.
                if current_key.as_deref() == Some(object.name.as_str()) {
                    continue;
                }
                current_key = Some(object.name.clone());

                // A delete marker on top hides the key.
                if object.delete_marker {
                    continue;
                }
                if !object.name.starts_with(prefix) {
                    continue;
                }
                match entry_name(&object.name, prefix, delimiter) {
                    Some(group) => {
                        if group.as_str() > marker {
                            merged.entry(group).or_insert(ListEntry::Prefix);
                        }
                    }
                    None => {
                        if object.name.as_str() > marker {
                            merged.insert(
                                object.name.clone(),
                                ListEntry::Object(Box::new(object.clone())),
                            );
                        }
                    }
                }
            }
            if done {
                break;
            }
        }

        let mut result = ListObjectsResult::default();
        if max_keys == 0 {
            return Ok(result);
        }
        let mut taken = 0usize;
        let mut last_name = None;
        for (name, entry) in merged {
            if taken == max_keys {
                result.is_truncated = true;
                result.next_marker = last_name;
                return Ok(result);
            }
            match entry {
                ListEntry::Object(object) => result.objects.push(*object),
                ListEntry::Prefix => result.common_prefixes.push(name.clone()),
            }
            last_name = Some(name);
            taken += 1;
        }
        Ok(result)
    }

    /// List current objects (continuation-token pagination). The token is
    /// the last name of the previous page; `start_after` applies to the
    /// first page only.
    #[allow(clippy::too_many_arguments)]
    pub async fn list_objects_v2(
        &self,
        bucket_name: &str,
        prefix: &str,
        delimiter: &str,
        continuation_token: &str,
        start_after: &str,
        max_keys: usize,
        credential: &Credential,
    ) -> GatewayResult<ListObjectsResult> {
        let marker = if continuation_token.is_empty() {
            start_after
        } else {
            continuation_token
        };
        self.list_objects(bucket_name, prefix, delimiter, marker, max_keys, credential)
            .await
    }

    // -----------------------------------------------------------------------
    // Object versions
    // -----------------------------------------------------------------------

    /// List every version of every key, delete markers included, ascending
    /// by key and newest-first within a key.
    #[allow(clippy::too_many_arguments)]
    pub async fn list_object_versions(
        &self,
        bucket_name: &str,
        prefix: &str,
        delimiter: &str,
        key_marker: &str,
        version_id_marker: &str,
        max_keys: usize,
        credential: &Credential,
    ) -> GatewayResult<ListVersionsResult> {
        validate_listing_args(prefix, delimiter, key_marker)?;
        self.readable_bucket(bucket_name, credential).await?;

        // Collect versions grouped per key; scan order within one key is
        // already newest-first.
        let mut per_key: BTreeMap<String, Vec<Object>> = BTreeMap::new();
        let mut groups: std::collections::BTreeSet<String> = Default::default();
        let mut resume: Option<Vec<u8>> = None;
        loop {
            let batch = self
                .meta
                .scan_bucket_objects(bucket_name, resume.as_deref(), LIST_SCAN_BATCH)
                .await?;
            let done = batch.len() < LIST_SCAN_BATCH;
            for object in batch {
                resume = Some(object.rowkey());
                if !object.name.starts_with(prefix) {
                    continue;
                }
                match entry_name(&object.name, prefix, delimiter) {
                    Some(group) => {
                        if group.as_str() > key_marker {
                            groups.insert(group);
                        }
                    }
                    None => per_key.entry(object.name.clone()).or_default().push(object),
                }
            }
            if done {
                break;
            }
        }

        let mut result = ListVersionsResult {
            common_prefixes: groups.into_iter().collect(),
            ..ListVersionsResult::default()
        };
        if max_keys == 0 {
            return Ok(result);
        }

        'keys: for (key, versions) in per_key {
            if key.as_str() < key_marker {
                continue;
            }
            let mut skipping = key == key_marker;
            if skipping && version_id_marker.is_empty() {
                // Marker key fully emitted on a previous page.
                continue;
            }
            for (index, object) in versions.into_iter().enumerate() {
                if skipping {
                    if object.version_id() == version_id_marker {
                        skipping = false;
                    }
                    continue;
                }
                if result.versions.len() == max_keys {
                    result.is_truncated = true;
                    break 'keys;
                }
                let version_id = object.version_id();
                result.versions.push(ObjectVersionEntry {
                    object,
                    is_latest: index == 0,
                });
                result.next_key_marker = Some(key.clone());
                result.next_version_id_marker = Some(version_id);
            }
        }
        if !result.is_truncated {
            result.next_key_marker = None;
            result.next_version_id_marker = None;
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Multipart uploads
    // -----------------------------------------------------------------------

    /// List in-progress uploads, ordered by key and initiation time.
    #[allow(clippy::too_many_arguments)]
    pub async fn list_multipart_uploads(
        &self,
        bucket_name: &str,
        prefix: &str,
        delimiter: &str,
        key_marker: &str,
        upload_id_marker: &str,
        max_uploads: usize,
        credential: &Credential,
    ) -> GatewayResult<ListUploadsResult> {
        validate_listing_args(prefix, delimiter, key_marker)?;
        self.readable_bucket(bucket_name, credential).await?;

        let marker_ts = if key_marker.is_empty() || upload_id_marker.is_empty() {
            None
        } else {
            Some(
                oxgate_meta::rowkey::decode_timestamp(upload_id_marker)
                    .map_err(GatewayError::from)?,
            )
        };

        let mut ordered: BTreeMap<(String, u64), Multipart> = BTreeMap::new();
        let mut resume: Option<Vec<u8>> = None;
        loop {
            let batch = self
                .meta
                .scan_bucket_multiparts(bucket_name, resume.as_deref(), LIST_SCAN_BATCH)
                .await?;
            let done = batch.len() < LIST_SCAN_BATCH;
            for upload in batch {
                resume = Some(upload.rowkey());
                if !upload.object_name.starts_with(prefix) {
                    continue;
                }
                ordered.insert((upload.object_name.clone(), upload.ts_nanos()), upload);
            }
            if done {
                break;
            }
        }

        let mut result = ListUploadsResult::default();
        let mut groups: std::collections::BTreeSet<String> = Default::default();
        for ((key, ts), upload) in ordered {
            // Marker pair: resume strictly after (key, upload id).
            if !key_marker.is_empty() {
                if key.as_str() < key_marker {
                    continue;
                }
                if key == key_marker {
                    match marker_ts {
                        None => continue,
                        Some(marker_ts) if ts <= marker_ts => continue,
                        Some(_) => {}
                    }
                }
            }
            if let Some(group) = entry_name(&key, prefix, delimiter) {
                groups.insert(group);
                continue;
            }
            if result.uploads.len() == max_uploads {
                result.is_truncated = true;
                result.next_key_marker = result.uploads.last().map(|u| u.object_name.clone());
                result.next_upload_id_marker = result.uploads.last().map(Multipart::upload_id);
                break;
            }
            result.uploads.push(upload);
        }
        result.common_prefixes = groups.into_iter().collect();
        Ok(result)
    }

    /// Read access gate shared by the listing calls.
    async fn readable_bucket(
        &self,
        bucket_name: &str,
        credential: &Credential,
    ) -> GatewayResult<()> {
        let bucket = self.meta.get_bucket(bucket_name).await?;
        match bucket.acl {
            CannedAcl::PublicRead | CannedAcl::PublicReadWrite => Ok(()),
            CannedAcl::AuthenticatedRead => {
                if credential.is_anonymous() {
                    Err(GatewayError::BucketAccessForbidden {
                        bucket: bucket_name.to_owned(),
                    })
                } else {
                    Ok(())
                }
            }
            _ => {
                if bucket.owner_id == credential.user_id {
                    Ok(())
                } else {
                    Err(GatewayError::BucketAccessForbidden {
                        bucket: bucket_name.to_owned(),
                    })
                }
            }
        }
    }
}

/// Group a key under its collapsed prefix when a delimiter is in play.
/// Returns `Some(prefix)` when the key has more delimiter levels than the
/// listing prefix, `None` when the key is listed as itself.
fn entry_name(key: &str, prefix: &str, delimiter: &str) -> Option<String> {
    if delimiter.is_empty() {
        return None;
    }
    let rest = &key[prefix.len()..];
    rest.find(delimiter)
        .map(|pos| format!("{prefix}{}{delimiter}", &rest[..pos]))
}

/// Delimiter and marker validation shared by every listing call. Only the
/// empty and `/` delimiters are supported, and a marker must lie under the
/// prefix it pages through.
fn validate_listing_args(prefix: &str, delimiter: &str, marker: &str) -> GatewayResult<()> {
    if !delimiter.is_empty() && delimiter != "/" {
        return Err(GatewayError::NotImplemented);
    }
    if !marker.is_empty() && !prefix.is_empty() && !marker.starts_with(prefix) {
        return Err(GatewayError::NotImplemented);
    }
    Ok(())
}
