//! Object operations: the streaming write pipeline, ranged reads, copies,
//! and the versioning-aware delete paths.
//!
//! Write path:
//!
//! ```text
//! body --> limit(size) --> md5 tee --> [encrypt] --> blob backend
//!                                              |
//!                       meta commit <----------+-- bytes written
//! ```
//!
//! Bytes always land in the blob backend before any metadata row points at
//! them. Once bytes are committed, every error path queues the blob for
//! the collector before returning.

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, error, warn};

use oxgate_blob::MAX_CHUNK_SIZE;
use oxgate_meta::cache::object_cache_key;
use oxgate_meta::model::object::NULL_VERSION_ID;
use oxgate_meta::rowkey;
use oxgate_meta::{
    Bucket, CacheTable, CannedAcl, MetaError, ObjMap, Object, SseType, VersioningStatus,
};

use crate::crypto::{
    encryption_key_from_sse_request, generate_iv, open_object_key, seal_object_key,
    wrap_aligned_decryption_reader, wrap_encryption_reader, ENCRYPTION_KEY_LENGTH,
};
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{Gateway, RecycleEntry};
use crate::payload::StreamPayload;
use crate::stream::{copy_chunked, hex_digest, HashingReader};
use crate::types::{
    Credential, DeleteObjectResult, PutObjectArgs, PutObjectResult, SseRequest,
};

impl Gateway {
    // -----------------------------------------------------------------------
    // PUT
    // -----------------------------------------------------------------------

    /// Store an object.
    ///
    /// Streams the body into a fresh blob, verifies digest and (for
    /// streaming-signed bodies) the payload signature, then commits the
    /// object row and versioning bookkeeping. Any failure after the blob
    /// write queues the blob for collection before returning.
    pub async fn put_object(
        &self,
        bucket_name: &str,
        object_name: &str,
        credential: &Credential,
        args: PutObjectArgs,
        payload: StreamPayload,
    ) -> GatewayResult<PutObjectResult> {
        let mut credential = credential.clone();
        let bucket = self.writable_bucket(bucket_name, &credential).await?;

        let (cluster, pool) = self.pick_cluster_and_pool(args.size).await?;
        let oid = cluster.unique_blob_id();

        let StreamPayload { reader, verifier } = payload;
        let mut reader: Box<dyn AsyncRead + Send + Unpin> = reader;
        if args.size >= 0 {
            reader = Box::new(reader.take(args.size as u64));
        }
        let (hashing, md5_handle) = HashingReader::new(reader);
        let mut reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(hashing);

        let encryption_key = encryption_key_from_sse_request(&args.sse)?;
        let mut iv = Vec::new();
        if let Some(key) = &encryption_key {
            iv = generate_iv();
            reader = wrap_encryption_reader(reader, key, &iv)?;
        }

        let bytes_written = cluster.put(&pool, &oid, &mut reader).await? as i64;

        // From here on the blob exists; every early return must recycle it.
        let orphan = RecycleEntry {
            bucket: bucket_name.to_owned(),
            key: object_name.to_owned(),
            location: cluster.id().to_owned(),
            pool: pool.clone(),
            object_id: oid.clone(),
        };

        if args.size >= 0 && bytes_written < args.size {
            self.recycle(orphan).await;
            return Err(GatewayError::IncompleteBody);
        }

        let calculated_md5 = hex_digest(&md5_handle);
        if let Some(expected) = args.content_md5.as_deref() {
            if !expected.is_empty() && expected != calculated_md5 {
                self.recycle(orphan).await;
                return Err(GatewayError::BadDigest);
            }
        }

        if let Some(verifier) = verifier {
            match verifier.verify() {
                Ok(verified) => credential = verified,
                Err(e) => {
                    self.recycle(orphan).await;
                    return Err(e);
                }
            }
        }

        let sealed_key = match (&encryption_key, args.sse.sse_type) {
            (Some(key), SseType::S3) => {
                let master = match self.config.sse_master_key() {
                    Ok(master) => master,
                    Err(e) => {
                        self.recycle(orphan).await;
                        return Err(e);
                    }
                };
                match seal_object_key(&master, &iv, key) {
                    Ok(sealed) => sealed,
                    Err(e) => {
                        self.recycle(orphan).await;
                        return Err(e.into());
                    }
                }
            }
            _ => Vec::new(),
        };

        let object = Object {
            name: object_name.to_owned(),
            bucket_name: bucket_name.to_owned(),
            location: cluster.id().to_owned(),
            pool,
            owner_id: credential.user_id.clone(),
            size: bytes_written,
            object_id: oid,
            last_modified: Utc::now(),
            etag: calculated_md5.clone(),
            content_type: args
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_owned()),
            custom_attributes: args.attributes,
            acl: args.acl,
            null_version: bucket.versioning != VersioningStatus::Enabled,
            delete_marker: false,
            sse_type: args.sse.sse_type,
            encryption_key: sealed_key,
            initialization_vector: iv,
            parts: Default::default(),
        };

        let mut result = PutObjectResult {
            md5: calculated_md5,
            last_modified: object.last_modified,
            version_id: None,
        };

        // Versioning bookkeeping ahead of the row write, as a PUT under
        // non-enabled versioning replaces the current null version.
        let mut null_ver_num = None;
        let prior_removal = match bucket.versioning {
            VersioningStatus::Enabled => {
                result.version_id = Some(object.version_id());
                Ok(())
            }
            VersioningStatus::Disabled => {
                null_ver_num = Some(object.ts_nanos());
                self.remove_obj_and_map(bucket_name, object_name).await
            }
            VersioningStatus::Suspended => {
                null_ver_num = Some(object.ts_nanos());
                self.remove_null_ver_obj_and_map(bucket_name, object_name)
                    .await
            }
        };
        if let Err(e) = prior_removal {
            self.recycle(orphan).await;
            return Err(e);
        }

        if let Err(e) = self.meta.put_object_entry(&object).await {
            self.recycle(orphan).await;
            return Err(e.into());
        }

        if let Some(null_ver_num) = null_ver_num {
            let objmap = ObjMap::new(bucket_name, object_name, null_ver_num);
            if let Err(e) = self.meta.put_objmap_entry(&objmap).await {
                self.rollback_entries(Some(&object), None).await;
                self.recycle(orphan).await;
                return Err(e.into());
            }
        }

        if let Err(e) = self.meta.update_usage(bucket_name, bytes_written).await {
            warn!(bucket = bucket_name, error = %e, "cannot update bucket usage");
        }
        self.invalidate_object_cache(bucket_name, object_name, &object.version_id())
            .await;

        debug!(
            bucket = bucket_name,
            key = object_name,
            size = bytes_written,
            version = result.version_id.as_deref().unwrap_or(""),
            "object stored"
        );
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // GET
    // -----------------------------------------------------------------------

    /// Stream `[start_offset, start_offset + length)` of an object into
    /// `writer`.
    ///
    /// Single-part plaintext objects stream straight off the backend.
    /// Encrypted reads go through a block-aligned reader and a decrypting
    /// wrapper. Multipart objects stream the overlapping slice of each
    /// part strictly in ascending part-number order.
    pub async fn get_object(
        &self,
        object: &Object,
        start_offset: i64,
        length: i64,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        sse: &SseRequest,
    ) -> GatewayResult<()> {
        let encryption_key = self.resolve_read_key(object, sse)?;

        if object.parts.is_empty() {
            let cluster = self.cluster(&object.location)?;
            if object.sse_type == SseType::None {
                cluster
                    .get(
                        &object.pool,
                        &object.object_id,
                        start_offset as u64,
                        length as u64,
                        writer,
                    )
                    .await?;
                return Ok(());
            }

            let aligned = cluster
                .get_aligned_reader(
                    &object.pool,
                    &object.object_id,
                    start_offset as u64,
                    length as u64,
                )
                .await?;
            let decrypted = wrap_aligned_decryption_reader(
                aligned,
                start_offset as u64,
                &encryption_key,
                &object.initialization_vector,
            )?;
            let mut limited = decrypted.take(length as u64);
            copy_chunked(&mut limited, writer, MAX_CHUNK_SIZE)
                .await
                .map_err(anyhow::Error::from)?;
            return Ok(());
        }

        // Multipart object: serve the overlap of each part, in order.
        let range_start = start_offset;
        let range_end = start_offset.saturating_add(length);
        for part in object.parts.values() {
            let part_start = part.offset;
            let part_end = part.offset + part.size;
            if part_start >= range_end {
                break;
            }
            if part_end <= range_start {
                continue;
            }
            let slice_start = range_start.max(part_start);
            let slice_end = range_end.min(part_end);
            let read_offset = (slice_start - part_start) as u64;
            let read_length = (slice_end - slice_start) as u64;

            let cluster = self.cluster(&part.location)?;
            if object.sse_type == SseType::None {
                cluster
                    .get(&part.pool, &part.object_id, read_offset, read_length, writer)
                    .await?;
                continue;
            }

            let aligned = cluster
                .get_aligned_reader(&part.pool, &part.object_id, read_offset, read_length)
                .await?;
            let decrypted = wrap_aligned_decryption_reader(
                aligned,
                read_offset,
                &encryption_key,
                &part.initialization_vector,
            )?;
            let mut limited = decrypted.take(read_length);
            copy_chunked(&mut limited, writer, MAX_CHUNK_SIZE)
                .await
                .map_err(anyhow::Error::from)?;
        }
        Ok(())
    }

    /// Fetch object metadata with access checks, resolving the requested
    /// version (empty for current, `"null"`, or a concrete id).
    pub async fn get_object_info(
        &self,
        bucket_name: &str,
        object_name: &str,
        version: &str,
        credential: &Credential,
    ) -> GatewayResult<Object> {
        let bucket = self.meta.get_bucket(bucket_name).await?;

        let object = if version.is_empty() {
            let object = self.meta.get_object(bucket_name, object_name).await?;
            // A delete marker on top hides the key from unversioned reads.
            if object.delete_marker {
                return Err(GatewayError::NoSuchKey {
                    key: object_name.to_owned(),
                });
            }
            object
        } else {
            self.get_obj_with_version(bucket_name, object_name, version)
                .await?
        };

        match object.acl {
            CannedAcl::PublicRead | CannedAcl::PublicReadWrite => {}
            CannedAcl::AuthenticatedRead => {
                if credential.is_anonymous() {
                    return Err(GatewayError::AccessDenied);
                }
            }
            CannedAcl::BucketOwnerRead | CannedAcl::BucketOwnerFullControl => {
                if bucket.owner_id != credential.user_id {
                    return Err(GatewayError::AccessDenied);
                }
            }
            CannedAcl::Private => {
                if object.owner_id != credential.user_id {
                    return Err(GatewayError::AccessDenied);
                }
            }
        }
        Ok(object)
    }

    /// Owner and ACL of an object, for ACL responses.
    pub async fn get_object_acl(
        &self,
        bucket_name: &str,
        object_name: &str,
        version: &str,
        credential: &Credential,
    ) -> GatewayResult<(String, CannedAcl)> {
        let bucket = self.meta.get_bucket(bucket_name).await?;
        let object = if version.is_empty() {
            self.meta.get_object(bucket_name, object_name).await?
        } else {
            self.get_obj_with_version(bucket_name, object_name, version)
                .await?
        };

        let allowed = match object.acl {
            CannedAcl::BucketOwnerFullControl => bucket.owner_id == credential.user_id,
            _ => object.owner_id == credential.user_id,
        };
        if !allowed {
            return Err(GatewayError::AccessDenied);
        }
        Ok((object.owner_id.clone(), object.acl))
    }

    /// Rewrite an object's canned ACL.
    pub async fn set_object_acl(
        &self,
        bucket_name: &str,
        object_name: &str,
        version: &str,
        acl: CannedAcl,
        credential: &Credential,
    ) -> GatewayResult<()> {
        let bucket = self.meta.get_bucket(bucket_name).await?;
        if bucket.owner_id != credential.user_id {
            return Err(GatewayError::AccessDenied);
        }
        let mut object = if version.is_empty() {
            self.meta.get_object(bucket_name, object_name).await?
        } else {
            self.get_obj_with_version(bucket_name, object_name, version)
                .await?
        };
        object.acl = acl;
        self.meta.put_object_entry(&object).await?;
        self.invalidate_object_cache(bucket_name, object_name, version)
            .await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // COPY
    // -----------------------------------------------------------------------

    /// Copy a source object into `(dest_bucket, dest_key)`.
    ///
    /// The source bytes are re-read through the normal read path (including
    /// decryption) and re-written through the normal write path, so the
    /// destination gets fresh placement, key material and version
    /// bookkeeping. The computed digest is checked against the source ETag
    /// for single-part sources.
    pub async fn copy_object(
        &self,
        source: &Object,
        source_sse: &SseRequest,
        dest_bucket: &str,
        dest_key: &str,
        credential: &Credential,
        dest_sse: SseRequest,
    ) -> GatewayResult<PutObjectResult> {
        let (mut pipe_writer, pipe_reader) = tokio::io::duplex(MAX_CHUNK_SIZE);

        let read_side = async {
            let result = self
                .get_object(source, 0, source.size, &mut pipe_writer, source_sse)
                .await;
            // Dropping the writer closes the pipe so the write side sees
            // EOF even on error.
            drop(pipe_writer);
            result
        };

        let args = PutObjectArgs {
            size: source.size,
            content_type: Some(source.content_type.clone()),
            content_md5: if source.is_multipart() {
                // Multipart ETags are not body digests; nothing to check
                // the stream against.
                None
            } else {
                Some(source.etag.clone())
            },
            acl: source.acl,
            sse: dest_sse,
            attributes: source.custom_attributes.clone(),
        };
        let write_side = self.put_object(
            dest_bucket,
            dest_key,
            credential,
            args,
            StreamPayload::from_reader(Box::new(pipe_reader)),
        );

        let (read_result, write_result) = tokio::join!(read_side, write_side);
        read_result?;
        write_result
    }

    // -----------------------------------------------------------------------
    // DELETE
    // -----------------------------------------------------------------------

    /// Delete an object or one of its versions.
    ///
    /// Versioning state decides the effect: plain removal when disabled, a
    /// delete marker when enabled and no version was named, removal of the
    /// named version otherwise, and null-version replacement semantics
    /// when suspended. Blob removal is always asynchronous through the
    /// collector.
    pub async fn delete_object(
        &self,
        bucket_name: &str,
        object_name: &str,
        version: &str,
        credential: &Credential,
    ) -> GatewayResult<DeleteObjectResult> {
        let bucket = self.writable_bucket(bucket_name, credential).await?;

        let mut result = DeleteObjectResult::default();
        match bucket.versioning {
            VersioningStatus::Disabled => {
                if !version.is_empty() {
                    return Err(GatewayError::NoSuchVersion {
                        version_id: version.to_owned(),
                    });
                }
                self.remove_obj_and_map(bucket_name, object_name).await?;
            }
            VersioningStatus::Enabled => {
                if version.is_empty() {
                    result.version_id =
                        Some(self.add_delete_marker(&bucket, object_name, false).await?);
                    result.delete_marker = true;
                } else {
                    if version == NULL_VERSION_ID {
                        self.remove_null_ver_obj_and_map(bucket_name, object_name)
                            .await?;
                    } else {
                        self.remove_object_version(bucket_name, object_name, version)
                            .await?;
                    }
                    result.version_id = Some(version.to_owned());
                }
            }
            VersioningStatus::Suspended => {
                if version.is_empty() {
                    self.remove_null_ver_obj_and_map(bucket_name, object_name)
                        .await?;
                    result.version_id =
                        Some(self.add_delete_marker(&bucket, object_name, true).await?);
                    result.delete_marker = true;
                } else {
                    if version == NULL_VERSION_ID {
                        self.remove_null_ver_obj_and_map(bucket_name, object_name)
                            .await?;
                    } else {
                        self.remove_object_version(bucket_name, object_name, version)
                            .await?;
                    }
                    result.version_id = Some(version.to_owned());
                }
            }
        }

        self.invalidate_object_cache(bucket_name, object_name, version)
            .await;
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// Resolve the data key for a read: open the sealed key for
    /// gateway-managed objects, take the caller's key for customer-mode
    /// objects.
    fn resolve_read_key(&self, object: &Object, sse: &SseRequest) -> GatewayResult<Vec<u8>> {
        match object.sse_type {
            SseType::None => Ok(Vec::new()),
            SseType::S3 => {
                let master = self.config.sse_master_key()?;
                Ok(open_object_key(
                    &master,
                    &object.initialization_vector,
                    &object.encryption_key,
                )?)
            }
            SseType::Customer => {
                let key = if sse.copy_source_customer_key.is_empty() {
                    &sse.customer_key
                } else {
                    &sse.copy_source_customer_key
                };
                if key.len() != ENCRYPTION_KEY_LENGTH {
                    return Err(GatewayError::AccessDenied);
                }
                Ok(key.clone())
            }
        }
    }

    /// Resolve `version` into an object row. `"null"` goes through the
    /// null-version pointer.
    pub(crate) async fn get_obj_with_version(
        &self,
        bucket_name: &str,
        object_name: &str,
        version: &str,
    ) -> GatewayResult<Object> {
        if version == NULL_VERSION_ID {
            let objmap = self
                .meta
                .get_objmap(bucket_name, object_name)
                .await
                .map_err(|e| match e {
                    MetaError::NoSuchKey { .. } => GatewayError::NoSuchVersion {
                        version_id: NULL_VERSION_ID.to_owned(),
                    },
                    other => other.into(),
                })?;
            let null_version = objmap.null_version_id();
            return Ok(self
                .meta
                .get_object_version(bucket_name, object_name, &null_version)
                .await?);
        }
        Ok(self
            .meta
            .get_object_version(bucket_name, object_name, version)
            .await?)
    }

    /// Remove an object row and record its blobs for collection. A failure
    /// to record rolls the row back in; losing track of bytes is worse
    /// than failing the delete.
    pub(crate) async fn remove_by_object(&self, object: &Object) -> GatewayResult<()> {
        self.meta.delete_object_entry(object).await?;

        if let Err(e) = self.meta.put_object_to_gc(object).await {
            error!(
                bucket = object.bucket_name,
                key = object.name,
                error = %e,
                "cannot record orphan, restoring object row"
            );
            if let Err(restore) = self.meta.put_object_entry(object).await {
                error!(
                    bucket = object.bucket_name,
                    key = object.name,
                    error = %restore,
                    "inconsistent data: object row should be restored"
                );
            }
            return Err(e.into());
        }

        if let Err(e) = self
            .meta
            .update_usage(&object.bucket_name, -object.size)
            .await
        {
            warn!(bucket = object.bucket_name, error = %e, "cannot update bucket usage");
        }
        let version = rowkey::encode_timestamp(object.ts_nanos());
        self.invalidate_object_cache(&object.bucket_name, &object.name, &version)
            .await;
        Ok(())
    }

    /// Remove the current version of a key (if any) and its null-version
    /// pointer. Missing keys are fine.
    pub(crate) async fn remove_obj_and_map(
        &self,
        bucket_name: &str,
        object_name: &str,
    ) -> GatewayResult<()> {
        let object = match self.meta.get_object(bucket_name, object_name).await {
            Ok(object) => object,
            Err(MetaError::NoSuchKey { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        self.remove_by_object(&object).await?;
        let objmap = ObjMap::new(bucket_name, object_name, 0);
        self.meta.delete_objmap_entry(&objmap).await?;
        Ok(())
    }

    /// Remove the null version of a key (if any) and its pointer.
    pub(crate) async fn remove_null_ver_obj_and_map(
        &self,
        bucket_name: &str,
        object_name: &str,
    ) -> GatewayResult<()> {
        let object = match self
            .get_obj_with_version(bucket_name, object_name, NULL_VERSION_ID)
            .await
        {
            Ok(object) => object,
            Err(GatewayError::NoSuchVersion { .. } | GatewayError::NoSuchKey { .. }) => {
                return Ok(())
            }
            Err(e) => return Err(e),
        };
        self.remove_by_object(&object).await?;
        let objmap = ObjMap::new(bucket_name, object_name, 0);
        self.meta.delete_objmap_entry(&objmap).await?;
        Ok(())
    }

    /// Remove one concrete version of a key. Missing versions are fine.
    pub(crate) async fn remove_object_version(
        &self,
        bucket_name: &str,
        object_name: &str,
        version: &str,
    ) -> GatewayResult<()> {
        let object = match self
            .get_obj_with_version(bucket_name, object_name, version)
            .await
        {
            Ok(object) => object,
            Err(GatewayError::NoSuchVersion { .. } | GatewayError::NoSuchKey { .. }) => {
                return Ok(())
            }
            Err(e) => return Err(e),
        };
        self.remove_by_object(&object).await
    }

    /// Write a delete marker and return its version id. A null-version
    /// marker also updates the null-version pointer, with rollback when
    /// that second write fails.
    pub(crate) async fn add_delete_marker(
        &self,
        bucket: &Bucket,
        object_name: &str,
        null_version: bool,
    ) -> GatewayResult<String> {
        let marker = Object {
            name: object_name.to_owned(),
            bucket_name: bucket.name.clone(),
            location: String::new(),
            pool: String::new(),
            owner_id: bucket.owner_id.clone(),
            size: 0,
            object_id: String::new(),
            last_modified: Utc::now(),
            etag: String::new(),
            content_type: String::new(),
            custom_attributes: Default::default(),
            acl: CannedAcl::Private,
            null_version,
            delete_marker: true,
            sse_type: SseType::None,
            encryption_key: Vec::new(),
            initialization_vector: Vec::new(),
            parts: Default::default(),
        };
        let version_id = marker.version_id();
        self.meta.put_object_entry(&marker).await?;

        if null_version {
            let objmap = ObjMap::new(&bucket.name, object_name, marker.ts_nanos());
            if let Err(e) = self.meta.put_objmap_entry(&objmap).await {
                self.rollback_entries(Some(&marker), None).await;
                return Err(e.into());
            }
        }
        Ok(version_id)
    }

    /// Best-effort removal of half-committed rows. Failures are surfaced
    /// in the log with the row keys; the collector never touches object
    /// rows, so an operator has to.
    pub(crate) async fn rollback_entries(&self, object: Option<&Object>, objmap: Option<&ObjMap>) {
        if let Some(object) = object {
            if let Err(e) = self.meta.delete_object_entry(object).await {
                error!(
                    rowkey = %hex::encode(object.rowkey()),
                    error = %e,
                    "inconsistent data: object row should be removed"
                );
            }
        }
        if let Some(objmap) = objmap {
            if let Err(e) = self.meta.delete_objmap_entry(objmap).await {
                error!(
                    rowkey = %hex::encode(objmap.rowkey()),
                    error = %e,
                    "inconsistent data: null-version pointer should be removed"
                );
            }
        }
    }

    /// Drop the cached current-version and named-version entries of a key.
    pub(crate) async fn invalidate_object_cache(
        &self,
        bucket_name: &str,
        object_name: &str,
        version: &str,
    ) {
        self.meta
            .cache
            .remove(
                CacheTable::Objects,
                &object_cache_key(bucket_name, object_name, ""),
            )
            .await;
        if !version.is_empty() {
            self.meta
                .cache
                .remove(
                    CacheTable::Objects,
                    &object_cache_key(bucket_name, object_name, version),
                )
                .await;
        }
    }
}
