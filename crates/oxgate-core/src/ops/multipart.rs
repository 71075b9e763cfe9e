//! Multipart upload lifecycle: initiate, upload/copy parts, list parts,
//! complete, abort.
//!
//! Parts live in their own table until completion. Completing computes the
//! part offsets and the composite ETag, writes the finished object row and
//! only then removes the upload row, so an upload is either still abortable
//! or fully an object, never both.

use chrono::Utc;
use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, warn};

use oxgate_meta::{
    CannedAcl, Multipart, ObjMap, Object, Part, SseType, UploadMeta, VersioningStatus,
};

use crate::crypto::{
    generate_iv, generate_object_key, open_object_key, seal_object_key, wrap_encryption_reader,
    ENCRYPTION_KEY_LENGTH,
};
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{Gateway, RecycleEntry};
use crate::payload::StreamPayload;
use crate::stream::{hex_digest, HashingReader};
use crate::types::{Credential, ListPartsResult, SseRequest};

/// Largest accepted part body.
pub const MAX_PART_SIZE: i64 = 5 << 30;

/// Minimum part size, enforced at completion for every part but the last.
pub const MIN_PART_SIZE: i64 = 128 << 10;

/// Largest accepted part number.
pub const MAX_PART_NUMBER: u32 = 10_000;

/// One entry of a completion request, in client order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletePart {
    /// Part number the client claims.
    pub part_number: u32,
    /// Hex MD5 the client saw when uploading the part.
    pub etag: String,
}

/// Result of completing an upload.
#[derive(Debug, Clone, Default)]
pub struct CompleteMultipartResult {
    /// Composite ETag of the assembled object.
    pub etag: String,
    /// Version id, present when the bucket has versioning enabled.
    pub version_id: Option<String>,
    /// Total size of the assembled object.
    pub total_size: i64,
}

impl Gateway {
    // -----------------------------------------------------------------------
    // Initiate
    // -----------------------------------------------------------------------

    /// Start a multipart upload and return its id.
    pub async fn new_multipart_upload(
        &self,
        bucket_name: &str,
        object_name: &str,
        credential: &Credential,
        content_type: Option<String>,
        attributes: std::collections::HashMap<String, String>,
        acl: CannedAcl,
        sse: &SseRequest,
    ) -> GatewayResult<String> {
        let bucket = self.writable_bucket(bucket_name, credential).await?;

        let mut metadata = UploadMeta {
            initiator_id: credential.user_id.clone(),
            owner_id: bucket.owner_id.clone(),
            acl,
            content_type,
            sse_type: sse.sse_type,
            encryption_key: Vec::new(),
            initialization_vector: Vec::new(),
            attributes,
        };
        if sse.sse_type == SseType::S3 {
            // One data key for the whole upload, sealed now; parts add
            // their own stream IVs.
            let key = generate_object_key();
            let iv = generate_iv();
            let master = self.config.sse_master_key()?;
            metadata.encryption_key =
                seal_object_key(&master, &iv, &key).map_err(GatewayError::from)?;
            metadata.initialization_vector = iv;
        }

        let multipart = Multipart::new(bucket_name, object_name, Utc::now(), metadata);
        let upload_id = multipart.upload_id();
        self.meta.create_multipart(&multipart).await?;
        debug!(
            bucket = bucket_name,
            key = object_name,
            upload_id,
            "multipart upload initiated"
        );
        Ok(upload_id)
    }

    // -----------------------------------------------------------------------
    // Upload part
    // -----------------------------------------------------------------------

    /// Upload one part and return its ETag.
    ///
    /// Overwriting an existing part number replaces the cell and queues
    /// the replaced blob for collection.
    #[allow(clippy::too_many_arguments)]
    pub async fn put_object_part(
        &self,
        bucket_name: &str,
        object_name: &str,
        upload_id: &str,
        part_number: u32,
        size: i64,
        credential: &Credential,
        content_md5: Option<String>,
        sse: &SseRequest,
        payload: StreamPayload,
    ) -> GatewayResult<String> {
        let mut credential = credential.clone();
        let multipart = self
            .meta
            .get_multipart(bucket_name, object_name, upload_id)
            .await?;

        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(GatewayError::InvalidArgument {
                message: format!("part number must be between 1 and {MAX_PART_NUMBER}"),
            });
        }
        if size > MAX_PART_SIZE {
            return Err(GatewayError::EntityTooLarge);
        }

        let data_key = self.upload_data_key(&multipart.metadata, sse)?;

        let (cluster, pool) = self.pick_cluster_and_pool(size).await?;
        let oid = cluster.unique_blob_id();

        let StreamPayload { reader, verifier } = payload;
        let mut reader: Box<dyn AsyncRead + Send + Unpin> = reader;
        if size >= 0 {
            reader = Box::new(reader.take(size as u64));
        }
        let (hashing, md5_handle) = HashingReader::new(reader);
        let mut reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(hashing);

        let mut iv = Vec::new();
        if let Some(key) = &data_key {
            iv = generate_iv();
            reader = wrap_encryption_reader(reader, key, &iv)?;
        }

        let bytes_written = cluster.put(&pool, &oid, &mut reader).await? as i64;

        let orphan = RecycleEntry {
            bucket: bucket_name.to_owned(),
            key: object_name.to_owned(),
            location: cluster.id().to_owned(),
            pool: pool.clone(),
            object_id: oid.clone(),
        };

        if size >= 0 && bytes_written < size {
            self.recycle(orphan).await;
            return Err(GatewayError::IncompleteBody);
        }

        let calculated_md5 = hex_digest(&md5_handle);
        if let Some(expected) = content_md5.as_deref() {
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

        // Write access is checked against the verified caller, which for
        // streaming signatures only exists after the body has streamed.
        if let Err(e) = self.writable_bucket(bucket_name, &credential).await {
            self.recycle(orphan).await;
            return Err(e);
        }

        let replaced = multipart.parts.get(&part_number).cloned();

        let part = Part {
            part_number,
            location: cluster.id().to_owned(),
            pool,
            size: bytes_written,
            object_id: oid,
            offset: 0,
            etag: calculated_md5.clone(),
            last_modified: Utc::now(),
            initialization_vector: iv,
        };
        if let Err(e) = self.meta.put_multipart_part(&multipart, &part).await {
            self.recycle(orphan).await;
            return Err(e.into());
        }

        // The overwritten part's blob is unreachable now.
        if let Some(old) = replaced {
            self.recycle(RecycleEntry {
                bucket: bucket_name.to_owned(),
                key: object_name.to_owned(),
                location: old.location,
                pool: old.pool,
                object_id: old.object_id,
            })
            .await;
        }

        debug!(
            bucket = bucket_name,
            key = object_name,
            upload_id,
            part_number,
            size = bytes_written,
            "part stored"
        );
        Ok(calculated_md5)
    }

    /// Copy a source object's bytes in as one part of an upload.
    pub async fn copy_object_part(
        &self,
        source: &Object,
        source_sse: &SseRequest,
        bucket_name: &str,
        object_name: &str,
        upload_id: &str,
        part_number: u32,
        credential: &Credential,
    ) -> GatewayResult<String> {
        let (mut pipe_writer, pipe_reader) = tokio::io::duplex(oxgate_blob::MAX_CHUNK_SIZE);

        let read_side = async {
            let result = self
                .get_object(source, 0, source.size, &mut pipe_writer, source_sse)
                .await;
            drop(pipe_writer);
            result
        };

        let content_md5 = if source.is_multipart() {
            None
        } else {
            Some(source.etag.clone())
        };
        let dest_sse = SseRequest::none();
        let write_side = self.put_object_part(
            bucket_name,
            object_name,
            upload_id,
            part_number,
            source.size,
            credential,
            content_md5,
            &dest_sse,
            StreamPayload::from_reader(Box::new(pipe_reader)),
        );

        let (read_result, write_result) = tokio::join!(read_side, write_side);
        read_result?;
        write_result
    }

    // -----------------------------------------------------------------------
    // List parts
    // -----------------------------------------------------------------------

    /// List uploaded parts in ascending part-number order, starting at
    /// `part_number_marker`.
    pub async fn list_object_parts(
        &self,
        bucket_name: &str,
        object_name: &str,
        upload_id: &str,
        part_number_marker: u32,
        max_parts: usize,
        credential: &Credential,
    ) -> GatewayResult<ListPartsResult> {
        let multipart = self
            .meta
            .get_multipart(bucket_name, object_name, upload_id)
            .await?;

        match multipart.metadata.acl {
            CannedAcl::PublicRead | CannedAcl::PublicReadWrite => {}
            CannedAcl::AuthenticatedRead => {
                if credential.is_anonymous() {
                    return Err(GatewayError::AccessDenied);
                }
            }
            CannedAcl::BucketOwnerRead | CannedAcl::BucketOwnerFullControl => {
                let bucket = self.meta.get_bucket(bucket_name).await?;
                if bucket.owner_id != credential.user_id {
                    return Err(GatewayError::AccessDenied);
                }
            }
            CannedAcl::Private => {
                if multipart.metadata.owner_id != credential.user_id {
                    return Err(GatewayError::AccessDenied);
                }
            }
        }

        let mut result = ListPartsResult {
            initiator_id: multipart.metadata.initiator_id.clone(),
            owner_id: multipart.metadata.owner_id.clone(),
            ..ListPartsResult::default()
        };
        for (&number, part) in multipart.parts.range(part_number_marker..=MAX_PART_NUMBER) {
            if result.parts.len() == max_parts {
                result.is_truncated = true;
                result.next_part_number_marker = Some(number);
                break;
            }
            result.parts.push(part.clone());
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Complete
    // -----------------------------------------------------------------------

    /// Assemble the uploaded parts into an object.
    ///
    /// The request must list parts 1..N in order with matching ETags;
    /// every part but the last must reach the minimum size. The object row
    /// is committed first and the upload row removed second, so a failure
    /// in between rolls the object back and keeps the upload abortable.
    pub async fn complete_multipart_upload(
        &self,
        bucket_name: &str,
        object_name: &str,
        upload_id: &str,
        uploaded_parts: &[CompletePart],
        credential: &Credential,
    ) -> GatewayResult<CompleteMultipartResult> {
        let bucket = self.writable_bucket(bucket_name, credential).await?;
        let mut multipart = self
            .meta
            .get_multipart(bucket_name, object_name, upload_id)
            .await?;

        if uploaded_parts.is_empty() {
            return Err(GatewayError::MalformedXml);
        }

        let mut md5_of_digests = Md5::new();
        let mut total_size: i64 = 0;
        for (index, claimed) in uploaded_parts.iter().enumerate() {
            let expected_number = index as u32 + 1;
            if claimed.part_number != expected_number {
                return Err(GatewayError::InvalidPartOrder);
            }
            let part = multipart
                .parts
                .get_mut(&expected_number)
                .ok_or(GatewayError::InvalidPart)?;
            if part.etag != claimed.etag {
                return Err(GatewayError::InvalidPart);
            }
            if part.size < MIN_PART_SIZE && expected_number as usize != uploaded_parts.len() {
                return Err(GatewayError::PartTooSmall {
                    part_number: part.part_number,
                    size: part.size,
                    min: MIN_PART_SIZE,
                });
            }
            let digest = hex::decode(&part.etag).map_err(|_| GatewayError::InvalidPart)?;
            part.offset = total_size;
            total_size += part.size;
            md5_of_digests.update(&digest);
        }
        // Drop parts beyond the completed list; their cells die with the
        // upload row, their blobs with the abort-style recycling below.
        let extra_parts: Vec<Part> = multipart
            .parts
            .split_off(&(uploaded_parts.len() as u32 + 1))
            .into_values()
            .collect();

        let etag = format!(
            "{}-{}",
            hex::encode(md5_of_digests.finalize()),
            uploaded_parts.len()
        );

        let object = Object {
            name: object_name.to_owned(),
            bucket_name: bucket_name.to_owned(),
            location: String::new(),
            pool: String::new(),
            owner_id: multipart.metadata.owner_id.clone(),
            size: total_size,
            object_id: String::new(),
            last_modified: Utc::now(),
            etag: etag.clone(),
            content_type: multipart
                .metadata
                .content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_owned()),
            custom_attributes: multipart.metadata.attributes.clone(),
            acl: multipart.metadata.acl,
            null_version: bucket.versioning != VersioningStatus::Enabled,
            delete_marker: false,
            sse_type: multipart.metadata.sse_type,
            encryption_key: multipart.metadata.encryption_key.clone(),
            initialization_vector: multipart.metadata.initialization_vector.clone(),
            parts: multipart.parts.clone(),
        };

        let mut result = CompleteMultipartResult {
            etag,
            version_id: None,
            total_size,
        };

        // A completed upload replaces the current null version when
        // versioning is not enabled, exactly like a plain PUT.
        match bucket.versioning {
            VersioningStatus::Enabled => {
                result.version_id = Some(object.version_id());
            }
            VersioningStatus::Disabled => {
                self.remove_obj_and_map(bucket_name, object_name).await?;
            }
            VersioningStatus::Suspended => {
                self.remove_null_ver_obj_and_map(bucket_name, object_name)
                    .await?;
            }
        }

        self.meta.put_object_entry(&object).await?;

        let mut written_objmap = None;
        if object.null_version {
            let objmap = ObjMap::new(bucket_name, object_name, object.ts_nanos());
            if let Err(e) = self.meta.put_objmap_entry(&objmap).await {
                self.rollback_entries(Some(&object), None).await;
                return Err(e.into());
            }
            written_objmap = Some(objmap);
        }

        if let Err(e) = self.meta.delete_multipart(&multipart).await {
            // Roll the object back so the upload stays the one source of
            // truth. The null version removed above is gone for good.
            error!(
                bucket = bucket_name,
                key = object_name,
                upload_id,
                error = %e,
                "cannot remove completed upload row, rolling object back"
            );
            self.rollback_entries(Some(&object), written_objmap.as_ref())
                .await;
            return Err(e.into());
        }

        for extra in extra_parts {
            self.recycle(RecycleEntry {
                bucket: bucket_name.to_owned(),
                key: object_name.to_owned(),
                location: extra.location,
                pool: extra.pool,
                object_id: extra.object_id,
            })
            .await;
        }

        if let Err(e) = self.meta.update_usage(bucket_name, total_size).await {
            warn!(bucket = bucket_name, error = %e, "cannot update bucket usage");
        }
        self.invalidate_object_cache(
            bucket_name,
            object_name,
            result.version_id.as_deref().unwrap_or(""),
        )
        .await;

        debug!(
            bucket = bucket_name,
            key = object_name,
            upload_id,
            parts = uploaded_parts.len(),
            size = total_size,
            "multipart upload completed"
        );
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Abort
    // -----------------------------------------------------------------------

    /// Abort an upload: remove its row and queue every part blob for
    /// collection.
    pub async fn abort_multipart_upload(
        &self,
        bucket_name: &str,
        object_name: &str,
        upload_id: &str,
        credential: &Credential,
    ) -> GatewayResult<()> {
        self.writable_bucket(bucket_name, credential).await?;
        let multipart = self
            .meta
            .get_multipart(bucket_name, object_name, upload_id)
            .await?;

        self.meta.delete_multipart(&multipart).await?;

        for part in multipart.parts.values() {
            self.recycle(RecycleEntry {
                bucket: bucket_name.to_owned(),
                key: object_name.to_owned(),
                location: part.location.clone(),
                pool: part.pool.clone(),
                object_id: part.object_id.clone(),
            })
            .await;
        }
        debug!(
            bucket = bucket_name,
            key = object_name,
            upload_id,
            "multipart upload aborted"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Data key for part bodies: the upload's sealed key for
    /// gateway-managed mode, the caller's key for customer mode.
    fn upload_data_key(
        &self,
        metadata: &UploadMeta,
        sse: &SseRequest,
    ) -> GatewayResult<Option<Vec<u8>>> {
        match metadata.sse_type {
            SseType::None => Ok(None),
            SseType::S3 => {
                let master = self.config.sse_master_key()?;
                let key = open_object_key(
                    &master,
                    &metadata.initialization_vector,
                    &metadata.encryption_key,
                )
                .map_err(GatewayError::from)?;
                Ok(Some(key))
            }
            SseType::Customer => {
                if sse.customer_key.len() != ENCRYPTION_KEY_LENGTH {
                    return Err(GatewayError::InvalidArgument {
                        message: "customer encryption key must be 32 bytes".to_owned(),
                    });
                }
                Ok(Some(sse.customer_key.clone()))
            }
        }
    }
}
