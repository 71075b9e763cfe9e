//! Bucket operations: creation, deletion, attribute setters and the usage
//! counter.

use chrono::Utc;
use tracing::{debug, warn};

use oxgate_meta::{Bucket, CacheTable, CannedAcl, CorsRule, VersioningStatus};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::Gateway;
use crate::types::Credential;

impl Gateway {
    /// Create a bucket owned by the caller.
    ///
    /// Creation races on the bucket name through a compare-and-set; the
    /// loser learns whether the name is taken by someone else or already
    /// theirs. The owner's bucket list is updated afterwards, and the
    /// bucket row is rolled back if that fails.
    pub async fn make_bucket(
        &self,
        bucket_name: &str,
        acl: CannedAcl,
        credential: &Credential,
    ) -> GatewayResult<()> {
        let bucket = Bucket::new(bucket_name, &credential.user_id, acl, Utc::now());
        let created = self.meta.create_bucket(&bucket).await?;
        if !created {
            let owner = self.meta.get_bucket_owner(bucket_name).await?;
            return Err(if owner.as_deref() == Some(credential.user_id.as_str()) {
                GatewayError::BucketAlreadyOwnedByYou {
                    bucket: bucket_name.to_owned(),
                }
            } else {
                GatewayError::BucketAlreadyExists {
                    bucket: bucket_name.to_owned(),
                }
            });
        }

        if let Err(e) = self
            .meta
            .add_bucket_for_user(bucket_name, &credential.user_id)
            .await
        {
            warn!(bucket = bucket_name, error = %e, "cannot record bucket for user, rolling back");
            if let Err(rollback) = self.meta.delete_bucket(bucket_name).await {
                warn!(
                    bucket = bucket_name,
                    error = %rollback,
                    "inconsistent data: bucket row should be removed"
                );
            }
            return Err(e.into());
        }

        debug!(bucket = bucket_name, owner = %credential.user_id, "bucket created");
        Ok(())
    }

    /// Fetch bucket attributes, enforcing read access.
    pub async fn get_bucket_info(
        &self,
        bucket_name: &str,
        credential: &Credential,
    ) -> GatewayResult<Bucket> {
        let bucket = self.meta.get_bucket(bucket_name).await?;
        match bucket.acl {
            CannedAcl::PublicRead | CannedAcl::PublicReadWrite => {}
            CannedAcl::AuthenticatedRead => {
                if credential.is_anonymous() {
                    return Err(GatewayError::AccessDenied);
                }
            }
            _ => {
                if bucket.owner_id != credential.user_id {
                    return Err(GatewayError::AccessDenied);
                }
            }
        }
        Ok(bucket)
    }

    /// All buckets owned by the caller.
    pub async fn list_buckets(&self, credential: &Credential) -> GatewayResult<Vec<Bucket>> {
        let names = self.meta.get_user_buckets(&credential.user_id).await?;
        let mut buckets = Vec::with_capacity(names.len());
        for name in names {
            match self.meta.get_bucket(&name).await {
                Ok(bucket) => buckets.push(bucket),
                // The user row and bucket table drift only on half-failed
                // creations; skip rather than fail the whole listing.
                Err(e) => warn!(bucket = name, error = %e, "bucket in user list is unreadable"),
            }
        }
        Ok(buckets)
    }

    /// Delete a bucket. Only the owner may delete, and the bucket must
    /// hold no object rows and no in-progress uploads.
    pub async fn delete_bucket(
        &self,
        bucket_name: &str,
        credential: &Credential,
    ) -> GatewayResult<()> {
        let bucket = self.meta.get_bucket(bucket_name).await?;
        if bucket.owner_id != credential.user_id {
            return Err(GatewayError::BucketAccessForbidden {
                bucket: bucket_name.to_owned(),
            });
        }

        if self.meta.bucket_has_objects(bucket_name).await?
            || self.meta.bucket_has_multiparts(bucket_name).await?
        {
            return Err(GatewayError::BucketNotEmpty {
                bucket: bucket_name.to_owned(),
            });
        }

        self.meta.delete_bucket(bucket_name).await?;
        if let Err(e) = self
            .meta
            .remove_bucket_for_user(bucket_name, &credential.user_id)
            .await
        {
            warn!(bucket = bucket_name, error = %e, "cannot remove bucket from user list");
        }
        self.meta.cache.remove(CacheTable::Buckets, bucket_name).await;
        debug!(bucket = bucket_name, "bucket deleted");
        Ok(())
    }

    /// Set the bucket versioning state. Once versioning has been enabled a
    /// bucket can only switch between enabled and suspended.
    pub async fn set_bucket_versioning(
        &self,
        bucket_name: &str,
        status: VersioningStatus,
        credential: &Credential,
    ) -> GatewayResult<()> {
        if status == VersioningStatus::Disabled {
            return Err(GatewayError::InvalidArgument {
                message: "versioning cannot be disabled once enabled".to_owned(),
            });
        }
        let mut bucket = self.owned_bucket(bucket_name, credential).await?;
        bucket.versioning = status;
        self.meta.put_bucket(&bucket).await?;
        self.meta.cache.remove(CacheTable::Buckets, bucket_name).await;
        Ok(())
    }

    /// Set the bucket canned ACL.
    pub async fn set_bucket_acl(
        &self,
        bucket_name: &str,
        acl: CannedAcl,
        credential: &Credential,
    ) -> GatewayResult<()> {
        let mut bucket = self.owned_bucket(bucket_name, credential).await?;
        bucket.acl = acl;
        self.meta.put_bucket(&bucket).await?;
        self.meta.cache.remove(CacheTable::Buckets, bucket_name).await;
        Ok(())
    }

    /// Replace the bucket CORS rules.
    pub async fn set_bucket_cors(
        &self,
        bucket_name: &str,
        cors: Vec<CorsRule>,
        credential: &Credential,
    ) -> GatewayResult<()> {
        let mut bucket = self.owned_bucket(bucket_name, credential).await?;
        bucket.cors = cors;
        self.meta.put_bucket(&bucket).await?;
        self.meta.cache.remove(CacheTable::Buckets, bucket_name).await;
        Ok(())
    }

    /// Drop the bucket CORS rules.
    pub async fn delete_bucket_cors(
        &self,
        bucket_name: &str,
        credential: &Credential,
    ) -> GatewayResult<()> {
        self.set_bucket_cors(bucket_name, Vec::new(), credential)
            .await
    }

    /// Stored bytes of a bucket, for the admin usage endpoint.
    pub async fn get_usage(&self, bucket_name: &str) -> GatewayResult<i64> {
        Ok(self.meta.get_usage(bucket_name).await?)
    }

    /// Fetch a bucket and require the caller to own it.
    pub(crate) async fn owned_bucket(
        &self,
        bucket_name: &str,
        credential: &Credential,
    ) -> GatewayResult<Bucket> {
        let bucket = self.meta.get_bucket(bucket_name).await?;
        if bucket.owner_id != credential.user_id {
            return Err(GatewayError::BucketAccessForbidden {
                bucket: bucket_name.to_owned(),
            });
        }
        Ok(bucket)
    }

    /// Fetch a bucket and require write access: everyone on
    /// public-read-write buckets, otherwise the owner.
    pub(crate) async fn writable_bucket(
        &self,
        bucket_name: &str,
        credential: &Credential,
    ) -> GatewayResult<Bucket> {
        let bucket = self.meta.get_bucket(bucket_name).await?;
        if bucket.acl != CannedAcl::PublicReadWrite && bucket.owner_id != credential.user_id {
            return Err(GatewayError::BucketAccessForbidden {
                bucket: bucket_name.to_owned(),
            });
        }
        Ok(bucket)
    }
}
