//! Bucket lifecycle tests: creation races, ownership, emptiness rules and
//! attribute setters.

#[cfg(test)]
mod tests {
    use crate::{alice, mallory, test_bucket_name, TestEnv};
    use oxgate_core::{GatewayError, SseRequest};
    use oxgate_meta::{CannedAcl, CorsRule, VersioningStatus};

    #[tokio::test]
    async fn test_should_create_and_list_buckets() {
        let env = TestEnv::new().await;
        let first = env.create_bucket("one").await;
        let second = env.create_bucket("two").await;

        let buckets = env
            .gateway
            .list_buckets(&alice())
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        let names: Vec<&str> = buckets.iter().map(|b| b.name.as_str()).collect();
        assert!(names.contains(&first.as_str()));
        assert!(names.contains(&second.as_str()));

        // Another user owns nothing.
        let empty = env
            .gateway
            .list_buckets(&mallory())
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_should_distinguish_creation_conflicts() {
        let env = TestEnv::new().await;
        let name = env.create_bucket("dup").await;

        let err = env
            .gateway
            .make_bucket(&name, CannedAcl::Private, &alice())
            .await;
        assert!(matches!(
            err,
            Err(GatewayError::BucketAlreadyOwnedByYou { .. })
        ));

        let err = env
            .gateway
            .make_bucket(&name, CannedAcl::Private, &mallory())
            .await;
        assert!(matches!(err, Err(GatewayError::BucketAlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_should_refuse_deleting_nonempty_bucket() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("full").await;
        env.put(&bucket, "k", b"data").await;

        let err = env.gateway.delete_bucket(&bucket, &alice()).await;
        assert!(matches!(err, Err(GatewayError::BucketNotEmpty { .. })));

        // Removing the object unblocks deletion.
        env.gateway
            .delete_object(&bucket, "k", "", &alice())
            .await
            .unwrap_or_else(|e| panic!("delete object failed: {e}"));
        env.gateway
            .delete_bucket(&bucket, &alice())
            .await
            .unwrap_or_else(|e| panic!("delete bucket failed: {e}"));

        let err = env.gateway.get_bucket_info(&bucket, &alice()).await;
        assert!(matches!(err, Err(GatewayError::NoSuchBucket { .. })));
    }

    #[tokio::test]
    async fn test_should_refuse_deleting_bucket_with_open_upload() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("upload").await;
        let upload_id = env
            .gateway
            .new_multipart_upload(
                &bucket,
                "k",
                &alice(),
                None,
                Default::default(),
                Default::default(),
                &SseRequest::none(),
            )
            .await
            .unwrap_or_else(|e| panic!("initiate failed: {e}"));

        let err = env.gateway.delete_bucket(&bucket, &alice()).await;
        assert!(matches!(err, Err(GatewayError::BucketNotEmpty { .. })));

        env.gateway
            .abort_multipart_upload(&bucket, "k", &upload_id, &alice())
            .await
            .unwrap_or_else(|e| panic!("abort failed: {e}"));
        env.gateway
            .delete_bucket(&bucket, &alice())
            .await
            .unwrap_or_else(|e| panic!("delete bucket failed: {e}"));
    }

    #[tokio::test]
    async fn test_should_deny_foreign_deletion() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("guard").await;
        let err = env.gateway.delete_bucket(&bucket, &mallory()).await;
        assert!(matches!(
            err,
            Err(GatewayError::BucketAccessForbidden { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_update_versioning_state() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("verstate").await;

        let info = env
            .gateway
            .get_bucket_info(&bucket, &alice())
            .await
            .unwrap_or_else(|e| panic!("info failed: {e}"));
        assert_eq!(info.versioning, VersioningStatus::Disabled);

        env.gateway
            .set_bucket_versioning(&bucket, VersioningStatus::Enabled, &alice())
            .await
            .unwrap_or_else(|e| panic!("set versioning failed: {e}"));
        let info = env
            .gateway
            .get_bucket_info(&bucket, &alice())
            .await
            .unwrap_or_else(|e| panic!("info failed: {e}"));
        assert_eq!(info.versioning, VersioningStatus::Enabled);

        // There is no way back to the initial state.
        let err = env
            .gateway
            .set_bucket_versioning(&bucket, VersioningStatus::Disabled, &alice())
            .await;
        assert!(matches!(err, Err(GatewayError::InvalidArgument { .. })));

        // Only the owner may flip it.
        let err = env
            .gateway
            .set_bucket_versioning(&bucket, VersioningStatus::Suspended, &mallory())
            .await;
        assert!(matches!(
            err,
            Err(GatewayError::BucketAccessForbidden { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_roundtrip_cors_rules() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("cors").await;

        let rules = vec![CorsRule {
            allowed_origins: vec!["https://example.com".to_owned()],
            allowed_methods: vec!["GET".to_owned(), "PUT".to_owned()],
            max_age_seconds: 600,
            ..CorsRule::default()
        }];
        env.gateway
            .set_bucket_cors(&bucket, rules.clone(), &alice())
            .await
            .unwrap_or_else(|e| panic!("set cors failed: {e}"));

        let info = env
            .gateway
            .get_bucket_info(&bucket, &alice())
            .await
            .unwrap_or_else(|e| panic!("info failed: {e}"));
        assert_eq!(info.cors, rules);

        env.gateway
            .delete_bucket_cors(&bucket, &alice())
            .await
            .unwrap_or_else(|e| panic!("delete cors failed: {e}"));
        let info = env
            .gateway
            .get_bucket_info(&bucket, &alice())
            .await
            .unwrap_or_else(|e| panic!("info failed: {e}"));
        assert!(info.cors.is_empty());
    }

    #[tokio::test]
    async fn test_should_report_missing_bucket() {
        let env = TestEnv::new().await;
        let name = test_bucket_name("ghost");
        let err = env.gateway.get_bucket_info(&name, &alice()).await;
        assert!(matches!(err, Err(GatewayError::NoSuchBucket { .. })));
    }

    #[tokio::test]
    async fn test_should_account_usage_across_writes_and_deletes() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("usage").await;

        env.put(&bucket, "a", &[0u8; 300]).await;
        env.put(&bucket, "b", &[0u8; 700]).await;
        let usage = env
            .gateway
            .get_usage(&bucket)
            .await
            .unwrap_or_else(|e| panic!("usage failed: {e}"));
        assert_eq!(usage, 1000);

        env.gateway
            .delete_object(&bucket, "a", "", &alice())
            .await
            .unwrap_or_else(|e| panic!("delete failed: {e}"));
        let usage = env
            .gateway
            .get_usage(&bucket)
            .await
            .unwrap_or_else(|e| panic!("usage failed: {e}"));
        assert_eq!(usage, 700);
    }
}
