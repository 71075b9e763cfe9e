//! Versioning tests: version stacks, delete markers, null-version
//! semantics and the delete table.

#[cfg(test)]
mod tests {
    use crate::{alice, TestEnv};
    use oxgate_core::GatewayError;
    use oxgate_meta::{KvStore, Table, VersioningStatus};

    async fn enable_versioning(env: &TestEnv, bucket: &str) {
        env.gateway
            .set_bucket_versioning(bucket, VersioningStatus::Enabled, &alice())
            .await
            .unwrap_or_else(|e| panic!("enable versioning failed: {e}"));
    }

    async fn suspend_versioning(env: &TestEnv, bucket: &str) {
        env.gateway
            .set_bucket_versioning(bucket, VersioningStatus::Suspended, &alice())
            .await
            .unwrap_or_else(|e| panic!("suspend versioning failed: {e}"));
    }

    #[tokio::test]
    async fn test_should_stack_versions_under_enabled() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("ver").await;
        enable_versioning(&env, &bucket).await;

        let mut version_ids = Vec::new();
        for body in [b"v1".as_slice(), b"v2", b"v3"] {
            let result = env.put(&bucket, "k", body).await;
            let version = result
                .version_id
                .unwrap_or_else(|| panic!("versioned put must return a version id"));
            version_ids.push(version);
        }
        assert_eq!(version_ids.len(), 3);

        // Current version is the last write.
        let current = env
            .get_bytes(&bucket, "k", "")
            .await
            .unwrap_or_else(|e| panic!("get failed: {e}"));
        assert_eq!(current, b"v3");

        // Every version stays readable by id.
        for (version, expected) in version_ids.iter().zip([b"v1".as_slice(), b"v2", b"v3"]) {
            let body = env
                .get_bytes(&bucket, "k", version)
                .await
                .unwrap_or_else(|e| panic!("get version failed: {e}"));
            assert_eq!(body, expected);
        }
    }

    #[tokio::test]
    async fn test_should_hide_key_behind_delete_marker() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("marker").await;
        enable_versioning(&env, &bucket).await;

        let put = env.put(&bucket, "k", b"v1").await;
        let v1 = put
            .version_id
            .unwrap_or_else(|| panic!("version id missing"));

        let deletion = env
            .gateway
            .delete_object(&bucket, "k", "", &alice())
            .await
            .unwrap_or_else(|e| panic!("delete failed: {e}"));
        assert!(deletion.delete_marker);
        let marker_version = deletion
            .version_id
            .unwrap_or_else(|| panic!("marker version missing"));
        assert_ne!(marker_version, v1);

        // Unversioned GET sees nothing.
        let err = env.info(&bucket, "k", "").await;
        assert!(matches!(err, Err(GatewayError::NoSuchKey { .. })));

        // The old version is still there.
        let body = env
            .get_bytes(&bucket, "k", &v1)
            .await
            .unwrap_or_else(|e| panic!("get version failed: {e}"));
        assert_eq!(body, b"v1");

        // The listing sees the object and the marker.
        let versions = env
            .gateway
            .list_object_versions(&bucket, "", "", "", "", 100, &alice())
            .await
            .unwrap_or_else(|e| panic!("list versions failed: {e}"));
        assert_eq!(versions.versions.len(), 2);
        let markers = versions
            .versions
            .iter()
            .filter(|entry| entry.object.delete_marker)
            .count();
        assert_eq!(markers, 1);
        let latest = versions
            .versions
            .iter()
            .find(|entry| entry.is_latest)
            .unwrap_or_else(|| panic!("latest entry missing"));
        assert!(latest.object.delete_marker, "marker must top the stack");
    }

    #[tokio::test]
    async fn test_should_reject_version_id_when_disabled() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("dis").await;
        env.put(&bucket, "k", b"data").await;

        let err = env
            .gateway
            .delete_object(&bucket, "k", "some-version", &alice())
            .await;
        assert!(matches!(err, Err(GatewayError::NoSuchVersion { .. })));
    }

    #[tokio::test]
    async fn test_should_treat_delete_of_missing_key_as_success() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("noop").await;

        let result = env
            .gateway
            .delete_object(&bucket, "never-existed", "", &alice())
            .await
            .unwrap_or_else(|e| panic!("delete failed: {e}"));
        assert!(!result.delete_marker);
    }

    #[tokio::test]
    async fn test_should_delete_concrete_version() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("delver").await;
        enable_versioning(&env, &bucket).await;

        let v1 = env
            .put(&bucket, "k", b"v1")
            .await
            .version_id
            .unwrap_or_else(|| panic!("version id missing"));
        let v2 = env
            .put(&bucket, "k", b"v2")
            .await
            .version_id
            .unwrap_or_else(|| panic!("version id missing"));

        env.gateway
            .delete_object(&bucket, "k", &v2, &alice())
            .await
            .unwrap_or_else(|e| panic!("delete failed: {e}"));

        // v1 becomes the current version again.
        let current = env
            .get_bytes(&bucket, "k", "")
            .await
            .unwrap_or_else(|e| panic!("get failed: {e}"));
        assert_eq!(current, b"v1");
        let err = env.get_bytes(&bucket, "k", &v2).await;
        assert!(matches!(err, Err(GatewayError::NoSuchVersion { .. })));
        let _ = v1;
    }

    #[tokio::test]
    async fn test_should_keep_single_null_version_with_pointer() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("null").await;

        // Repeated unversioned puts keep exactly one row and one pointer.
        env.put(&bucket, "k", b"one").await;
        env.put(&bucket, "k", b"two").await;
        env.put(&bucket, "k", b"three").await;

        let objects = env
            .meta
            .scan_bucket_objects(&bucket, None, 100)
            .await
            .unwrap_or_else(|e| panic!("scan failed: {e}"));
        let null_rows = objects.iter().filter(|o| o.null_version).count();
        assert_eq!(objects.len(), 1, "old null versions must be removed");
        assert_eq!(null_rows, 1);

        let objmap = env
            .meta
            .get_objmap(&bucket, "k")
            .await
            .unwrap_or_else(|e| panic!("pointer missing: {e}"));
        assert_eq!(objmap.null_ver_num, objects[0].ts_nanos());
    }

    #[tokio::test]
    async fn test_should_access_null_version_by_id() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("nullget").await;
        env.put(&bucket, "k", b"null-body").await;
        enable_versioning(&env, &bucket).await;
        env.put(&bucket, "k", b"versioned-body").await;

        // The pre-versioning write answers to versionId=null.
        let body = env
            .get_bytes(&bucket, "k", "null")
            .await
            .unwrap_or_else(|e| panic!("get null version failed: {e}"));
        assert_eq!(body, b"null-body");

        // Deleting the null version removes the row and the pointer.
        env.gateway
            .delete_object(&bucket, "k", "null", &alice())
            .await
            .unwrap_or_else(|e| panic!("delete failed: {e}"));
        let err = env.get_bytes(&bucket, "k", "null").await;
        assert!(matches!(err, Err(GatewayError::NoSuchVersion { .. })));

        // The versioned write is untouched.
        let body = env
            .get_bytes(&bucket, "k", "")
            .await
            .unwrap_or_else(|e| panic!("get failed: {e}"));
        assert_eq!(body, b"versioned-body");
    }

    #[tokio::test]
    async fn test_should_replace_null_version_under_suspended() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("susp").await;
        enable_versioning(&env, &bucket).await;
        let kept = env
            .put(&bucket, "k", b"kept-history")
            .await
            .version_id
            .unwrap_or_else(|| panic!("version id missing"));

        suspend_versioning(&env, &bucket).await;
        env.put(&bucket, "k", b"null-a").await;
        env.put(&bucket, "k", b"null-b").await;

        // History survives; the null slot holds only the latest write.
        let body = env
            .get_bytes(&bucket, "k", &kept)
            .await
            .unwrap_or_else(|e| panic!("get history failed: {e}"));
        assert_eq!(body, b"kept-history");
        let null_body = env
            .get_bytes(&bucket, "k", "null")
            .await
            .unwrap_or_else(|e| panic!("get null failed: {e}"));
        assert_eq!(null_body, b"null-b");

        let objects = env
            .meta
            .scan_bucket_objects(&bucket, None, 100)
            .await
            .unwrap_or_else(|e| panic!("scan failed: {e}"));
        assert_eq!(
            objects.iter().filter(|o| o.null_version).count(),
            1,
            "at most one null version per key"
        );
    }

    #[tokio::test]
    async fn test_should_insert_null_delete_marker_under_suspended() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("suspdel").await;
        env.put(&bucket, "k", b"data").await;
        suspend_versioning(&env, &bucket).await;

        let result = env
            .gateway
            .delete_object(&bucket, "k", "", &alice())
            .await
            .unwrap_or_else(|e| panic!("delete failed: {e}"));
        assert!(result.delete_marker);
        assert_eq!(result.version_id.as_deref(), Some("null"));

        // The marker replaced the null version; the pointer follows it.
        let objects = env
            .meta
            .scan_bucket_objects(&bucket, None, 100)
            .await
            .unwrap_or_else(|e| panic!("scan failed: {e}"));
        assert_eq!(objects.len(), 1);
        assert!(objects[0].delete_marker);
        assert!(objects[0].null_version);
        let objmap = env
            .meta
            .get_objmap(&bucket, "k")
            .await
            .unwrap_or_else(|e| panic!("pointer missing: {e}"));
        assert_eq!(objmap.null_ver_num, objects[0].ts_nanos());

        // The replaced body is in the reclamation table.
        let kv_rows = env.kv.scan(Table::GarbageCollection, &[], &[], 10).await;
        let rows = kv_rows.unwrap_or_else(|e| panic!("scan failed: {e}"));
        assert_eq!(rows.len(), 1);
    }
}
