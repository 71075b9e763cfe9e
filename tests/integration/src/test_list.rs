//! Listing tests: ordering, prefixes, delimiters, truncation and upload
//! listings.

#[cfg(test)]
mod tests {
    use crate::{alice, TestEnv};
    use oxgate_core::{GatewayError, SseRequest};

    async fn seed_keys(env: &TestEnv, bucket: &str, keys: &[&str]) {
        for key in keys {
            env.put(bucket, key, b"x").await;
        }
    }

    #[tokio::test]
    async fn test_should_list_keys_in_ascending_order() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("sort").await;
        // Insert out of order, mixing delimiter depths.
        seed_keys(&env, &bucket, &["b", "a/x", "c", "a/y", "a"]).await;

        let result = env
            .gateway
            .list_objects(&bucket, "", "", "", 100, &alice())
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        let keys: Vec<&str> = result.objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(keys, vec!["a", "a/x", "a/y", "b", "c"]);
        assert!(!result.is_truncated);
        assert!(result.common_prefixes.is_empty());
    }

    #[tokio::test]
    async fn test_should_collapse_common_prefixes() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("delim").await;
        seed_keys(
            &env,
            &bucket,
            &[
                "photos/2023/jan.jpg",
                "photos/2023/feb.jpg",
                "photos/2024/mar.jpg",
                "docs/readme.txt",
                "root.txt",
            ],
        )
        .await;

        let result = env
            .gateway
            .list_objects(&bucket, "", "/", "", 100, &alice())
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        let keys: Vec<&str> = result.objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(keys, vec!["root.txt"]);
        assert_eq!(
            result.common_prefixes,
            vec!["docs/".to_owned(), "photos/".to_owned()]
        );

        let result = env
            .gateway
            .list_objects(&bucket, "photos/", "/", "", 100, &alice())
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        assert!(result.objects.is_empty());
        assert_eq!(
            result.common_prefixes,
            vec!["photos/2023/".to_owned(), "photos/2024/".to_owned()]
        );

        let result = env
            .gateway
            .list_objects(&bucket, "photos/2023/", "/", "", 100, &alice())
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        let keys: Vec<&str> = result.objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(keys, vec!["photos/2023/feb.jpg", "photos/2023/jan.jpg"]);
    }

    #[tokio::test]
    async fn test_should_truncate_and_resume_with_marker() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("page").await;
        let keys: Vec<String> = (0..10).map(|i| format!("key-{i:02}")).collect();
        for key in &keys {
            env.put(&bucket, key, b"x").await;
        }

        let mut seen = Vec::new();
        let mut marker = String::new();
        loop {
            let page = env
                .gateway
                .list_objects(&bucket, "", "", &marker, 3, &alice())
                .await
                .unwrap_or_else(|e| panic!("list failed: {e}"));
            for object in &page.objects {
                seen.push(object.name.clone());
            }
            if !page.is_truncated {
                break;
            }
            marker = page
                .next_marker
                .unwrap_or_else(|| panic!("truncated page must carry a marker"));
        }
        assert_eq!(seen, keys);
    }

    #[tokio::test]
    async fn test_should_list_v2_with_continuation_and_start_after() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("v2").await;
        seed_keys(&env, &bucket, &["a", "b", "c", "d"]).await;

        let first = env
            .gateway
            .list_objects_v2(&bucket, "", "", "", "", 2, &alice())
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        assert!(first.is_truncated);
        let token = first
            .next_marker
            .unwrap_or_else(|| panic!("token missing"));

        let second = env
            .gateway
            .list_objects_v2(&bucket, "", "", &token, "", 10, &alice())
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        let keys: Vec<&str> = second.objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(keys, vec!["c", "d"]);

        let after = env
            .gateway
            .list_objects_v2(&bucket, "", "", "", "b", 10, &alice())
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        let keys: Vec<&str> = after.objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(keys, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn test_should_reject_unsupported_delimiter() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("baddelim").await;
        let err = env
            .gateway
            .list_objects(&bucket, "", "|", "", 10, &alice())
            .await;
        assert!(matches!(err, Err(GatewayError::NotImplemented)));
    }

    #[tokio::test]
    async fn test_should_hide_deleted_keys_from_listing() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("dellist").await;
        seed_keys(&env, &bucket, &["exists", "missing"]).await;

        // Multi-delete of one present and one already-absent key both
        // succeed, and neither shows up afterwards.
        for key in ["exists", "missing"] {
            env.gateway
                .delete_object(&bucket, key, "", &alice())
                .await
                .unwrap_or_else(|e| panic!("delete {key} failed: {e}"));
        }
        env.gateway
            .delete_object(&bucket, "never-there", "", &alice())
            .await
            .unwrap_or_else(|e| panic!("delete of absent key failed: {e}"));

        let result = env
            .gateway
            .list_objects(&bucket, "", "", "", 100, &alice())
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        assert!(result.objects.is_empty());
    }

    #[tokio::test]
    async fn test_should_list_multipart_uploads_with_prefix_and_pagination() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("uploads").await;

        let mut ids = Vec::new();
        for key in ["logs/a", "logs/b", "data/c"] {
            let id = env
                .gateway
                .new_multipart_upload(
                    &bucket,
                    key,
                    &alice(),
                    None,
                    Default::default(),
                    Default::default(),
                    &SseRequest::none(),
                )
                .await
                .unwrap_or_else(|e| panic!("initiate failed: {e}"));
            ids.push((key, id));
        }

        let result = env
            .gateway
            .list_multipart_uploads(&bucket, "logs/", "", "", "", 100, &alice())
            .await
            .unwrap_or_else(|e| panic!("list uploads failed: {e}"));
        let keys: Vec<&str> = result
            .uploads
            .iter()
            .map(|u| u.object_name.as_str())
            .collect();
        assert_eq!(keys, vec!["logs/a", "logs/b"]);

        // Page of one, resumed by the returned markers.
        let first = env
            .gateway
            .list_multipart_uploads(&bucket, "", "", "", "", 1, &alice())
            .await
            .unwrap_or_else(|e| panic!("list uploads failed: {e}"));
        assert!(first.is_truncated);
        let key_marker = first
            .next_key_marker
            .unwrap_or_else(|| panic!("key marker missing"));
        let id_marker = first
            .next_upload_id_marker
            .unwrap_or_else(|| panic!("id marker missing"));

        let rest = env
            .gateway
            .list_multipart_uploads(&bucket, "", "", &key_marker, &id_marker, 100, &alice())
            .await
            .unwrap_or_else(|e| panic!("list uploads failed: {e}"));
        assert_eq!(rest.uploads.len() + first.uploads.len(), 3);

        // Delimiter collapses upload keys like object keys.
        let grouped = env
            .gateway
            .list_multipart_uploads(&bucket, "", "/", "", "", 100, &alice())
            .await
            .unwrap_or_else(|e| panic!("list uploads failed: {e}"));
        assert!(grouped.uploads.is_empty());
        assert_eq!(
            grouped.common_prefixes,
            vec!["data/".to_owned(), "logs/".to_owned()]
        );
    }

    #[tokio::test]
    async fn test_should_show_only_newest_version_per_key() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("newest").await;
        env.gateway
            .set_bucket_versioning(
                &bucket,
                oxgate_meta::VersioningStatus::Enabled,
                &alice(),
            )
            .await
            .unwrap_or_else(|e| panic!("versioning failed: {e}"));

        env.put(&bucket, "k", b"old").await;
        env.put(&bucket, "k", b"new").await;

        let result = env
            .gateway
            .list_objects(&bucket, "", "", "", 100, &alice())
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        assert_eq!(result.objects.len(), 1, "one entry per key");
        assert_eq!(result.objects[0].size, 3);

        let versions = env
            .gateway
            .list_object_versions(&bucket, "", "", "", "", 100, &alice())
            .await
            .unwrap_or_else(|e| panic!("list versions failed: {e}"));
        assert_eq!(versions.versions.len(), 2, "history stays listable");
    }
}
