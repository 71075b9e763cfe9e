//! Cache coherence tests across two gateways sharing the store and the
//! shared cache tier.

#[cfg(test)]
mod tests {
    use crate::{alice, TestEnv};
    use oxgate_core::GatewayError;
    use std::time::Duration;

    #[tokio::test]
    async fn test_should_see_own_writes_immediately() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("own").await;

        env.put(&bucket, "k", b"v1").await;
        let body = env
            .get_bytes(&bucket, "k", "")
            .await
            .unwrap_or_else(|e| panic!("get failed: {e}"));
        assert_eq!(body, b"v1");

        // Overwrite and read again on the same gateway; no stale value.
        env.put(&bucket, "k", b"v2").await;
        let body = env
            .get_bytes(&bucket, "k", "")
            .await
            .unwrap_or_else(|e| panic!("get failed: {e}"));
        assert_eq!(body, b"v2");
    }

    #[tokio::test]
    async fn test_should_propagate_overwrite_to_second_gateway() {
        let env = TestEnv::new().await;
        let gateway_b = env.second_gateway();
        let bucket = env.create_bucket("fleet").await;

        env.put(&bucket, "k", b"v1").await;

        // Gateway B reads and caches the first version.
        let object = gateway_b
            .get_object_info(&bucket, "k", "", &alice())
            .await
            .unwrap_or_else(|e| panic!("info failed: {e}"));
        assert_eq!(object.size, 2);

        // Gateway A overwrites; the invalidation crosses the shared bus.
        env.put(&bucket, "k", b"longer body").await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let object = gateway_b
            .get_object_info(&bucket, "k", "", &alice())
            .await
            .unwrap_or_else(|e| panic!("info failed: {e}"));
        assert_eq!(object.size, 11, "second gateway must see the new version");
    }

    #[tokio::test]
    async fn test_should_propagate_delete_to_second_gateway() {
        let env = TestEnv::new().await;
        let gateway_b = env.second_gateway();
        let bucket = env.create_bucket("fleetdel").await;

        env.put(&bucket, "k", b"data").await;
        let cached = gateway_b
            .get_object_info(&bucket, "k", "", &alice())
            .await;
        assert!(cached.is_ok());

        env.gateway
            .delete_object(&bucket, "k", "", &alice())
            .await
            .unwrap_or_else(|e| panic!("delete failed: {e}"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = gateway_b.get_object_info(&bucket, "k", "", &alice()).await;
        assert!(matches!(err, Err(GatewayError::NoSuchKey { .. })));
    }

    #[tokio::test]
    async fn test_should_propagate_bucket_changes() {
        let env = TestEnv::new().await;
        let gateway_b = env.second_gateway();
        let bucket = env.create_bucket("fleetver").await;

        // Warm B's cache with the pre-change bucket.
        let info = gateway_b
            .get_bucket_info(&bucket, &alice())
            .await
            .unwrap_or_else(|e| panic!("info failed: {e}"));
        assert_eq!(info.versioning, oxgate_meta::VersioningStatus::Disabled);

        env.gateway
            .set_bucket_versioning(&bucket, oxgate_meta::VersioningStatus::Enabled, &alice())
            .await
            .unwrap_or_else(|e| panic!("set versioning failed: {e}"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let info = gateway_b
            .get_bucket_info(&bucket, &alice())
            .await
            .unwrap_or_else(|e| panic!("info failed: {e}"));
        assert_eq!(info.versioning, oxgate_meta::VersioningStatus::Enabled);
    }
}
