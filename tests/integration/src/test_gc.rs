//! Garbage-collection tests: reclamation after failed commits, after
//! deletes, and collector idempotence.

#[cfg(test)]
mod tests {
    use crate::{alice, TestEnv};
    use oxgate_core::GatewayError;
    use oxgate_meta::{KvStore, Table};
    use std::time::Duration;

    #[tokio::test]
    async fn test_should_reclaim_blob_after_failed_meta_commit() {
        let mut env = TestEnv::new().await;
        let bucket = env.create_bucket("fault").await;

        // The blob write succeeds, the object-row write does not.
        env.kv.fail_puts_on(Table::Objects);
        let err = env.put_with(&bucket, "k", b"doomed", Default::default()).await;
        assert!(matches!(err, Err(GatewayError::Internal(_))));
        env.kv.clear_faults();

        // The blob is present right after the failure, and no object row
        // references it.
        assert_eq!(env.store.blob_count(), 1);
        let rows = env
            .meta
            .scan_bucket_objects(&bucket, None, 10)
            .await
            .unwrap_or_else(|e| panic!("scan failed: {e}"));
        assert!(rows.is_empty());

        // One collector cycle reclaims it.
        let gc = env.start_gc();
        tokio::time::sleep(Duration::from_millis(300)).await;
        gc.shutdown().await;
        assert_eq!(env.store.blob_count(), 0, "orphan must be reclaimed");
    }

    #[tokio::test]
    async fn test_should_reclaim_blob_after_delete() {
        let mut env = TestEnv::new().await;
        let bucket = env.create_bucket("del").await;
        env.put(&bucket, "k", b"to be deleted").await;
        assert_eq!(env.store.blob_count(), 1);

        env.gateway
            .delete_object(&bucket, "k", "", &alice())
            .await
            .unwrap_or_else(|e| panic!("delete failed: {e}"));

        // Deletion is metadata-only; the record drives blob removal.
        let records = env
            .meta
            .scan_gc_records(10, None)
            .await
            .unwrap_or_else(|e| panic!("scan failed: {e}"));
        assert_eq!(records.len(), 1);
        assert_eq!(env.store.blob_count(), 1);

        let gc = env.start_gc();
        tokio::time::sleep(Duration::from_millis(300)).await;
        gc.shutdown().await;
        assert_eq!(env.store.blob_count(), 0);
        let records = env
            .meta
            .scan_gc_records(10, None)
            .await
            .unwrap_or_else(|e| panic!("scan failed: {e}"));
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_should_reach_same_state_when_run_twice() {
        let mut env = TestEnv::new().await;
        let bucket = env.create_bucket("idem").await;
        for i in 0..5 {
            env.put(&bucket, &format!("k-{i}"), &[i as u8; 100]).await;
            env.gateway
                .delete_object(&bucket, &format!("k-{i}"), "", &alice())
                .await
                .unwrap_or_else(|e| panic!("delete failed: {e}"));
        }

        let gc = env.start_gc();
        tokio::time::sleep(Duration::from_millis(400)).await;
        gc.shutdown().await;
        assert_eq!(env.store.blob_count(), 0);
        let after_first = env
            .meta
            .scan_gc_records(100, None)
            .await
            .unwrap_or_else(|e| panic!("scan failed: {e}"));
        assert!(after_first.is_empty());

        // A second collector over the same table changes nothing.
        let tuning = oxgate_core::GcTuning {
            idle_pause: Duration::from_millis(20),
            sweep_pause: Duration::from_millis(20),
            backpressure_pause: Duration::from_millis(1),
            record_retry_pause: Duration::from_millis(20),
        };
        let (_tx, rx) = tokio::sync::mpsc::channel(8);
        let mut clusters = std::collections::HashMap::new();
        clusters.insert(
            crate::TEST_FSID.to_owned(),
            env.store.clone() as std::sync::Arc<dyn oxgate_blob::BlobBackend>,
        );
        let gc = oxgate_core::GcPool::start(env.meta.clone(), vec![clusters], rx, tuning);
        tokio::time::sleep(Duration::from_millis(200)).await;
        gc.shutdown().await;

        assert_eq!(env.store.blob_count(), 0);
        let after_second = env
            .meta
            .scan_gc_records(100, None)
            .await
            .unwrap_or_else(|e| panic!("scan failed: {e}"));
        assert!(after_second.is_empty());
    }

    #[tokio::test]
    async fn test_should_complete_record_whose_blob_is_already_gone() {
        let mut env = TestEnv::new().await;
        let bucket = env.create_bucket("gone").await;
        env.put(&bucket, "k", b"x").await;
        env.gateway
            .delete_object(&bucket, "k", "", &alice())
            .await
            .unwrap_or_else(|e| panic!("delete failed: {e}"));

        // Remove the blob behind the collector's back.
        let records = env
            .meta
            .scan_gc_records(10, None)
            .await
            .unwrap_or_else(|e| panic!("scan failed: {e}"));
        assert_eq!(records.len(), 1);
        use oxgate_blob::BlobBackend;
        env.store
            .remove(&records[0].pool, &records[0].object_id)
            .await
            .unwrap_or_else(|e| panic!("manual remove failed: {e}"));

        // The record still completes.
        let gc = env.start_gc();
        tokio::time::sleep(Duration::from_millis(300)).await;
        gc.shutdown().await;
        let records = env
            .meta
            .scan_gc_records(10, None)
            .await
            .unwrap_or_else(|e| panic!("scan failed: {e}"));
        assert!(records.is_empty(), "missing blob still completes the record");
    }

    #[tokio::test]
    async fn test_should_keep_blob_when_rollback_restores_row() {
        let env = TestEnv::new().await;
        let bucket = env.create_bucket("rollback").await;
        env.put(&bucket, "k", b"keep me").await;

        // Deleting with a dead garbage-collection table restores the row.
        env.kv.fail_puts_on(Table::GarbageCollection);
        let err = env.gateway.delete_object(&bucket, "k", "", &alice()).await;
        assert!(matches!(err, Err(GatewayError::Internal(_))));
        env.kv.clear_faults();

        // The object is still fully readable and no record leaked.
        let body = env
            .get_bytes(&bucket, "k", "")
            .await
            .unwrap_or_else(|e| panic!("get failed: {e}"));
        assert_eq!(body, b"keep me");
        let rows = env
            .kv
            .scan(Table::GarbageCollection, &[], &[], 10)
            .await
            .unwrap_or_else(|e| panic!("scan failed: {e}"));
        assert!(rows.is_empty());
    }
}
