//! Garbage collection: reclaiming orphan blobs recorded in the
//! garbage-collection table.
//!
//! One scanner task walks the table in batches and feeds a bounded queue;
//! it only refills while the queue sits below a low watermark, so a slow
//! backend applies backpressure to scanning instead of ballooning the
//! queue. Worker tasks consume records and remove blobs, each through its
//! own backend handles to avoid head-of-line blocking. A drain task turns
//! [`RecycleEntry`] messages from the write paths into table rows.
//!
//! Shutdown is orderly: the scanner stops feeding, workers finish the
//! queued records, and no in-flight removal is interrupted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use oxgate_blob::BlobError;
use oxgate_meta::{GcRecord, Meta};

use crate::gateway::{ClusterMap, RecycleEntry};

/// Rows fetched per garbage-collection table scan.
pub const SCAN_BATCH_LIMIT: usize = 50;

/// Queue length below which the scanner fetches more rows.
pub const WATER_LOW: usize = 120;

/// Capacity of the scanner-to-worker queue.
pub const TASKQ_MAX_LENGTH: usize = 200;

/// Attempts to record one recycle entry before giving up.
const RECORD_ATTEMPTS: u32 = 3;

/// Timing knobs of the collector. The defaults suit production; tests
/// shrink them.
#[derive(Debug, Clone)]
pub struct GcTuning {
    /// Pause after a full sweep found nothing.
    pub idle_pause: Duration,
    /// Pause after draining the final row of a sweep.
    pub sweep_pause: Duration,
    /// Pause while the queue sits above the low watermark.
    pub backpressure_pause: Duration,
    /// Pause between attempts to record a recycle entry.
    pub record_retry_pause: Duration,
}

impl Default for GcTuning {
    fn default() -> Self {
        Self {
            idle_pause: Duration::from_secs(10),
            sweep_pause: Duration::from_secs(5),
            backpressure_pause: Duration::from_millis(1),
            record_retry_pause: Duration::from_secs(1),
        }
    }
}

/// Handle of a running collector.
pub struct GcPool {
    stop_tx: watch::Sender<bool>,
    scanner: JoinHandle<()>,
    drain: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl GcPool {
    /// Start the collector: one scanner, one recycle drain and one worker
    /// per entry of `worker_backends`. Each worker owns its backend
    /// handles.
    #[must_use]
    pub fn start(
        meta: Arc<Meta>,
        worker_backends: Vec<ClusterMap>,
        recycle_rx: mpsc::Receiver<RecycleEntry>,
        tuning: GcTuning,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (task_tx, task_rx) = mpsc::channel::<GcRecord>(TASKQ_MAX_LENGTH);
        let task_rx = Arc::new(Mutex::new(task_rx));

        let worker_count = worker_backends.len();
        let mut workers = Vec::with_capacity(worker_count);
        for (index, backends) in worker_backends.into_iter().enumerate() {
            workers.push(tokio::spawn(worker_loop(
                index,
                Arc::clone(&meta),
                backends,
                Arc::clone(&task_rx),
            )));
        }

        let scanner = tokio::spawn(scanner_loop(
            Arc::clone(&meta),
            task_tx,
            stop_rx.clone(),
            tuning.clone(),
        ));
        let drain = tokio::spawn(recycle_drain_loop(meta, recycle_rx, stop_rx, tuning));

        info!(workers = worker_count, "garbage collector started");
        Self {
            stop_tx,
            scanner,
            drain,
            workers,
        }
    }

    /// Stop the collector: the scanner exits at its next check, workers
    /// drain the queue, and queued recycle entries are flushed to the
    /// table.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        // Scanner first; dropping its sender closes the worker queue.
        let _ = self.scanner.await;
        let _ = self.drain.await;
        for worker in self.workers {
            let _ = worker.await;
        }
        info!("garbage collector stopped");
    }
}

/// Wait for `pause` or a stop signal, whichever comes first.
async fn pause_or_stop(stop_rx: &mut watch::Receiver<bool>, pause: Duration) {
    tokio::select! {
        () = tokio::time::sleep(pause) => {}
        _ = stop_rx.changed() => {}
    }
}

/// Walk the garbage-collection table and feed the worker queue.
async fn scanner_loop(
    meta: Arc<Meta>,
    task_tx: mpsc::Sender<GcRecord>,
    mut stop_rx: watch::Receiver<bool>,
    tuning: GcTuning,
) {
    let mut start_after: Option<Vec<u8>> = None;
    loop {
        if *stop_rx.borrow() {
            return;
        }

        // Low-watermark backpressure: refill only when the queue has
        // drained far enough.
        let queue_len = TASKQ_MAX_LENGTH - task_tx.capacity();
        if queue_len >= WATER_LOW {
            pause_or_stop(&mut stop_rx, tuning.backpressure_pause).await;
            continue;
        }

        let batch = match meta
            .scan_gc_records(SCAN_BATCH_LIMIT, start_after.as_deref())
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "garbage collection scan failed");
                pause_or_stop(&mut stop_rx, tuning.record_retry_pause).await;
                continue;
            }
        };

        if batch.is_empty() {
            // Sweep done; start over after a breather.
            start_after = None;
            pause_or_stop(&mut stop_rx, tuning.idle_pause).await;
            continue;
        }

        let sweep_exhausted = batch.len() < SCAN_BATCH_LIMIT;
        start_after = batch.last().map(GcRecord::rowkey);
        for record in batch {
            if task_tx.send(record).await.is_err() {
                return;
            }
        }
        if sweep_exhausted {
            start_after = None;
            pause_or_stop(&mut stop_rx, tuning.sweep_pause).await;
        }
    }
}

/// Consume orphan records and remove their blobs.
async fn worker_loop(
    index: usize,
    meta: Arc<Meta>,
    backends: ClusterMap,
    task_rx: Arc<Mutex<mpsc::Receiver<GcRecord>>>,
) {
    loop {
        let record = { task_rx.lock().await.recv().await };
        let Some(record) = record else {
            debug!(worker = index, "worker queue closed, exiting");
            return;
        };
        collect_record(&meta, &backends, record, index).await;
    }
}

/// Remove every blob a record names, then the record itself. A blob that
/// is already gone counts as removed; any other failure keeps the record
/// for the next sweep with its try counter bumped.
async fn collect_record(meta: &Meta, backends: &ClusterMap, mut record: GcRecord, worker: usize) {
    let mut targets: Vec<(String, String, String)> = Vec::new();
    if record.parts.is_empty() {
        if !record.object_id.is_empty() {
            targets.push((
                record.location.clone(),
                record.pool.clone(),
                record.object_id.clone(),
            ));
        }
    } else {
        for part in record.parts.values() {
            let location = if part.location.is_empty() {
                record.location.clone()
            } else {
                part.location.clone()
            };
            let pool = if part.pool.is_empty() {
                record.pool.clone()
            } else {
                part.pool.clone()
            };
            targets.push((location, pool, part.object_id.clone()));
        }
    }

    let mut all_removed = true;
    for (location, pool, blob_id) in targets {
        let Some(backend) = backends.get(&location) else {
            warn!(worker, location, pool, blob_id, "unknown cluster for orphan blob");
            all_removed = false;
            continue;
        };
        match backend.remove(&pool, &blob_id).await {
            Ok(()) | Err(BlobError::NotFound { .. }) => {
                debug!(
                    worker,
                    bucket = record.bucket_name,
                    key = record.object_name,
                    location,
                    pool,
                    blob_id,
                    "orphan blob removed"
                );
            }
            Err(e) => {
                warn!(
                    worker,
                    location,
                    pool,
                    blob_id,
                    error = %e,
                    "cannot remove orphan blob"
                );
                all_removed = false;
            }
        }
    }

    if all_removed {
        if let Err(e) = meta.remove_gc_record(&record).await {
            warn!(worker, error = %e, "cannot remove reclaimed record");
        }
    } else {
        record.tries += 1;
        if let Err(e) = meta.put_gc_record(&record).await {
            warn!(worker, error = %e, "cannot update try counter");
        }
    }
}

/// Turn recycle entries from the write paths into table rows.
async fn recycle_drain_loop(
    meta: Arc<Meta>,
    mut recycle_rx: mpsc::Receiver<RecycleEntry>,
    mut stop_rx: watch::Receiver<bool>,
    tuning: GcTuning,
) {
    loop {
        let entry = tokio::select! {
            entry = recycle_rx.recv() => entry,
            _ = stop_rx.changed() => {
                // Flush whatever is already queued, then exit.
                while let Ok(entry) = recycle_rx.try_recv() {
                    record_entry(&meta, entry, &tuning).await;
                }
                return;
            }
        };
        let Some(entry) = entry else { return };
        record_entry(&meta, entry, &tuning).await;
    }
}

async fn record_entry(meta: &Meta, entry: RecycleEntry, tuning: &GcTuning) {
    let record = GcRecord::single(
        &entry.bucket,
        &entry.key,
        &entry.location,
        &entry.pool,
        &entry.object_id,
        Utc::now(),
    );
    for attempt in 1..=RECORD_ATTEMPTS {
        match meta.put_gc_record(&record).await {
            Ok(()) => return,
            Err(e) if attempt < RECORD_ATTEMPTS => {
                warn!(attempt, error = %e, "cannot record orphan, retrying");
                tokio::time::sleep(tuning.record_retry_pause).await;
            }
            Err(e) => {
                warn!(
                    blob_id = entry.object_id,
                    error = %e,
                    "orphan blob not recorded, it will leak until operator action"
                );
            }
        }
    }
}
