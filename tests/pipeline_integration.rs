//! End-to-end ingestion tests.
//!
//! Runs the real directory watcher, workers and stores against a temporary
//! directory and checks what lands in the cache, the document store and the
//! quarantine directory.

use std::path::Path;
use std::time::Duration;

use brewlog::ingest::scan_dir;
use brewlog::storage::{CACHE_KEY_PREFIX, FindWindow, ReportFilter};
use brewlog::{
    HistoricalQuery, HistoricalQueryService, IngestConfig, IngestHandle, IngestPipeline,
    IngestService, QueryConfig, RealtimeQueryService, StorageBuilder, StorageHandles,
};
use serde_json::json;
use tempfile::{TempDir, tempdir};

// =============================================================================
// Test Helpers
// =============================================================================

struct Harness {
    dir: TempDir,
    storage: StorageHandles,
    ingest: IngestHandle,
}

async fn start() -> Harness {
    let dir = tempdir().unwrap();
    let storage = StorageBuilder::new("sqlite::memory:").build().await.unwrap();

    let config = IngestConfig::new(dir.path()).with_retry_interval(Duration::from_millis(200));
    let pipeline = IngestPipeline::new(
        storage.cache.clone(),
        storage.reports.clone(),
        config.quarantine_dir(),
    )
    .with_max_attempts(3);
    let ingest = IngestService::new(config, pipeline).start().await.unwrap();

    Harness {
        dir,
        storage,
        ingest,
    }
}

fn report(minute: u32, batch: &str) -> Vec<u8> {
    serde_json::to_vec_pretty(&json!({
        "timestamp": format!("2024-05-01T10:{minute:02}:00+00:00"),
        "batch_id": batch,
        "temperature_celsius": 19.5,
        "pressure_psi": 14.9,
        "co2_vol": 2.45,
        "sensor_id": "fv-02"
    }))
    .unwrap()
}

/// Write via a temporary name and rename into place, like a well-behaved producer.
async fn drop_file(dir: &Path, name: &str, content: &[u8]) {
    let tmp = dir.join(format!(".{name}.partial"));
    tokio::fs::write(&tmp, content).await.unwrap();
    tokio::fs::rename(&tmp, dir.join(name)).await.unwrap();
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn document_count(storage: &StorageHandles) -> u64 {
    storage
        .reports
        .count(&ReportFilter::default())
        .await
        .unwrap()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_good_file_committed_end_to_end() {
    let h = start().await;
    drop_file(h.dir.path(), "report_a.json", &report(5, "B001-LAGER")).await;

    eventually("document", || async { document_count(&h.storage).await == 1 }).await;
    eventually("file removal", || async {
        !h.dir.path().join("report_a.json").exists()
    })
    .await;

    let keys = h.storage.cache.scan(CACHE_KEY_PREFIX).await.unwrap();
    assert_eq!(keys, vec!["sensor_data:2024-05-01T10:05:00.000000Z".to_string()]);

    let docs = h
        .storage
        .reports
        .find(&ReportFilter::default(), FindWindow::all())
        .await
        .unwrap();
    assert_eq!(docs[0].report.batch_id, "B001-LAGER");
    assert_eq!(docs[0].report.extra["sensor_id"], "fv-02");

    let realtime = RealtimeQueryService::new(h.storage.cache.clone(), &QueryConfig::default());
    let latest = realtime.latest().await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0], docs[0].report);

    assert_eq!(h.ingest.stats().snapshot().processed, 1);
    h.ingest.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_malformed_file_quarantined_without_writes() {
    let h = start().await;
    drop_file(h.dir.path(), "broken.json", b"{\"timestamp\": 12, }").await;
    drop_file(
        h.dir.path(),
        "naive.json",
        br#"{"timestamp": "2024-05-01T10:00:00", "batch_id": "B1",
            "temperature_celsius": 1, "pressure_psi": 1, "co2_vol": 1}"#,
    )
    .await;

    let quarantine = h.dir.path().join("quarantine");
    eventually("quarantine", || async {
        quarantine.join("broken.json").exists() && quarantine.join("naive.json").exists()
    })
    .await;

    assert!(quarantine.join("broken.json.error").exists());
    let reason = tokio::fs::read_to_string(quarantine.join("naive.json.error"))
        .await
        .unwrap();
    assert!(reason.contains("missing timezone offset"));

    assert!(scan_dir(h.dir.path(), "json").await.unwrap().is_empty());
    assert_eq!(document_count(&h.storage).await, 0);
    assert!(h.storage.cache.scan(CACHE_KEY_PREFIX).await.unwrap().is_empty());
    assert_eq!(h.ingest.stats().snapshot().quarantined, 2);
    h.ingest.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_arrivals_all_committed() {
    let h = start().await;
    const N: u32 = 40;

    let writers: Vec<_> = (0..N)
        .map(|i| {
            let dir = h.dir.path().to_path_buf();
            tokio::spawn(async move {
                let batch = if i % 2 == 0 { "B001-LAGER" } else { "B002-STOUT" };
                drop_file(&dir, &format!("r{i:03}.json"), &report(i, batch)).await;
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    eventually("all documents", || async {
        document_count(&h.storage).await == u64::from(N)
    })
    .await;
    eventually("empty directory", || async {
        scan_dir(h.dir.path(), "json").await.unwrap().is_empty()
    })
    .await;

    assert_eq!(
        h.storage.cache.scan(CACHE_KEY_PREFIX).await.unwrap().len(),
        N as usize
    );

    let historical = HistoricalQueryService::new(h.storage.reports.clone(), &QueryConfig::default());
    let lager = historical
        .query(&HistoricalQuery::batch("B001-LAGER"))
        .await
        .unwrap();
    assert_eq!(lager.count, u64::from(N / 2));
    assert!(
        lager
            .results
            .windows(2)
            .all(|w| w[0].report.timestamp >= w[1].report.timestamp)
    );
    h.ingest.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_backlog_and_non_report_files() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("old_1.json"), report(1, "B1")).unwrap();
    std::fs::write(dir.path().join("old_2.JSON"), report(2, "B1")).unwrap();
    std::fs::write(dir.path().join("README.txt"), b"not a report").unwrap();

    let storage = StorageBuilder::new("sqlite::memory:").build().await.unwrap();
    let config = IngestConfig::new(dir.path()).with_workers(1);
    let pipeline = IngestPipeline::new(
        storage.cache.clone(),
        storage.reports.clone(),
        config.quarantine_dir(),
    );
    let ingest = IngestService::new(config, pipeline).start().await.unwrap();

    eventually("backlog", || async { document_count(&storage).await == 2 }).await;
    assert!(dir.path().join("README.txt").exists());
    ingest.shutdown().await;
}
