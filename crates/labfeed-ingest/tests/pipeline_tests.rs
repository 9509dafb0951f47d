//! Integration tests driving the full pipeline through both variants
//!
//! The intake worker and the chunked upload driver share every stage of the
//! pipeline, so the core property here is agreement: a file processed in one
//! wall-clock-bounded pass and the same file processed in single-row chunks
//! across separate invocations must produce identical totals and identical
//! stored records.

use labfeed_ingest::dispatch::{Dispatcher, RecordStore, ResultSink};
use labfeed_ingest::models::JobSummary;
use labfeed_ingest::stage::StageManager;
use labfeed_ingest::state::MemoryStateStore;
use labfeed_ingest::store::MemoryRecordStore;
use labfeed_ingest::worker::{Disposition, IntakeWorker};
use labfeed_ingest::ChunkedUploadDriver;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Two packs, one blank line, one structurally bad row.
const MIXED_FEED: &str = "\
pack_reference,variable,value,sample_point
PK1,pH Lab,7.2,
PK1,Conductivity,150,Main

PK2,Chloride as Cl,12,
PK2,pH Lab,pending,
bad,row
";

async fn single_pass(
    root: &Path,
    content: &str,
) -> (Disposition, JobSummary, Arc<MemoryRecordStore>) {
    let store = Arc::new(MemoryRecordStore::new());
    let stages = StageManager::new(root);
    stages.ensure_stages().unwrap();
    std::fs::write(root.join("incoming/feed.csv"), content).unwrap();

    let worker = IntakeWorker::new(
        stages,
        Dispatcher::new(store.clone()),
        Duration::from_secs(30),
    );
    let report = worker.run_next().await.unwrap().unwrap();
    (report.disposition, report.summary, store)
}

async fn chunked(
    root: &Path,
    source: &Path,
    row_budget: usize,
) -> (Disposition, JobSummary, Arc<MemoryRecordStore>, usize) {
    let store = Arc::new(MemoryRecordStore::new());
    let states = Arc::new(MemoryStateStore::new());
    let stages = StageManager::new(root);
    stages.ensure_stages().unwrap();

    let driver = ChunkedUploadDriver::new(
        stages,
        Dispatcher::new(store.clone()),
        states,
        row_budget,
    );
    let job = driver.begin(source).unwrap();

    // Each chunk is a fully separate invocation against persisted state.
    let mut invocations = 0usize;
    loop {
        invocations += 1;
        let outcome = driver.process_chunk(job.job_id).await.unwrap();
        if outcome.done {
            return (
                outcome.disposition.unwrap(),
                outcome.summary,
                store,
                invocations,
            );
        }
    }
}

#[tokio::test]
async fn test_chunked_and_single_pass_agree_on_totals() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = dir.path().join("feed.csv");
    std::fs::write(&source, MIXED_FEED).unwrap();

    let (whole_disposition, whole, _store) =
        single_pass(&dir.path().join("whole"), MIXED_FEED).await;
    let (sliced_disposition, sliced, sliced_store, invocations) =
        chunked(&dir.path().join("sliced"), &source, 1).await;

    assert!(invocations > 1, "budget of one row must force several chunks");
    assert_eq!(whole_disposition, sliced_disposition);
    assert_eq!(whole, sliced);
    assert_eq!(whole.rows_seen, 5);
    assert_eq!(whole.empty_lines, 1);
    assert_eq!(whole.errors, 1);
    assert_eq!(whole.groups_total, 2);
    assert_eq!(whole.committed, 2);

    // Straddled packs still fold into one record each.
    assert_eq!(sliced_store.len(), 2);
    let pk1 = sliced_store.find_by_natural_key("PK1").await.unwrap().unwrap();
    assert_eq!(pk1.report.ph_result.as_deref(), Some("7.2"));
    assert_eq!(pk1.report.mains_cond_result.as_deref(), Some("150"));
}

#[tokio::test]
async fn test_clean_file_archives_and_posts_to_sink() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/lab-results"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MemoryRecordStore::new());
    let stages = StageManager::new(dir.path());
    stages.ensure_stages().unwrap();
    std::fs::write(
        dir.path().join("incoming/feed.csv"),
        "pack_reference,variable,value\nPK1,pH Lab,7.2\n",
    )
    .unwrap();

    let sink = ResultSink::new(server.uri(), Duration::from_secs(5)).unwrap();
    let worker = IntakeWorker::new(
        stages,
        Dispatcher::with_sink(store.clone(), sink),
        Duration::from_secs(30),
    );
    let report = worker.run_next().await.unwrap().unwrap();

    assert_eq!(report.disposition, Disposition::Archived);
    assert_eq!(report.notices, 0);
    assert!(dir.path().join("archive/feed.csv").exists());
}

#[tokio::test]
async fn test_invalid_sibling_quarantines_file_but_committed_pack_stands() {
    let content = "\
pack_reference,variable,value
PK1,pH Lab,7.2
PK2,pH Lab,pending
";
    let dir = tempfile::TempDir::new().unwrap();
    let (disposition, summary, store) = single_pass(dir.path(), content).await;

    // Whole-file binary outcome: the invalid pack routes the file to failed,
    // but the already-committed sibling is not rolled back.
    assert_eq!(disposition, Disposition::Quarantined);
    assert_eq!(summary.committed, 1);
    assert_eq!(summary.skipped, 1);
    assert!(store.find_by_natural_key("PK1").await.unwrap().is_some());
    assert!(store.find_by_natural_key("PK2").await.unwrap().is_none());
    assert!(dir.path().join("failed/feed.csv.notices.txt").exists());
}

#[tokio::test]
async fn test_redispatching_a_file_updates_rather_than_duplicates() {
    let content = "pack_reference,variable,value\nPK1,pH Lab,7.2\n";
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MemoryRecordStore::new());
    let stages = StageManager::new(dir.path());
    stages.ensure_stages().unwrap();
    let worker = IntakeWorker::new(
        stages.clone(),
        Dispatcher::new(store.clone()),
        Duration::from_secs(30),
    );

    std::fs::write(dir.path().join("incoming/feed.csv"), content).unwrap();
    worker.run_next().await.unwrap().unwrap();
    let first = store.find_by_natural_key("PK1").await.unwrap().unwrap();

    // The same pack arrives again in a fresh file, as a retry would deliver it.
    std::fs::write(dir.path().join("incoming/feed2.csv"), content).unwrap();
    worker.run_next().await.unwrap().unwrap();
    let second = store.find_by_natural_key("PK1").await.unwrap().unwrap();

    assert_eq!(store.len(), 1);
    assert_eq!(first.id, second.id);
}
