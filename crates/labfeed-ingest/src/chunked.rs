//! Chunked upload driver
//!
//! Interactive uploads are worked in slices of at most `row_budget` rows
//! per invocation, with the cursor and counters persisted between slices
//! as [`ResumableJobState`]. A later invocation resumes from the saved
//! byte offset without re-reading consumed bytes.
//!
//! A pack whose rows straddle a chunk boundary is dispatched once per
//! chunk: the fold continues from the report accumulated in the results
//! bag and the fresh outcome replaces the previous one, so the idempotent
//! upsert converges on the same record a single pass would produce.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use labfeed_common::FeedError;

use crate::columns::{self, HeaderMode};
use crate::dispatch::{DispatchResult, Dispatcher};
use crate::grouper::group_rows;
use crate::mapper::{fold_group_into, type_row};
use crate::models::{JobSummary, LabReport, Submitter};
use crate::notice::NoticeReporter;
use crate::reader::FeedReader;
use crate::stage::{Stage, StageManager};
use crate::state::{JobStateStore, OutcomeKind, ResumableJobState};
use crate::validator::validate;
use crate::worker::Disposition;

/// What one `process_chunk` call did.
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub job_id: Uuid,
    /// Rows consumed by this chunk, flagged ones included.
    pub rows_read: usize,
    pub done: bool,
    /// Where the file ended up; set only when the job is done.
    pub disposition: Option<Disposition>,
    /// Totals accumulated over all chunks so far.
    pub summary: JobSummary,
}

/// Drives one uploaded file through the pipeline in resumable chunks.
pub struct ChunkedUploadDriver {
    stages: StageManager,
    dispatcher: Dispatcher,
    states: Arc<dyn JobStateStore>,
    submitter: Submitter,
    header_mode: HeaderMode,
    row_budget: usize,
}

impl ChunkedUploadDriver {
    pub fn new(
        stages: StageManager,
        dispatcher: Dispatcher,
        states: Arc<dyn JobStateStore>,
        row_budget: usize,
    ) -> Self {
        Self {
            stages,
            dispatcher,
            states,
            submitter: Submitter::system(),
            header_mode: HeaderMode::default(),
            row_budget,
        }
    }

    pub fn with_header_mode(mut self, header_mode: HeaderMode) -> Self {
        self.header_mode = header_mode;
        self
    }

    pub fn with_submitter(mut self, submitter: Submitter) -> Self {
        self.submitter = submitter;
        self
    }

    /// Register an upload: copy the file through incoming into processing
    /// and persist a fresh job state. No rows are consumed yet.
    pub fn begin(&self, source: &Path) -> Result<ResumableJobState> {
        self.stages
            .ensure_stages()
            .context("Stage directories unavailable")?;

        let deposited = self.stages.deposit(source)?;
        let Some(name) = deposited.file_name().and_then(|name| name.to_str()) else {
            bail!("Upload {} has no usable file name", source.display());
        };

        if self
            .stages
            .move_file(name, Stage::Incoming, Stage::Processing)?
            .is_none()
        {
            bail!("Upload {name} disappeared before it could be claimed");
        }

        let state = ResumableJobState::new(name);
        self.states.save(&state)?;
        info!(job = %state.job_id, file = %name, "Registered upload job");
        Ok(state)
    }

    /// Process the next chunk of a registered job.
    pub async fn process_chunk(&self, job_id: Uuid) -> Result<ChunkOutcome> {
        let Some(mut state) = self.states.load(job_id)? else {
            bail!("Unknown upload job {job_id}");
        };

        let path = self.stages.dir(Stage::Processing).join(&state.file_name);
        let mut reporter = NoticeReporter::new(state.file_name.clone(), self.submitter.clone());
        reporter.restore(std::mem::take(&mut state.notices));

        let (mut reader, columns) = match state.columns.clone() {
            Some(columns) => {
                let reader =
                    FeedReader::resume(&path, state.byte_offset, state.line, state.header_width)
                        .with_context(|| format!("Failed to reopen {}", path.display()))?;
                (reader, columns)
            }
            None => {
                let reader = FeedReader::open(&path, self.header_mode)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                let columns = match columns::resolve_header(
                    reader.header(),
                    self.header_mode,
                    self.submitter.access,
                ) {
                    Ok(columns) => columns,
                    Err(err @ FeedError::MissingAnchorColumn(_)) => {
                        return self.abort_job(state, reporter, err.to_string());
                    }
                    Err(err) => return Err(err.into()),
                };
                state.resolve_header(columns.clone());
                (reader, columns)
            }
        };
        reporter.set_header(columns.accepted_names());

        let mut typed_rows = Vec::new();
        let mut rows_read = 0usize;
        let mut at_eof = false;
        while rows_read < self.row_budget {
            match reader.next_row()? {
                Some(raw) => {
                    rows_read += 1;
                    state.rows_seen += 1;
                    if let Some(error) = raw.parse_error.clone() {
                        reporter.record_row(raw.line, &raw.cells, error);
                        continue;
                    }
                    typed_rows.push(type_row(&raw, &columns));
                }
                None => {
                    at_eof = true;
                    break;
                }
            }
        }

        let grouped = group_rows(typed_rows);
        for row in &grouped.dropped {
            reporter.record_row(row.line, &row.raw, "Row has no pack reference");
        }
        state.errors += reporter.row_errors();
        state.empty_lines += reader.empty_lines() as i64;

        info!(
            job = %state.job_id,
            rows = rows_read,
            groups = grouped.groups.len(),
            "Dispatching chunk"
        );
        for group in &grouped.groups {
            if state.results.contains_key(&group.key) {
                reporter.supersede_pack(&group.key);
            }

            let mut report = state
                .folded_report(&group.key)
                .cloned()
                .unwrap_or_else(|| LabReport::new(&group.key));
            fold_group_into(&mut report, group);

            let snapshot = group
                .rows
                .first()
                .map(|row| row.raw.clone())
                .unwrap_or_default();
            let result = self.dispatcher.dispatch(validate(report.clone())).await;
            match &result {
                DispatchResult::Committed(_) => {}
                DispatchResult::Skipped(reason) | DispatchResult::Failed(reason) => {
                    reporter.record_pack(&group.key, &snapshot, vec![reason.clone()]);
                }
            }
            state.record_result(&group.key, OutcomeKind::from(&result), report);
        }

        state.advance(reader.position(), reader.line_cursor());

        if at_eof {
            state.mark_done();
            let summary = state.summary();
            let disposition = if summary.is_clean() {
                self.stages
                    .move_file(&state.file_name, Stage::Processing, Stage::Archive)?;
                Disposition::Archived
            } else {
                self.quarantine(&state.file_name, &reporter)?
            };
            self.states.remove(state.job_id)?;
            info!(
                job = %state.job_id,
                file = %state.file_name,
                disposition = %disposition,
                "Upload job finished"
            );
            return Ok(ChunkOutcome {
                job_id: state.job_id,
                rows_read,
                done: true,
                disposition: Some(disposition),
                summary,
            });
        }

        state.notices = reporter.take_notices();
        self.states.save(&state)?;
        Ok(ChunkOutcome {
            job_id: state.job_id,
            rows_read,
            done: false,
            disposition: None,
            summary: state.summary(),
        })
    }

    /// Run chunks back to back until the job finishes.
    pub async fn run_to_completion(&self, job_id: Uuid) -> Result<ChunkOutcome> {
        loop {
            let outcome = self.process_chunk(job_id).await?;
            if outcome.done {
                return Ok(outcome);
            }
        }
    }

    /// End a job on a file-level error before any dispatch: quarantine the
    /// file, emit the failure summary, dispose of the state.
    fn abort_job(
        &self,
        mut state: ResumableJobState,
        mut reporter: NoticeReporter,
        message: String,
    ) -> Result<ChunkOutcome> {
        warn!(job = %state.job_id, file = %state.file_name, "{message}");
        state.fatal = Some(message.clone());
        reporter.record_file(message);
        state.mark_done();

        let disposition = self.quarantine(&state.file_name, &reporter)?;
        self.states.remove(state.job_id)?;

        Ok(ChunkOutcome {
            job_id: state.job_id,
            rows_read: 0,
            done: true,
            disposition: Some(disposition),
            summary: state.summary(),
        })
    }

    fn quarantine(&self, file_name: &str, reporter: &NoticeReporter) -> Result<Disposition> {
        let moved = self
            .stages
            .move_file(file_name, Stage::Processing, Stage::Failed)?;
        let target = moved.unwrap_or_else(|| self.stages.dir(Stage::Failed).join(file_name));

        if let Err(err) = reporter.write_sidecar(&target) {
            warn!(file = %file_name, error = %err, "Could not write notices sidecar");
        }

        Ok(Disposition::Quarantined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RecordStore;
    use crate::state::MemoryStateStore;
    use crate::store::MemoryRecordStore;

    fn driver(
        dir: &Path,
        row_budget: usize,
    ) -> (ChunkedUploadDriver, Arc<MemoryRecordStore>, Arc<MemoryStateStore>) {
        let store = Arc::new(MemoryRecordStore::new());
        let states = Arc::new(MemoryStateStore::new());
        let stages = StageManager::new(dir);
        stages.ensure_stages().unwrap();
        let driver = ChunkedUploadDriver::new(
            stages,
            Dispatcher::new(store.clone()),
            states.clone(),
            row_budget,
        );
        (driver, store, states)
    }

    fn upload_file(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("upload.csv");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_single_chunk_covers_small_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let staging = dir.path().join("stages");
        let (driver, store, states) = driver(&staging, 100);
        let source = upload_file(
            dir.path(),
            "pack_reference,variable,value\nPK1,pH Lab,7.2\n",
        );

        let state = driver.begin(&source).unwrap();
        let outcome = driver.run_to_completion(state.job_id).await.unwrap();

        assert!(outcome.done);
        assert_eq!(outcome.disposition, Some(Disposition::Archived));
        assert_eq!(outcome.summary.committed, 1);
        assert_eq!(store.len(), 1);
        assert!(states.load(state.job_id).unwrap().is_none());
        assert!(staging.join("archive/upload.csv").exists());
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_budget_bounds_each_chunk() {
        let dir = tempfile::TempDir::new().unwrap();
        let staging = dir.path().join("stages");
        let (driver, _store, states) = driver(&staging, 2);
        let source = upload_file(
            dir.path(),
            "pack_reference,variable,value\nPK1,pH Lab,7.2\nPK2,pH Lab,6.9\nPK3,pH Lab,7.0\n",
        );

        let state = driver.begin(&source).unwrap();

        let first = driver.process_chunk(state.job_id).await.unwrap();
        assert_eq!(first.rows_read, 2);
        assert!(!first.done);
        assert_eq!(first.summary.committed, 2);

        let saved = states.load(state.job_id).unwrap().unwrap();
        assert_eq!(saved.rows_seen, 2);
        assert!(saved.byte_offset > 0);

        let second = driver.process_chunk(state.job_id).await.unwrap();
        assert_eq!(second.rows_read, 1);
        assert!(second.done);
        assert_eq!(second.summary.committed, 3);
        assert_eq!(second.summary.rows_seen, 3);
    }

    #[tokio::test]
    async fn test_straddled_pack_converges_to_one_record() {
        let dir = tempfile::TempDir::new().unwrap();
        let staging = dir.path().join("stages");
        let (driver, store, _states) = driver(&staging, 1);
        let source = upload_file(
            dir.path(),
            "pack_reference,variable,value,sample_point\nPK1,pH Lab,7.2,\nPK1,Conductivity,150,Main\n",
        );

        let state = driver.begin(&source).unwrap();
        let outcome = driver.run_to_completion(state.job_id).await.unwrap();

        assert!(outcome.done);
        assert_eq!(outcome.summary.groups_total, 1);
        assert_eq!(outcome.summary.committed, 1);
        assert_eq!(store.len(), 1);

        let stored = store.find_by_natural_key("PK1").await.unwrap().unwrap();
        assert_eq!(stored.report.ph_result.as_deref(), Some("7.2"));
        assert_eq!(stored.report.mains_cond_result.as_deref(), Some("150"));
    }

    #[tokio::test]
    async fn test_missing_anchor_aborts_without_dispatch() {
        let dir = tempfile::TempDir::new().unwrap();
        let staging = dir.path().join("stages");
        let (driver, store, states) = driver(&staging, 100);
        let source = upload_file(dir.path(), "site,variable,value\nS1,pH Lab,7.2\n");

        let state = driver.begin(&source).unwrap();
        let outcome = driver.process_chunk(state.job_id).await.unwrap();

        assert!(outcome.done);
        assert_eq!(outcome.disposition, Some(Disposition::Quarantined));
        assert_eq!(outcome.rows_read, 0);
        assert!(outcome.summary.fatal.is_some());
        assert_eq!(store.len(), 0);
        assert!(states.load(state.job_id).unwrap().is_none());
        assert!(staging.join("failed/upload.csv.notices.txt").exists());
    }

    #[tokio::test]
    async fn test_unknown_job_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let (driver, _store, _states) = driver(dir.path(), 10);
        assert!(driver.process_chunk(Uuid::new_v4()).await.is_err());
    }
}
