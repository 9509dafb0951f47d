//! Resumable upload job state
//!
//! The chunked upload driver persists one state document per job so a
//! later invocation can pick up where the previous one stopped. The state
//! carries the read cursor (byte offset and line number), the resolved
//! header mapping, accumulated counters, carried-over notices, and a
//! results bag holding the folded report and last outcome per pack.
//! Re-dispatching a pack whose rows straddle a chunk boundary replaces
//! its bag entry rather than double-counting it.

use chrono::{DateTime, Utc};
use labfeed_common::{FeedError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;
use uuid::Uuid;

use crate::columns::ColumnMap;
use crate::dispatch::DispatchResult;
use crate::models::{JobSummary, LabReport};
use crate::notice::Notice;

/// Lifecycle of an upload job. Phases only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Unstarted,
    HeaderResolved,
    InProgress,
    Done,
}

/// Last known outcome for a dispatched pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Committed,
    Skipped,
    Failed,
}

impl From<&DispatchResult> for OutcomeKind {
    fn from(result: &DispatchResult) -> Self {
        match result {
            DispatchResult::Committed(_) => OutcomeKind::Committed,
            DispatchResult::Skipped(_) => OutcomeKind::Skipped,
            DispatchResult::Failed(_) => OutcomeKind::Failed,
        }
    }
}

/// Bag entry for one pack: the report folded so far and how its latest
/// dispatch went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackResult {
    pub outcome: OutcomeKind,
    pub report: LabReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumableJobState {
    pub job_id: Uuid,
    /// File name inside the processing stage.
    pub file_name: String,
    pub phase: JobPhase,
    /// Byte offset of the next unread record.
    pub byte_offset: u64,
    /// Line number of the next unread record, 1-based.
    pub line: u64,
    pub header_width: Option<usize>,
    pub columns: Option<ColumnMap>,
    pub rows_seen: i64,
    pub empty_lines: i64,
    pub errors: i64,
    pub results: BTreeMap<String, PackResult>,
    pub notices: Vec<Notice>,
    pub fatal: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResumableJobState {
    pub fn new(file_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            file_name: file_name.into(),
            phase: JobPhase::Unstarted,
            byte_offset: 0,
            line: 1,
            header_width: None,
            columns: None,
            rows_seen: 0,
            empty_lines: 0,
            errors: 0,
            results: BTreeMap::new(),
            notices: Vec::new(),
            fatal: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn is_done(&self) -> bool {
        self.phase == JobPhase::Done
    }

    /// Record the header mapping resolved by the first chunk.
    pub fn resolve_header(&mut self, columns: ColumnMap) {
        self.header_width = Some(columns.width());
        self.columns = Some(columns);
        if self.phase == JobPhase::Unstarted {
            self.phase = JobPhase::HeaderResolved;
        }
    }

    /// Move the read cursor past the records consumed by a chunk.
    pub fn advance(&mut self, byte_offset: u64, line: u64) {
        self.byte_offset = byte_offset;
        self.line = line;
        if self.phase != JobPhase::Done {
            self.phase = JobPhase::InProgress;
        }
        self.updated_at = Utc::now();
    }

    pub fn mark_done(&mut self) {
        self.phase = JobPhase::Done;
        self.updated_at = Utc::now();
    }

    /// Store or replace the bag entry for a pack.
    pub fn record_result(&mut self, pack_reference: &str, outcome: OutcomeKind, report: LabReport) {
        self.results
            .insert(pack_reference.to_string(), PackResult { outcome, report });
    }

    /// The report folded for a pack by earlier chunks, if any.
    pub fn folded_report(&self, pack_reference: &str) -> Option<&LabReport> {
        self.results.get(pack_reference).map(|result| &result.report)
    }

    /// Committed, skipped and failed pack counts derived from the last
    /// outcome of each pack.
    pub fn outcome_counts(&self) -> (i64, i64, i64) {
        let mut counts = (0, 0, 0);
        for result in self.results.values() {
            match result.outcome {
                OutcomeKind::Committed => counts.0 += 1,
                OutcomeKind::Skipped => counts.1 += 1,
                OutcomeKind::Failed => counts.2 += 1,
            }
        }
        counts
    }

    pub fn summary(&self) -> JobSummary {
        let (committed, skipped, failed) = self.outcome_counts();
        JobSummary {
            rows_seen: self.rows_seen,
            empty_lines: self.empty_lines,
            errors: self.errors,
            groups_total: self.results.len() as i64,
            committed,
            skipped,
            failed,
            fatal: self.fatal.clone(),
        }
    }
}

/// Persistence for upload job state.
pub trait JobStateStore: Send + Sync {
    fn load(&self, job_id: Uuid) -> Result<Option<ResumableJobState>>;
    fn save(&self, state: &ResumableJobState) -> Result<()>;
    fn remove(&self, job_id: Uuid) -> Result<()>;
    /// All known jobs, oldest update first.
    fn list(&self) -> Result<Vec<ResumableJobState>>;
}

/// In-memory state store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStateStore {
    jobs: Mutex<HashMap<Uuid, ResumableJobState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ResumableJobState>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobStateStore for MemoryStateStore {
    fn load(&self, job_id: Uuid) -> Result<Option<ResumableJobState>> {
        Ok(self.lock().get(&job_id).cloned())
    }

    fn save(&self, state: &ResumableJobState) -> Result<()> {
        self.lock().insert(state.job_id, state.clone());
        Ok(())
    }

    fn remove(&self, job_id: Uuid) -> Result<()> {
        self.lock().remove(&job_id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<ResumableJobState>> {
        let mut jobs: Vec<_> = self.lock().values().cloned().collect();
        jobs.sort_by_key(|job| job.updated_at);
        Ok(jobs)
    }
}

/// State store writing one JSON document per job. Saves go through a
/// temporary file and a rename so a crash never leaves a torn document.
pub struct JsonFileStateStore {
    dir: PathBuf,
}

impl JsonFileStateStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn job_path(&self, job_id: Uuid) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }
}

impl JobStateStore for JsonFileStateStore {
    fn load(&self, job_id: Uuid) -> Result<Option<ResumableJobState>> {
        let path = self.job_path(job_id);
        let body = match std::fs::read_to_string(&path) {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let state = serde_json::from_str(&body).map_err(|err| {
            FeedError::JobState(format!("State file {} is unreadable: {err}", path.display()))
        })?;
        Ok(Some(state))
    }

    fn save(&self, state: &ResumableJobState) -> Result<()> {
        let path = self.job_path(state.job_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(state)?;
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, job_id: Uuid) -> Result<()> {
        match std::fs::remove_file(self.job_path(job_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn list(&self) -> Result<Vec<ResumableJobState>> {
        let mut jobs = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let Ok(job_id) = stem.parse::<Uuid>() else {
                continue;
            };
            match self.load(job_id) {
                Ok(Some(state)) => jobs.push(state),
                Ok(None) => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable job state");
                }
            }
        }
        jobs.sort_by_key(|job| job.updated_at);
        Ok(jobs)
    }
}
