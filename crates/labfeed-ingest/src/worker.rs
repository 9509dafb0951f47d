//! Single-shot intake worker
//!
//! Processes one automated feed file end to end: claim it out of incoming,
//! resolve the header, read and type every row, group by pack, dispatch
//! each pack, then file the outcome. The whole pass runs under a wall-clock
//! budget; when the budget runs out the remaining packs are abandoned and
//! the file stays in processing until a retry pass picks it up again.
//! Already-dispatched packs are safe to replay because the record store
//! upsert is idempotent.

use anyhow::{Context, Result};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use labfeed_common::FeedError;

use crate::columns::{self, HeaderMode};
use crate::dispatch::{DispatchResult, Dispatcher};
use crate::grouper::group_rows;
use crate::mapper::{fold_group, type_row};
use crate::models::{JobSummary, Submitter};
use crate::notice::NoticeReporter;
use crate::reader::FeedReader;
use crate::stage::{Stage, StageManager};
use crate::validator::validate;

/// Where a processed file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Clean pass; the file moved to archive
    Archived,
    /// Problems found; the file moved to failed with a notices sidecar
    Quarantined,
    /// Wall-clock budget ran out; the file stays in processing
    Suspended { groups_remaining: usize },
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Archived => write!(f, "archived"),
            Disposition::Quarantined => write!(f, "quarantined"),
            Disposition::Suspended { groups_remaining } => {
                write!(f, "suspended ({groups_remaining} groups remaining)")
            }
        }
    }
}

/// Result of one worker pass over one file.
#[derive(Debug, Clone)]
pub struct IntakeReport {
    pub file_name: String,
    pub disposition: Disposition,
    pub summary: JobSummary,
    pub notices: usize,
    pub elapsed: Duration,
}

impl IntakeReport {
    pub fn summary_line(&self) -> String {
        format!(
            "{}: {} rows → {} groups → {} committed, {} skipped, {} failed → {} in {:.1}s",
            self.file_name,
            self.summary.rows_seen,
            self.summary.groups_total,
            self.summary.committed,
            self.summary.skipped,
            self.summary.failed,
            self.disposition,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Runs one feed file at a time through the full pipeline.
pub struct IntakeWorker {
    stages: StageManager,
    dispatcher: Dispatcher,
    submitter: Submitter,
    header_mode: HeaderMode,
    time_budget: Duration,
}

impl IntakeWorker {
    pub fn new(stages: StageManager, dispatcher: Dispatcher, time_budget: Duration) -> Self {
        Self {
            stages,
            dispatcher,
            submitter: Submitter::system(),
            header_mode: HeaderMode::default(),
            time_budget,
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

    /// Claim and process the oldest file waiting in incoming.
    ///
    /// The claim is the move into processing: when the move reports the
    /// source missing, another worker got there first and the next
    /// candidate is tried. `None` when nothing is waiting.
    pub async fn run_next(&self) -> Result<Option<IntakeReport>> {
        self.stages
            .ensure_stages()
            .context("Stage directories unavailable")?;

        for candidate in self.stages.scan_incoming()? {
            match self
                .stages
                .move_file(&candidate.name, Stage::Incoming, Stage::Processing)?
            {
                Some(_) => {
                    info!(file = %candidate.name, "Claimed feed file");
                    return self.process(&candidate.name).await.map(Some);
                }
                None => {
                    debug!(file = %candidate.name, "Already claimed by another worker");
                }
            }
        }

        Ok(None)
    }

    /// Reprocess files stranded in processing by an earlier budget cutoff.
    ///
    /// The scan is a one-time snapshot, so a file that runs out of budget
    /// again in this pass waits for the next invocation instead of being
    /// retried immediately. Replaying already-dispatched packs is safe
    /// because the record store upsert is idempotent.
    pub async fn retry_processing(&self) -> Result<Vec<IntakeReport>> {
        self.stages
            .ensure_stages()
            .context("Stage directories unavailable")?;

        let mut reports = Vec::new();
        for candidate in self.stages.scan(Stage::Processing)? {
            info!(file = %candidate.name, "Retrying file left in processing");
            reports.push(self.process(&candidate.name).await?);
        }
        Ok(reports)
    }

    /// Process a file already claimed into the processing stage.
    pub async fn process(&self, file_name: &str) -> Result<IntakeReport> {
        let start = Instant::now();
        let path = self.stages.dir(Stage::Processing).join(file_name);
        let mut reporter = NoticeReporter::new(file_name, self.submitter.clone());
        let mut summary = JobSummary::new();

        info!(file = %file_name, "Phase 1: Resolving header columns");
        let mut reader = FeedReader::open(&path, self.header_mode)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let columns = match columns::resolve_header(
            reader.header(),
            self.header_mode,
            self.submitter.access,
        ) {
            Ok(columns) => columns,
            Err(err @ FeedError::MissingAnchorColumn(_)) => {
                let message = err.to_string();
                warn!(file = %file_name, "{message}");
                summary.fatal = Some(message.clone());
                reporter.record_file(message);
                let disposition = self.quarantine(file_name, &reporter)?;
                return Ok(self.finish(file_name, disposition, summary, &reporter, start));
            }
            Err(err) => return Err(err.into()),
        };
        reporter.set_header(columns.accepted_names());

        info!(file = %file_name, "Phase 2: Reading rows");
        let mut typed_rows = Vec::new();
        while let Some(raw) = reader.next_row()? {
            summary.rows_seen += 1;
            if let Some(error) = raw.parse_error.clone() {
                reporter.record_row(raw.line, &raw.cells, error);
                continue;
            }
            typed_rows.push(type_row(&raw, &columns));
        }
        summary.empty_lines = reader.empty_lines() as i64;

        info!(file = %file_name, rows = summary.rows_seen, "Phase 3: Grouping rows into packs");
        let grouped = group_rows(typed_rows);
        for row in &grouped.dropped {
            reporter.record_row(row.line, &row.raw, "Row has no pack reference");
        }
        summary.errors = reporter.row_errors();
        summary.groups_total = grouped.groups.len() as i64;

        info!(file = %file_name, groups = grouped.groups.len(), "Phase 4: Dispatching packs");
        let mut remaining = grouped.groups.len();
        let mut suspended = false;
        for group in &grouped.groups {
            if start.elapsed() >= self.time_budget {
                warn!(
                    file = %file_name,
                    groups_remaining = remaining,
                    "Time budget exhausted, leaving file in processing"
                );
                suspended = true;
                break;
            }

            let snapshot = group
                .rows
                .first()
                .map(|row| row.raw.clone())
                .unwrap_or_default();
            match self.dispatcher.dispatch(validate(fold_group(group))).await {
                DispatchResult::Committed(_) => summary.inc_committed(),
                DispatchResult::Skipped(reason) => {
                    summary.inc_skipped();
                    reporter.record_pack(&group.key, &snapshot, vec![reason]);
                }
                DispatchResult::Failed(reason) => {
                    summary.inc_failed();
                    reporter.record_pack(&group.key, &snapshot, vec![reason]);
                }
            }
            remaining -= 1;
        }

        info!(file = %file_name, "Phase 5: Filing outcome");
        let disposition = if suspended {
            Disposition::Suspended {
                groups_remaining: remaining,
            }
        } else if summary.is_clean() {
            self.stages
                .move_file(file_name, Stage::Processing, Stage::Archive)?;
            Disposition::Archived
        } else {
            self.quarantine(file_name, &reporter)?
        };

        Ok(self.finish(file_name, disposition, summary, &reporter, start))
    }

    /// Move a file to failed and write its notices sidecar. The sidecar is
    /// best-effort; the quarantine itself is not.
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

    fn finish(
        &self,
        file_name: &str,
        disposition: Disposition,
        summary: JobSummary,
        reporter: &NoticeReporter,
        start: Instant,
    ) -> IntakeReport {
        let report = IntakeReport {
            file_name: file_name.to_string(),
            disposition,
            summary,
            notices: reporter.count(),
            elapsed: start.elapsed(),
        };
        info!("{}", report.summary_line());
        report
    }
}
