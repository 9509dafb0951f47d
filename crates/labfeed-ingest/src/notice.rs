//! Intake notices
//!
//! Anything worth telling an operator about a feed file lands here: rows
//! that failed to parse, rows dropped for a missing pack reference, packs
//! the validator or sink rejected. Each notice snapshots the offending
//! cells and the accepted header so it can be read long after the file
//! moved on. Publication is best-effort; a sink failure is logged and the
//! notice is kept locally regardless.
//!
//! When a file is quarantined the collected notices are written out as a
//! `.notices.txt` sidecar beside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::models::Submitter;

pub const SIDECAR_SUFFIX: &str = ".notices.txt";

/// What part of the feed file a notice refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeScope {
    /// The file as a whole.
    File,
    /// A single physical line.
    Line(u64),
    /// A grouped pack, identified by its pack reference.
    Pack(String),
}

/// Immutable record of one problem found during intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub id: Uuid,
    pub scope: NoticeScope,
    /// Cells of the offending row, empty for file-level notices.
    pub raw_row: Vec<String>,
    /// Accepted field names by column position at the time of recording.
    pub header: Vec<String>,
    pub messages: Vec<String>,
    pub submitted_by: Submitter,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            NoticeScope::File => {}
            NoticeScope::Line(line) => write!(f, "line {line}: ")?,
            NoticeScope::Pack(pack) => write!(f, "{pack}: ")?,
        }
        write!(f, "{}", self.messages.join("; "))
    }
}

/// Destination notices are published to, fire-and-forget.
pub trait NoticeSink: Send {
    fn publish(&mut self, notice: &Notice) -> anyhow::Result<()>;
}

/// Publishes each notice as a structured warning.
#[derive(Debug, Default)]
pub struct LogNoticeSink;

impl NoticeSink for LogNoticeSink {
    fn publish(&mut self, notice: &Notice) -> anyhow::Result<()> {
        warn!(notice = %notice, submitter = %notice.submitted_by.name, "Intake notice");
        Ok(())
    }
}

/// Collects published notices in memory, mainly for assertions in tests.
#[derive(Debug, Default)]
pub struct MemoryNoticeSink {
    notices: Vec<Notice>,
}

impl MemoryNoticeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }
}

impl NoticeSink for MemoryNoticeSink {
    fn publish(&mut self, notice: &Notice) -> anyhow::Result<()> {
        self.notices.push(notice.clone());
        Ok(())
    }
}

/// Gathers notices for one feed file and renders the quarantine sidecar.
///
/// Row-level recordings bump an error counter that feeds the job summary;
/// pack-level rejections are counted by the dispatch outcome instead.
pub struct NoticeReporter {
    file_name: String,
    submitter: Submitter,
    header: Vec<String>,
    notices: Vec<Notice>,
    row_errors: i64,
    sink: Box<dyn NoticeSink>,
}

impl NoticeReporter {
    pub fn new(file_name: impl Into<String>, submitter: Submitter) -> Self {
        Self::with_sink(file_name, submitter, Box::new(LogNoticeSink))
    }

    pub fn with_sink(
        file_name: impl Into<String>,
        submitter: Submitter,
        sink: Box<dyn NoticeSink>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            submitter,
            header: Vec::new(),
            notices: Vec::new(),
            row_errors: 0,
            sink,
        }
    }

    /// Snapshot the accepted header; recorded on every later notice.
    pub fn set_header(&mut self, header: Vec<String>) {
        self.header = header;
    }

    /// Record a problem with one physical row. Counts as a file error.
    pub fn record_row(&mut self, line: u64, cells: &[String], message: impl Into<String>) {
        self.row_errors += 1;
        self.push(NoticeScope::Line(line), cells.to_vec(), vec![message.into()]);
    }

    /// Record the rejection of a whole pack.
    pub fn record_pack(&mut self, pack_reference: &str, cells: &[String], messages: Vec<String>) {
        self.push(NoticeScope::Pack(pack_reference.to_string()), cells.to_vec(), messages);
    }

    /// Record a problem with the file itself.
    pub fn record_file(&mut self, message: impl Into<String>) {
        self.push(NoticeScope::File, Vec::new(), vec![message.into()]);
    }

    fn push(&mut self, scope: NoticeScope, raw_row: Vec<String>, messages: Vec<String>) {
        let notice = Notice {
            id: Uuid::new_v4(),
            scope,
            raw_row,
            header: self.header.clone(),
            messages,
            submitted_by: self.submitter.clone(),
            created_at: Utc::now(),
        };
        if let Err(err) = self.sink.publish(&notice) {
            warn!(error = %err, file = %self.file_name, "Notice publication failed");
        }
        self.notices.push(notice);
    }

    /// Restore notices carried over from a previous chunk of the same job.
    /// Restored entries are not re-published.
    pub fn restore(&mut self, notices: Vec<Notice>) {
        self.notices.extend(notices);
    }

    /// Forget pack-level notices for a pack that is being dispatched again;
    /// the fresh outcome supersedes them.
    pub fn supersede_pack(&mut self, pack_reference: &str) {
        self.notices
            .retain(|notice| !matches!(&notice.scope, NoticeScope::Pack(pack) if pack == pack_reference));
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }

    pub fn count(&self) -> usize {
        self.notices.len()
    }

    /// Row-level errors recorded by this reporter instance.
    pub fn row_errors(&self) -> i64 {
        self.row_errors
    }

    /// Write `<file>.notices.txt` next to the given path. Returns the
    /// sidecar path, or `None` when there is nothing to report.
    pub fn write_sidecar(&self, file_path: &Path) -> std::io::Result<Option<PathBuf>> {
        if self.notices.is_empty() {
            return Ok(None);
        }

        let mut sidecar = file_path.as_os_str().to_owned();
        sidecar.push(SIDECAR_SUFFIX);
        let sidecar = PathBuf::from(sidecar);

        let mut out = Vec::new();
        writeln!(
            out,
            "# {}: {} notice(s), submitted by {}",
            self.file_name,
            self.notices.len(),
            self.submitter.name
        )?;
        for notice in &self.notices {
            writeln!(out, "{notice}")?;
            if !notice.raw_row.is_empty() {
                writeln!(out, "  row: {}", notice.raw_row.join(", "))?;
            }
        }
        std::fs::write(&sidecar, out)?;

        Ok(Some(sidecar))
    }
}
