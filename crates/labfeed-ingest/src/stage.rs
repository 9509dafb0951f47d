//! Stage directories and the moves between them
//!
//! A file's stage is encoded by which directory it sits in. The move between
//! stages is a rename, which on one filesystem is atomic and doubles as the
//! claim mechanism between concurrent workers: whoever renames first wins,
//! the loser sees the source missing and treats the move as a no-op.

use labfeed_common::{FeedError, Result};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// The four stages a file passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Incoming,
    Processing,
    Archive,
    Failed,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Incoming, Stage::Processing, Stage::Archive, Stage::Failed];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Stage::Incoming => "incoming",
            Stage::Processing => "processing",
            Stage::Archive => "archive",
            Stage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// A file waiting in a stage directory.
#[derive(Debug, Clone)]
pub struct IntakeFile {
    pub name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Owns the stage directories under one root.
#[derive(Debug, Clone)]
pub struct StageManager {
    root: PathBuf,
}

impl StageManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn dir(&self, stage: Stage) -> PathBuf {
        self.root.join(stage.dir_name())
    }

    /// Create every stage directory and verify each is writable.
    ///
    /// Idempotent. Any failure is fatal for the invocation but leaves
    /// nothing behind that a retry could not fix.
    pub fn ensure_stages(&self) -> Result<()> {
        for stage in Stage::ALL {
            self.ensure_stage(stage)?;
        }
        Ok(())
    }

    fn ensure_stage(&self, stage: Stage) -> Result<PathBuf> {
        let dir = self.dir(stage);
        fs::create_dir_all(&dir).map_err(|e| FeedError::StageUnavailable {
            stage: stage.to_string(),
            reason: e.to_string(),
        })?;

        // A probe write is the only reliable writability check across
        // filesystems and permission models.
        let probe = dir.join(".probe");
        let outcome = File::create(&probe).and_then(|mut f| f.write_all(b"probe"));
        let _ = fs::remove_file(&probe);
        outcome.map_err(|e| FeedError::StageUnavailable {
            stage: stage.to_string(),
            reason: e.to_string(),
        })?;

        Ok(dir)
    }

    /// Move a file between stages.
    ///
    /// Returns the destination path, or `None` when the source no longer
    /// exists (another worker claimed it, or the move already happened).
    /// A file already at the destination is replaced.
    pub fn move_file(&self, name: &str, from: Stage, to: Stage) -> Result<Option<PathBuf>> {
        let source = self.dir(from).join(name);
        let dest = self.dir(to).join(name);

        match fs::rename(&source, &dest) {
            Ok(()) => {
                debug!(file = %name, from = %from, to = %to, "Moved file between stages");
                Ok(Some(dest))
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(file = %name, from = %from, "Source missing, move treated as no-op");
                Ok(None)
            },
            Err(e) => {
                // Rename across filesystems fails; fall back to a full copy
                // and only delete the source once the copy is durable.
                warn!(
                    file = %name,
                    error = %e,
                    "Rename failed, falling back to copy and delete"
                );
                fs::copy(&source, &dest)?;
                File::open(&dest)?.sync_all()?;
                fs::remove_file(&source)?;
                Ok(Some(dest))
            },
        }
    }

    /// Copy an external file into the incoming stage.
    pub fn deposit(&self, source: &Path) -> Result<PathBuf> {
        let name = source
            .file_name()
            .ok_or_else(|| FeedError::Config(format!("Not a file path: {}", source.display())))?;
        let dest = self.dir(Stage::Incoming).join(name);
        fs::copy(source, &dest)?;
        debug!(file = %dest.display(), "Deposited file into incoming");
        Ok(dest)
    }

    /// List the files waiting in incoming, oldest modification first.
    pub fn scan_incoming(&self) -> Result<Vec<IntakeFile>> {
        self.scan(Stage::Incoming)
    }

    /// List the files in a stage, oldest modification first.
    pub fn scan(&self, stage: Stage) -> Result<Vec<IntakeFile>> {
        let mut files = Vec::new();

        for entry in fs::read_dir(self.dir(stage))? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => {
                    warn!(path = %entry.path().display(), "Skipping file with non-UTF-8 name");
                    continue;
                },
            };
            files.push(IntakeFile {
                name,
                path: entry.path(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        files.sort_by(|a, b| a.modified.cmp(&b.modified).then(a.name.cmp(&b.name)));
        Ok(files)
    }
}
