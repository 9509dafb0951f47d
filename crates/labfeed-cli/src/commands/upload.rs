//! `labfeed upload` command implementation
//!
//! Registers a CSV file with the chunked upload driver and works it in
//! row-budget slices. `--chunks` suspends the job after a fixed number of
//! slices; `--resume` picks a suspended job back up from its saved cursor.

use anyhow::{bail, Result};
use colored::Colorize;
use labfeed_ingest::models::AccessLevel;
use labfeed_ingest::worker::Disposition;
use labfeed_ingest::{
    ChunkedUploadDriver, IngestConfig, JobStateStore, JobSummary, JsonFileStateStore, StageManager,
    Submitter,
};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Upload a file, or resume a suspended upload job
pub async fn run(
    config: &IngestConfig,
    file: Option<PathBuf>,
    resume: Option<Uuid>,
    chunks: Option<usize>,
    admin: bool,
) -> Result<()> {
    let stages = StageManager::new(&config.data_root);
    let dispatcher = super::build_dispatcher(config)?;
    let states: Arc<dyn JobStateStore> = Arc::new(JsonFileStateStore::open(&config.state_dir)?);

    let access = if admin {
        AccessLevel::Admin
    } else {
        AccessLevel::User
    };
    let driver = ChunkedUploadDriver::new(stages, dispatcher, states, config.row_budget)
        .with_header_mode(config.header_mode)
        .with_submitter(Submitter::new("upload-cli", access));

    let job_id = match (file, resume) {
        (Some(path), None) => {
            let state = driver.begin(&path)?;
            println!("Upload registered as job {}", state.job_id);
            state.job_id
        },
        (None, Some(job_id)) => job_id,
        _ => bail!("Provide a file to upload or --resume with a job id"),
    };

    let mut rounds = 0usize;
    loop {
        let outcome = driver.process_chunk(job_id).await?;
        rounds += 1;
        println!("  chunk {}: {} row(s)", rounds, outcome.rows_read);

        if outcome.done {
            print_summary(&outcome.summary, outcome.disposition.as_ref());
            break;
        }

        if chunks.is_some_and(|max| rounds >= max) {
            println!();
            println!(
                "Suspended after {} chunk(s). Resume with 'labfeed upload --resume {}'",
                rounds, job_id
            );
            break;
        }
    }

    Ok(())
}

fn print_summary(summary: &JobSummary, disposition: Option<&Disposition>) {
    let tag = match disposition {
        Some(Disposition::Archived) => "✓".green(),
        _ => "✗".red(),
    };
    let outcome = disposition.map_or_else(|| "unknown".to_string(), |d| d.to_string());

    println!();
    println!(
        "{} {} rows ({} empty, {} errored) → {} committed, {} skipped, {} failed → {}",
        tag,
        summary.rows_seen,
        summary.empty_lines,
        summary.errors,
        summary.committed,
        summary.skipped,
        summary.failed,
        outcome,
    );
    if let Some(fatal) = &summary.fatal {
        println!("  {}: {}", "fatal".red().bold(), fatal);
    }
}
