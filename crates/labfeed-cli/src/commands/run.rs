//! `labfeed run` command implementation
//!
//! Retries files a previous pass left in processing, then drains the
//! incoming stage through the single-shot intake worker, one file per
//! pass, each pass under the configured wall-clock budget.

use anyhow::Result;
use colored::{ColoredString, Colorize};
use labfeed_ingest::worker::{Disposition, IntakeReport};
use labfeed_ingest::{IngestConfig, IntakeWorker, StageManager};

fn tag(report: &IntakeReport) -> ColoredString {
    match report.disposition {
        Disposition::Archived => "✓".green(),
        Disposition::Quarantined => "✗".red(),
        Disposition::Suspended { .. } => "…".yellow(),
    }
}

/// Process files waiting in the incoming stage
pub async fn run(config: &IngestConfig, max_files: Option<usize>) -> Result<()> {
    let stages = StageManager::new(&config.data_root);
    let dispatcher = super::build_dispatcher(config)?;
    let worker = IntakeWorker::new(stages, dispatcher, config.time_budget())
        .with_header_mode(config.header_mode);

    // Files stranded in processing by an earlier budget cutoff go first.
    let mut processed = 0usize;
    for report in worker.retry_processing().await? {
        processed += 1;
        println!("{} {}", tag(&report), report.summary_line());
    }

    while max_files.is_none_or(|max| processed < max) {
        let Some(report) = worker.run_next().await? else {
            break;
        };
        processed += 1;
        println!("{} {}", tag(&report), report.summary_line());
    }

    if processed == 0 {
        println!("No files waiting in incoming.");
    } else {
        println!();
        println!("Processed {} file(s).", processed);
    }

    Ok(())
}
