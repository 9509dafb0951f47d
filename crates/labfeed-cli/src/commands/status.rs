//! `labfeed status` command implementation
//!
//! Shows how many files sit in each stage, which upload jobs are suspended
//! mid-file, and how many reports the record store holds.

use anyhow::Result;
use colored::Colorize;
use labfeed_ingest::{
    IngestConfig, JobStateStore, JsonFileStateStore, JsonlRecordStore, Stage, StageManager,
};

/// Show the state of the feed directories and suspended jobs
pub async fn run(config: &IngestConfig) -> Result<()> {
    let stages = StageManager::new(&config.data_root);
    stages.ensure_stages()?;

    println!("{}", "Stages:".cyan().bold());
    for stage in Stage::ALL {
        let dir = stages.dir(stage);
        // Notices sidecars ride along with their feed file; only feed
        // files count.
        let count = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter(|entry| !entry.file_name().to_string_lossy().ends_with(".notices.txt"))
            .count();
        println!("  {:<12} {:>4} file(s)   {}", stage.to_string(), count, dir.display());
    }

    let states = JsonFileStateStore::open(&config.state_dir)?;
    let jobs = states.list()?;
    println!();
    if jobs.is_empty() {
        println!("No suspended upload jobs.");
    } else {
        println!("{}", "Suspended upload jobs:".cyan().bold());
        for job in &jobs {
            println!(
                "  {}  {}  {} row(s) read, next byte {}",
                job.job_id, job.file_name, job.rows_seen, job.byte_offset
            );
        }
    }

    let store = JsonlRecordStore::open(&config.store_path)?;
    println!();
    println!(
        "Stored reports: {} ({})",
        store.len(),
        config.store_path.display()
    );

    Ok(())
}
