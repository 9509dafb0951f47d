//! `labfeed init` command implementation
//!
//! Creates the stage directories, the job state directory and the record
//! store location so the first `run` or `upload` starts from a known layout.

use anyhow::Result;
use colored::Colorize;
use labfeed_ingest::{IngestConfig, JsonFileStateStore, JsonlRecordStore, Stage, StageManager};

/// Initialize the feed directory layout
pub async fn run(config: &IngestConfig) -> Result<()> {
    let stages = StageManager::new(&config.data_root);
    stages.ensure_stages()?;

    println!("{}", "Stage directories:".cyan().bold());
    for stage in Stage::ALL {
        println!("  {} {}", "✓".green(), stages.dir(stage).display());
    }

    JsonFileStateStore::open(&config.state_dir)?;
    println!("  {} {} (job state)", "✓".green(), config.state_dir.display());

    JsonlRecordStore::open(&config.store_path)?;
    println!("  {} {} (record store)", "✓".green(), config.store_path.display());

    println!();
    println!(
        "Drop feed files into {} and run 'labfeed run'.",
        stages.dir(Stage::Incoming).display()
    );

    Ok(())
}
