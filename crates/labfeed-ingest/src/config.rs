//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::columns::HeaderMode;

// ============================================================================
// Ingest Configuration Constants
// ============================================================================

/// Default root for the stage directories.
pub const DEFAULT_DATA_ROOT: &str = "./data";

/// Default per-call timeout for the remote result sink, in seconds.
pub const DEFAULT_SINK_TIMEOUT_SECS: u64 = 30;

/// Default wall-clock budget for one intake worker invocation, in seconds.
/// Sized to leave headroom under a five minute queue slot.
pub const DEFAULT_TIME_BUDGET_SECS: u64 = 270;

/// Default number of rows one chunked invocation consumes.
pub const DEFAULT_ROW_BUDGET: usize = 500;

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Root directory holding the incoming/processing/archive/failed stages
    pub data_root: PathBuf,
    /// Directory for persisted chunked-upload job state
    pub state_dir: PathBuf,
    /// Path of the JSON-lines record store
    pub store_path: PathBuf,
    /// Base URL of the remote result sink; None disables remote posting
    pub sink_base_url: Option<String>,
    pub sink_timeout_secs: u64,
    pub time_budget_secs: u64,
    pub row_budget: usize,
    pub header_mode: HeaderMode,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let data_root = PathBuf::from(DEFAULT_DATA_ROOT);
        Self {
            state_dir: data_root.join("state"),
            store_path: data_root.join("reports.jsonl"),
            data_root,
            sink_base_url: None,
            sink_timeout_secs: DEFAULT_SINK_TIMEOUT_SECS,
            time_budget_secs: DEFAULT_TIME_BUDGET_SECS,
            row_budget: DEFAULT_ROW_BUDGET,
            header_mode: HeaderMode::Detect,
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let data_root = std::env::var("LABFEED_DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_ROOT));

        let config = IngestConfig {
            state_dir: std::env::var("LABFEED_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_root.join("state")),
            store_path: std::env::var("LABFEED_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_root.join("reports.jsonl")),
            sink_base_url: std::env::var("LABFEED_SINK_URL").ok().filter(|s| !s.is_empty()),
            sink_timeout_secs: std::env::var("LABFEED_SINK_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SINK_TIMEOUT_SECS),
            time_budget_secs: std::env::var("LABFEED_TIME_BUDGET")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TIME_BUDGET_SECS),
            row_budget: std::env::var("LABFEED_ROW_BUDGET")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_ROW_BUDGET),
            header_mode: match std::env::var("LABFEED_FIXED_COLUMNS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false)
            {
                true => HeaderMode::Fixed,
                false => HeaderMode::Detect,
            },
            data_root,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.row_budget == 0 {
            anyhow::bail!("Row budget must be greater than 0");
        }

        if self.time_budget_secs == 0 {
            anyhow::bail!("Time budget must be greater than 0");
        }

        if self.sink_timeout_secs == 0 {
            anyhow::bail!("Sink timeout must be greater than 0");
        }

        if let Some(url) = &self.sink_base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("Sink URL must start with http:// or https://, got: {}", url);
            }
        }

        Ok(())
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_secs)
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }
}
