//! CLI command implementations

pub mod init;
pub mod run;
pub mod status;
pub mod upload;

use anyhow::{Context, Result};
use labfeed_ingest::dispatch::{Dispatcher, ResultSink};
use labfeed_ingest::{IngestConfig, JsonlRecordStore};
use std::path::Path;
use std::sync::Arc;

/// Load the ingest configuration, with an explicit data root overriding the
/// environment. The state directory and store path follow the root unless
/// set individually.
pub fn load_config(data_root: Option<&Path>) -> Result<IngestConfig> {
    let mut config = IngestConfig::load()?;

    if let Some(root) = data_root {
        config.data_root = root.to_path_buf();
        if std::env::var("LABFEED_STATE_DIR").is_err() {
            config.state_dir = root.join("state");
        }
        if std::env::var("LABFEED_STORE_PATH").is_err() {
            config.store_path = root.join("reports.jsonl");
        }
    }

    config.validate()?;
    Ok(config)
}

/// Build the dispatcher over the JSON-lines record store, with the remote
/// result sink attached when one is configured.
pub fn build_dispatcher(config: &IngestConfig) -> Result<Dispatcher> {
    let store = Arc::new(
        JsonlRecordStore::open(&config.store_path)
            .with_context(|| format!("Failed to open record store {}", config.store_path.display()))?,
    );

    match &config.sink_base_url {
        Some(url) => {
            let sink = ResultSink::new(url.clone(), config.sink_timeout())?;
            Ok(Dispatcher::with_sink(store, sink))
        },
        None => Ok(Dispatcher::new(store)),
    }
}
