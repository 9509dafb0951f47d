//! Labfeed Ingestion Pipeline
//!
//! Directory-staged ingestion of laboratory-result CSV files: stage,
//! parse, group, validate, dispatch, then archive or quarantine.
//!
//! # Overview
//!
//! Files move through four stage directories (`incoming`, `processing`,
//! `archive`, `failed`) under one root; the move into `processing` is the
//! claim that keeps concurrent workers off the same file. Rows are grouped
//! by pack reference, folded into one [`models::LabReport`] per pack,
//! validated, and dispatched to a [`dispatch::RecordStore`] plus an
//! optional HTTP result sink. Two front ends share that pipeline:
//!
//! - [`worker::IntakeWorker`] processes a whole file in one pass under a
//!   wall-clock budget.
//! - [`chunked::ChunkedUploadDriver`] works a file in row-budget slices,
//!   resumable across invocations via [`state::ResumableJobState`].
//!
//! # Example
//!
//! ```no_run
//! use labfeed_ingest::dispatch::Dispatcher;
//! use labfeed_ingest::stage::StageManager;
//! use labfeed_ingest::store::MemoryRecordStore;
//! use labfeed_ingest::worker::IntakeWorker;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let stages = StageManager::new("./data");
//! let dispatcher = Dispatcher::new(Arc::new(MemoryRecordStore::new()));
//! let worker = IntakeWorker::new(stages, dispatcher, Duration::from_secs(270));
//!
//! if let Some(report) = worker.run_next().await? {
//!     println!("{}", report.summary_line());
//! }
//! # Ok(())
//! # }
//! ```

pub mod chunked;
pub mod columns;
pub mod config;
pub mod dispatch;
pub mod grouper;
pub mod mapper;
pub mod models;
pub mod notice;
pub mod reader;
pub mod stage;
pub mod state;
pub mod store;
pub mod validator;
pub mod worker;

// Re-export the types most callers wire together
pub use chunked::{ChunkOutcome, ChunkedUploadDriver};
pub use config::IngestConfig;
pub use dispatch::{DispatchResult, Dispatcher, RecordStore, ResultSink};
pub use models::{JobSummary, LabReport, StoredReport, Submitter};
pub use stage::{Stage, StageManager};
pub use state::{JobStateStore, JsonFileStateStore, ResumableJobState};
pub use store::{JsonlRecordStore, MemoryRecordStore};
pub use worker::{Disposition, IntakeReport, IntakeWorker};
