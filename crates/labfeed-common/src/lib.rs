//! Labfeed Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging setup for the labfeed workspace.
//!
//! # Overview
//!
//! This crate provides functionality used across all labfeed workspace members:
//!
//! - **Error Handling**: The [`FeedError`] taxonomy and [`Result`] alias
//! - **Logging**: Configuration and initialization of the tracing subscriber
//!
//! # Example
//!
//! ```no_run
//! use labfeed_common::{FeedError, Result};
//!
//! fn claim_stage(dir: &str) -> Result<()> {
//!     if !std::path::Path::new(dir).is_dir() {
//!         return Err(FeedError::StageUnavailable {
//!             stage: dir.to_string(),
//!             reason: "not a directory".to_string(),
//!         });
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{FeedError, Result};
