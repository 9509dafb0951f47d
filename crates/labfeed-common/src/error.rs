//! Error types for labfeed
//!
//! Only failures that abort a whole unit of work live here. Bad rows and
//! rejected groups are ordinary data (flagged rows, validation outcomes,
//! dispatch results) and never surface as a [`FeedError`].

use thiserror::Error;

/// Result type alias for labfeed operations
pub type Result<T> = std::result::Result<T, FeedError>;

/// Main error type for labfeed
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stage directory could not be created or is not writable. Fatal for
    /// the current invocation; a later retry may succeed.
    #[error("Stage '{stage}' unavailable: {reason}")]
    StageUnavailable { stage: String, reason: String },

    /// The anchor column is absent after header mapping, so no row can be
    /// attributed to a pack. Fatal for the file; it routes to quarantine.
    #[error("Required column '{0}' not found in header")]
    MissingAnchorColumn(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Job state error: {0}")]
    JobState(String),
}
