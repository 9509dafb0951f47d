//! Labfeed CLI Library
//!
//! Operator command line for the laboratory result feed:
//!
//! - **Setup**: Create the stage directories (`labfeed init`)
//! - **Automated intake**: Drain the incoming stage (`labfeed run`)
//! - **Interactive uploads**: Chunked, resumable processing of one file
//!   (`labfeed upload`)
//! - **Inspection**: Files per stage and suspended jobs (`labfeed status`)

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// Labfeed - laboratory result feed ingestion
#[derive(Parser, Debug)]
#[command(name = "labfeed")]
#[command(author, version, about = "Laboratory result feed ingestion", long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Root directory holding the stage directories
    #[arg(long, env = "LABFEED_DATA_ROOT", global = true)]
    pub data_root: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the stage directories and supporting state locations
    Init,

    /// Process files waiting in the incoming stage
    Run {
        /// Stop after this many files (default: drain incoming)
        #[arg(long)]
        max_files: Option<usize>,
    },

    /// Upload a CSV file and process it in resumable chunks
    Upload {
        /// CSV file to upload
        #[arg(required_unless_present = "resume")]
        file: Option<PathBuf>,

        /// Resume a previously suspended upload job
        #[arg(long, conflicts_with = "file")]
        resume: Option<Uuid>,

        /// Suspend after this many chunks instead of running to completion
        #[arg(long)]
        chunks: Option<usize>,

        /// Submit with admin access (accepts admin-only columns)
        #[arg(long)]
        admin: bool,
    },

    /// Show files per stage and suspended upload jobs
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_requires_file_or_resume() {
        assert!(Cli::try_parse_from(["labfeed", "upload"]).is_err());
        assert!(Cli::try_parse_from(["labfeed", "upload", "feed.csv"]).is_ok());

        let job_id = Uuid::new_v4().to_string();
        assert!(Cli::try_parse_from(["labfeed", "upload", "--resume", job_id.as_str()]).is_ok());
        assert!(
            Cli::try_parse_from(["labfeed", "upload", "feed.csv", "--resume", job_id.as_str()])
                .is_err()
        );
    }

    #[test]
    fn test_data_root_is_global() {
        let cli = Cli::try_parse_from(["labfeed", "run", "--data-root", "/srv/feed"]).unwrap();
        assert_eq!(cli.data_root, Some(PathBuf::from("/srv/feed")));
    }
}
