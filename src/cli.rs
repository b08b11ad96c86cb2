use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::types::*;

#[derive(Parser, Debug)]
#[command(
    name = "icloud-media-rs",
    about = "List iCloud Photos media by size and upload local JPEG folders"
)]
pub struct Cli {
    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Enable verbose logging (same as --log-level debug)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file.
    /// `upload` and `retry-failed` default to `icloud_upload.log`.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Disable progress bars
    #[arg(long, global = true)]
    pub no_progress_bar: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List photos and videos in the account, sorted by size
    List(ListArgs),
    /// Upload JPEG photos from a directory (scanned recursively)
    Upload(UploadArgs),
    /// Upload again every file recorded as failed
    RetryFailed(RetryArgs),
    /// Show upload bookkeeping for an account
    Status(StatusArgs),
    /// Delete the upload state database for an account
    ResetState(ResetStateArgs),
}

/// Account and session options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct AuthArgs {
    /// Apple ID email address
    #[arg(short = 'u', long)]
    pub username: String,

    /// iCloud password (if not provided, will prompt).
    /// WARNING: passing via --password is visible in process listings.
    /// Prefer the ICLOUD_PASSWORD environment variable instead.
    #[arg(short = 'p', long, env = "ICLOUD_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// iCloud domain (com or cn)
    #[arg(long, value_enum, default_value = "com")]
    pub domain: Domain,

    /// Directory for cookies, session data and the upload state database
    #[arg(long, default_value = "~/.icloud-media-rs")]
    pub cookie_directory: String,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    /// Type of media to list
    #[arg(short = 't', long = "type", value_enum, default_value = "all")]
    pub media_type: MediaFilter,

    /// Minimum size in MB to include in the listing
    #[arg(short = 'm', long)]
    pub min_size: Option<f64>,

    /// Limit the number of records displayed
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

/// Tuning shared by `upload` and `retry-failed`.
#[derive(Args, Debug, Clone)]
pub struct UploadTuningArgs {
    /// Album to upload to (if not specified, uploads to Camera Roll)
    #[arg(short = 'a', long)]
    pub album: Option<String>,

    /// Number of concurrent uploads
    #[arg(short = 't', long, default_value_t = 5)]
    pub threads: u16,

    /// Retries per file for transient errors
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,

    /// Base delay in seconds between retries
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,
}

#[derive(Args, Debug, Clone)]
pub struct UploadArgs {
    /// Directory containing photos to upload (scanned recursively)
    pub directory: String,

    #[command(flatten)]
    pub auth: AuthArgs,

    #[command(flatten)]
    pub tuning: UploadTuningArgs,

    /// Show what would be uploaded without contacting iCloud
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RetryArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    #[command(flatten)]
    pub tuning: UploadTuningArgs,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    /// List every failed file with its last error
    #[arg(long)]
    pub failed: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ResetStateArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl Cli {
    /// Effective log level after applying `--verbose`.
    pub fn effective_log_level(&self) -> LogLevel {
        if self.verbose {
            LogLevel::Debug
        } else {
            self.log_level
        }
    }

    /// Log file to open, applying the upload default when none was given.
    pub fn effective_log_file(&self) -> Option<PathBuf> {
        if self.log_file.is_some() {
            return self.log_file.clone();
        }
        match self.command {
            Command::Upload(_) | Command::RetryFailed(_) => {
                Some(PathBuf::from("icloud_upload.log"))
            }
            _ => None,
        }
    }
}
