use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{AuthArgs, ListArgs, RetryArgs, UploadArgs, UploadTuningArgs};
use crate::retry::RetryPolicy;
use crate::types::{Domain, MediaFilter};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Account, session and state locations shared by every command.
#[derive(Clone)]
pub struct AccountConfig {
    pub username: String,
    pub password: Option<String>,
    pub cookie_directory: PathBuf,
    pub domain: Domain,
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("cookie_directory", &self.cookie_directory)
            .field("domain", &self.domain)
            .finish()
    }
}

impl AccountConfig {
    pub fn from_args(args: &AuthArgs) -> Self {
        Self {
            username: args.username.clone(),
            password: args.password.clone().filter(|p| !p.is_empty()),
            cookie_directory: expand_tilde(&args.cookie_directory),
            domain: args.domain,
        }
    }

    /// Location of the upload state database for this account.
    pub fn state_db_path(&self) -> PathBuf {
        state_db_path(&self.cookie_directory, &self.username)
    }
}

pub(crate) fn state_db_path(cookie_directory: &Path, username: &str) -> PathBuf {
    cookie_directory.join(format!(
        "{}.uploads.db",
        crate::auth::session::sanitize_username(username)
    ))
}

/// Settings for the `list` report.
#[derive(Debug, Clone)]
pub struct ListConfig {
    pub account: AccountConfig,
    pub media_type: MediaFilter,
    pub min_size_bytes: Option<u64>,
    pub limit: Option<usize>,
    pub no_progress_bar: bool,
}

impl ListConfig {
    pub fn from_cli(args: ListArgs, no_progress_bar: bool) -> anyhow::Result<Self> {
        let min_size_bytes = match args.min_size {
            Some(mb) if mb.is_nan() || mb < 0.0 => {
                anyhow::bail!("--min-size must be a non-negative number of MB, got {}", mb)
            }
            Some(mb) if mb > 0.0 => Some(mb_to_bytes(mb)),
            _ => None,
        };

        Ok(Self {
            account: AccountConfig::from_args(&args.auth),
            media_type: args.media_type,
            min_size_bytes,
            limit: args.limit.filter(|n| *n > 0),
            no_progress_bar,
        })
    }
}

/// Settings for `upload` and `retry-failed`.
#[derive(Debug, Clone)]
pub struct UploadRunConfig {
    pub account: AccountConfig,
    /// Directory to scan; `None` for `retry-failed`, which works from the state DB.
    pub directory: Option<PathBuf>,
    pub album: Option<String>,
    pub threads: u16,
    pub retry: RetryPolicy,
    pub dry_run: bool,
    pub no_progress_bar: bool,
}

impl UploadRunConfig {
    pub fn from_upload_args(args: UploadArgs, no_progress_bar: bool) -> anyhow::Result<Self> {
        let mut cfg = Self::build(&args.auth, &args.tuning, no_progress_bar)?;
        cfg.directory = Some(expand_tilde(&args.directory));
        cfg.dry_run = args.dry_run;
        Ok(cfg)
    }

    pub fn from_retry_args(args: RetryArgs, no_progress_bar: bool) -> anyhow::Result<Self> {
        Self::build(&args.auth, &args.tuning, no_progress_bar)
    }

    fn build(
        auth: &AuthArgs,
        tuning: &UploadTuningArgs,
        no_progress_bar: bool,
    ) -> anyhow::Result<Self> {
        if tuning.threads == 0 {
            anyhow::bail!("--threads must be at least 1");
        }
        let album = tuning
            .album
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);

        Ok(Self {
            account: AccountConfig::from_args(auth),
            directory: None,
            album,
            threads: tuning.threads,
            retry: RetryPolicy {
                max_retries: tuning.max_retries,
                base_delay: Duration::from_secs(tuning.retry_delay),
                max_delay: Duration::from_secs(60),
            },
            dry_run: false,
            no_progress_bar,
        })
    }
}

fn mb_to_bytes(mb: f64) -> u64 {
    (mb * BYTES_PER_MB).ceil() as u64
}

/// Expand `~/` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
