//! icloud-media-rs: list iCloud Photos media by size and upload local JPEG
//! folders with resumable per-file bookkeeping.
//!
//! Authentication uses SRP-6a with Apple's custom variant, followed by an
//! optional 2FA prompt. Every discovered file gets a row in a SQLite work
//! queue, so an interrupted or partly failed upload run picks up where it
//! left off.

#![warn(clippy::all)]

mod auth;
mod cli;
mod config;
mod icloud;
mod listing;
mod logging;
pub mod retry;
mod scan;
mod shutdown;
mod state;
mod types;
mod upload;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use auth::AuthResult;
use cli::Command;
use config::{AccountConfig, ListConfig, UploadRunConfig};
use icloud::photos::{PhotosService, PhotosSession, ServiceParams};
use retry::RetryPolicy;
use state::StateDb;
use upload::UploadConfig;

/// Sign in; on failure log the reason and return `None`.
async fn sign_in(account: &AccountConfig) -> Option<AuthResult> {
    let password_provider = {
        let pw = account.password.clone();
        let username = account.username.clone();
        move || -> Option<String> {
            pw.clone().or_else(|| {
                tokio::task::block_in_place(|| {
                    rpassword::prompt_password(format!("Enter iCloud password for {}: ", username))
                        .ok()
                })
            })
        }
    };

    tracing::info!(
        domain = account.domain.as_str(),
        "Authenticating to iCloud as {}",
        account.username
    );
    match auth::authenticate(account, &password_provider).await {
        Ok(result) => Some(result),
        Err(e) => {
            tracing::error!("{:#}", e);
            tracing::error!("Authentication failed. Exiting.");
            None
        }
    }
}

async fn connect_photos(auth: &AuthResult, retry: RetryPolicy) -> anyhow::Result<PhotosService> {
    let ck_url = auth
        .data
        .ckdatabase_url()
        .ok_or_else(|| anyhow::anyhow!("Account has no ckdatabasews web service"))?;
    let params = ServiceParams {
        client_id: auth.session.get("client_id").unwrap_or_default().to_string(),
        dsid: auth.data.dsid().map(str::to_string),
    };
    let session: Arc<dyn PhotosSession> = Arc::new(auth.session.http_client());

    tracing::info!("Initializing photos service...");
    PhotosService::new(ck_url, auth.data.upload_url(), session, params, retry)
        .await
        .context("Failed to initialize photos service")
}

/// Open the state DB, or continue untracked if it cannot be opened.
async fn open_state_db(path: &Path) -> Option<Arc<dyn StateDb>> {
    match state::SqliteStateDb::open(path).await {
        Ok(db) => {
            tracing::debug!("State database opened at {}", path.display());
            Some(Arc::new(db) as Arc<dyn StateDb>)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to open state database at {}: {}. Continuing without state tracking.",
                path.display(),
                e
            );
            None
        }
    }
}

fn exit_code(outcome: &upload::UploadOutcome) -> ExitCode {
    if outcome.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn run_list(config: ListConfig) -> anyhow::Result<ExitCode> {
    let Some(auth) = sign_in(&config.account).await else {
        return Ok(ExitCode::FAILURE);
    };
    let photos = connect_photos(&auth, RetryPolicy::default()).await?;

    let entries = listing::fetch_media(&photos, config.media_type, config.no_progress_bar)
        .await
        .context("Failed to fetch media from iCloud")?;
    let report = listing::build_report(entries, config.min_size_bytes, config.limit);

    print!("{}", report.render_summary());
    print!("{}", report.render_table());
    Ok(ExitCode::SUCCESS)
}

async fn run_upload(config: UploadRunConfig) -> anyhow::Result<ExitCode> {
    let directory = config
        .directory
        .clone()
        .ok_or_else(|| anyhow::anyhow!("upload needs a directory"))?;

    let scanned = {
        let dir = directory.clone();
        tokio::task::spawn_blocking(move || scan::scan_directory(&dir)).await??
    };
    if scanned.is_empty() {
        tracing::error!("No JPEG photos found to upload. Exiting.");
        return Ok(ExitCode::FAILURE);
    }
    let paths: Vec<PathBuf> = scanned.iter().map(|f| f.path.clone()).collect();
    let db_path = config.account.state_db_path();

    if config.dry_run {
        // Consult the queue when one exists, never create or modify it.
        let todo = if db_path.exists() {
            match state::SqliteStateDb::open_read_only(&db_path).await {
                Ok(db) => db.todo(&paths).await?,
                Err(e) => {
                    tracing::warn!("Could not read state database {}: {}", db_path.display(), e);
                    paths
                }
            }
        } else {
            paths
        };
        upload::report_dry_run(&todo, config.album.as_deref());
        return Ok(ExitCode::SUCCESS);
    }

    let state_db = open_state_db(&db_path).await;
    let todo = match &state_db {
        Some(db) => upload::upload_queue(db.as_ref(), &scanned)
            .await
            .context("Failed to record discovered files")?,
        None => paths,
    };
    if todo.is_empty() {
        tracing::info!("All photos in {} are already uploaded", directory.display());
        return Ok(ExitCode::SUCCESS);
    }

    let Some(auth) = sign_in(&config.account).await else {
        return Ok(ExitCode::FAILURE);
    };
    let photos = connect_photos(&auth, config.retry).await?;
    let shutdown_token = shutdown::install_signal_handler()?;

    let outcome = upload::upload_photos(
        &photos,
        todo,
        &UploadConfig::from(&config),
        state_db.as_deref(),
        shutdown_token,
    )
    .await?;
    Ok(exit_code(&outcome))
}

async fn run_retry_failed(config: UploadRunConfig) -> anyhow::Result<ExitCode> {
    let db_path = config.account.state_db_path();
    if !db_path.exists() {
        println!("No state database found at {}", db_path.display());
        println!("Run an upload first to create the database.");
        return Ok(ExitCode::SUCCESS);
    }

    let db: Arc<dyn StateDb> = Arc::new(state::SqliteStateDb::open(&db_path).await?);
    let paths = upload::retry_queue(db.as_ref()).await?;
    if paths.is_empty() {
        tracing::info!("No failed uploads to retry");
        return Ok(ExitCode::SUCCESS);
    }

    let Some(auth) = sign_in(&config.account).await else {
        return Ok(ExitCode::FAILURE);
    };
    let photos = connect_photos(&auth, config.retry).await?;

    let count = db.reset_failed().await?;
    tracing::info!(count, "Reset failed uploads to pending");

    let shutdown_token = shutdown::install_signal_handler()?;
    let outcome = upload::upload_photos(
        &photos,
        paths,
        &UploadConfig::from(&config),
        Some(db.as_ref()),
        shutdown_token,
    )
    .await?;
    Ok(exit_code(&outcome))
}

async fn run_status(args: cli::StatusArgs) -> anyhow::Result<ExitCode> {
    let account = AccountConfig::from_args(&args.auth);
    let db_path = account.state_db_path();

    if !db_path.exists() {
        println!("No state database found at {}", db_path.display());
        println!("Run an upload first to create the database.");
        return Ok(ExitCode::SUCCESS);
    }

    let db = state::SqliteStateDb::open(&db_path).await?;
    let summary = db.get_summary().await?;

    println!("State Database: {}", db.path().display());
    println!();
    println!("Uploads:");
    println!("  Total:     {}", summary.total);
    println!("  Completed: {}", summary.completed);
    println!("  Pending:   {}", summary.pending);
    println!("  Failed:    {}", summary.failed);
    if summary.outstanding() > 0 {
        println!("  {} files will be uploaded on the next run", summary.outstanding());
    }
    println!();

    if let Some(started) = &summary.last_run_started {
        println!(
            "Last run started:   {}",
            started.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(completed) = &summary.last_run_completed {
        println!(
            "Last run completed: {}",
            completed.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    if args.failed && summary.failed > 0 {
        println!();
        println!("Failed uploads:");
        for record in db.get_failed().await? {
            println!(
                "  {} (attempts: {}) - {}",
                record.path.display(),
                record.attempts,
                record.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_reset_state(args: cli::ResetStateArgs) -> anyhow::Result<ExitCode> {
    let db_path = AccountConfig::from_args(&args.auth).state_db_path();

    if !db_path.exists() {
        println!("No state database found at {}", db_path.display());
        return Ok(ExitCode::SUCCESS);
    }

    if !args.yes {
        println!("This will delete the upload state database at:");
        println!("  {}", db_path.display());
        println!("Every file will be uploaded again on the next run.");
        println!();
        print!("Are you sure? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    std::fs::remove_file(&db_path)
        .with_context(|| format!("Failed to delete {}", db_path.display()))?;
    println!("State database deleted.");

    let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
    let _ = std::fs::remove_file(db_path.with_extension("db-shm"));

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = cli::Cli::parse();

    let log_file = cli.effective_log_file();
    logging::init_logging(logging::LogConfig {
        level: cli.effective_log_level(),
        file: log_file.as_deref(),
    })?;

    let no_progress_bar = cli.no_progress_bar;
    match cli.command {
        Command::List(args) => run_list(ListConfig::from_cli(args, no_progress_bar)?).await,
        Command::Upload(args) => {
            run_upload(UploadRunConfig::from_upload_args(args, no_progress_bar)?).await
        }
        Command::RetryFailed(args) => {
            run_retry_failed(UploadRunConfig::from_retry_args(args, no_progress_bar)?).await
        }
        Command::Status(args) => run_status(args).await,
        Command::ResetState(args) => run_reset_state(args).await,
    }
}
