//! Upload engine: pushes queued files to iCloud with bounded concurrency and
//! writes each outcome to the state database as it arrives, so an interrupted
//! run resumes with only the unfinished files.

pub mod error;
#[cfg(test)]
mod fake;
pub mod queue;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::config::UploadRunConfig;
use crate::icloud::photos::PhotosService;
use crate::retry::{retry_with_backoff, RetryAction, RetryPolicy};
use crate::state::{StateDb, UploadRunStats};

pub use self::error::UploadError;
pub use self::queue::{retry_queue, upload_queue};

/// iCloud needs a moment before a freshly created album shows up in queries.
const ALBUM_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Subset of application config consumed by the upload engine.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub(crate) album: Option<String>,
    pub(crate) concurrency: usize,
    pub(crate) dry_run: bool,
    pub(crate) no_progress_bar: bool,
    /// Backoff for the file upload itself.
    pub(crate) retry: RetryPolicy,
}

impl From<&UploadRunConfig> for UploadConfig {
    fn from(cfg: &UploadRunConfig) -> Self {
        Self {
            album: cfg.album.clone(),
            concurrency: usize::from(cfg.threads.max(1)),
            dry_run: cfg.dry_run,
            no_progress_bar: cfg.no_progress_bar,
            retry: cfg.retry,
        }
    }
}

/// A resolved user album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumHandle {
    pub name: String,
    pub record_name: String,
}

/// What the engine needs from iCloud; faked in tests.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    async fn find_album(&self, name: &str) -> Result<Option<AlbumHandle>, UploadError>;

    async fn create_album(&self, name: &str) -> Result<(), UploadError>;

    /// Upload a file to the Camera Roll; returns the new asset's record name.
    async fn upload_file(&self, path: &Path) -> Result<String, UploadError>;

    /// Link an uploaded asset into an album. Transient errors are retried
    /// by the implementation.
    async fn add_to_album(&self, asset_id: &str, album: &AlbumHandle) -> Result<(), UploadError>;

    fn album_settle_delay(&self) -> Duration {
        ALBUM_SETTLE_DELAY
    }

    /// Look the album up by title, creating it when missing.
    async fn ensure_album(&self, name: &str) -> Result<AlbumHandle, UploadError> {
        if let Some(album) = self.find_album(name).await? {
            return Ok(album);
        }
        tracing::info!("Creating new album: {}", name);
        self.create_album(name).await?;
        tokio::time::sleep(self.album_settle_delay()).await;
        self.find_album(name)
            .await?
            .ok_or_else(|| UploadError::Album(name.to_string()))
    }
}

#[async_trait]
impl UploadBackend for PhotosService {
    async fn find_album(&self, name: &str) -> Result<Option<AlbumHandle>, UploadError> {
        let album = PhotosService::find_album(self, name).await?;
        Ok(album.and_then(|a| {
            let record_name = a.record_name()?.to_string();
            Some(AlbumHandle {
                name: a.name().to_string(),
                record_name,
            })
        }))
    }

    async fn create_album(&self, name: &str) -> Result<(), UploadError> {
        let record_name = PhotosService::create_album(self, name).await?;
        tracing::debug!("Created album {} ({})", name, record_name);
        Ok(())
    }

    async fn upload_file(&self, path: &Path) -> Result<String, UploadError> {
        Ok(PhotosService::upload_file(self, path).await?)
    }

    async fn add_to_album(&self, asset_id: &str, album: &AlbumHandle) -> Result<(), UploadError> {
        Ok(PhotosService::add_to_album(self, asset_id, &album.record_name).await?)
    }
}

/// Result of one engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOutcome {
    pub queued: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub interrupted: bool,
}

impl UploadOutcome {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    fn stats(&self) -> UploadRunStats {
        UploadRunStats {
            files_queued: self.queued as u64,
            files_uploaded: self.uploaded as u64,
            files_failed: self.failed as u64,
            interrupted: self.interrupted,
        }
    }
}

/// Returns `ProgressBar::hidden()` when disabled or stdout is not a TTY.
pub(crate) fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

/// Log what a run would upload without touching iCloud or the state DB.
pub fn report_dry_run(paths: &[PathBuf], album: Option<&str>) -> UploadOutcome {
    for path in paths {
        tracing::info!("[DRY RUN] Would upload {}", path.display());
    }
    tracing::info!("── Dry Run Summary ──");
    tracing::info!("  {} files would be uploaded", paths.len());
    tracing::info!("  destination: {}", album.unwrap_or("Camera Roll"));
    UploadOutcome {
        queued: paths.len(),
        ..Default::default()
    }
}

/// Upload `paths`, recording every outcome in `state_db` when present.
///
/// The album is resolved once up front. If that fails, every file fails with
/// the album error so the files stay queued for the next run.
pub async fn upload_photos(
    backend: &dyn UploadBackend,
    paths: Vec<PathBuf>,
    config: &UploadConfig,
    state_db: Option<&dyn StateDb>,
    shutdown_token: CancellationToken,
) -> anyhow::Result<UploadOutcome> {
    if config.dry_run {
        return Ok(report_dry_run(&paths, config.album.as_deref()));
    }
    if paths.is_empty() {
        tracing::info!("Nothing to upload");
        return Ok(UploadOutcome::default());
    }

    let started = Instant::now();
    let total = paths.len();
    match &config.album {
        Some(album) => tracing::info!("Starting upload of {} JPEG photos to album '{}'", total, album),
        None => tracing::info!("Starting upload of {} JPEG photos", total),
    }

    let run_id = match state_db {
        Some(db) => match db.start_run().await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!("Could not record upload run: {}", e);
                None
            }
        },
        None => None,
    };

    let album: Result<Option<AlbumHandle>, String> = match &config.album {
        Some(name) => match backend.ensure_album(name).await {
            Ok(handle) => Ok(Some(handle)),
            Err(e) => {
                tracing::error!("Could not find or create album: {} ({})", name, e);
                Err(name.clone())
            }
        },
        None => Ok(None),
    };

    let pb = create_progress_bar(config.no_progress_bar, total as u64);
    let album_ref = &album;
    let retry = &config.retry;

    let results = stream::iter(paths)
        .take_while(|_| std::future::ready(!shutdown_token.is_cancelled()))
        .map(|path| async move {
            let result = match album_ref {
                Ok(album) => {
                    let known_asset = uploaded_asset_id(state_db, &path).await;
                    upload_single_file(backend, &path, album.as_ref(), retry, known_asset).await
                }
                Err(name) => Err(FileFailure::new(UploadError::Album(name.clone()))),
            };
            (path, result)
        })
        .buffer_unordered(config.concurrency.max(1));
    tokio::pin!(results);

    let mut outcome = UploadOutcome {
        queued: total,
        ..Default::default()
    };
    let album_name = album.as_ref().ok().and_then(|a| a.as_ref()).map(|a| a.name.as_str());

    while let Some((path, result)) = results.next().await {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        pb.set_message(filename);

        match result {
            Ok(asset_id) => {
                outcome.uploaded += 1;
                tracing::debug!("Uploaded {} as {}", path.display(), asset_id);
                if let Some(db) = state_db {
                    if let Err(e) = db.mark_completed(&path, &asset_id, album_name).await {
                        pb.suspend(|| tracing::warn!("Failed to record upload of {}: {}", path.display(), e));
                    }
                }
            }
            Err(failure) => {
                outcome.failed += 1;
                pb.suspend(|| tracing::error!("Error uploading {}: {}", path.display(), failure.error));
                if let Some(db) = state_db {
                    let recorded = db
                        .mark_failed(&path, &failure.error.to_string(), failure.asset_id.as_deref())
                        .await;
                    if let Err(db_err) = recorded {
                        pb.suspend(|| {
                            tracing::warn!("Failed to record failure of {}: {}", path.display(), db_err)
                        });
                    }
                }
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    outcome.interrupted = outcome.uploaded + outcome.failed < total;
    if outcome.interrupted {
        tracing::info!("Shutdown requested, stopped before remaining uploads");
    }

    if let (Some(db), Some(id)) = (state_db, run_id) {
        if let Err(e) = db.complete_run(id, &outcome.stats()).await {
            tracing::warn!("Could not finish upload run record: {}", e);
        }
    }

    tracing::info!("── Summary ──");
    tracing::info!(
        "Upload complete: {} successful, {} failed",
        outcome.uploaded,
        outcome.failed
    );
    if outcome.interrupted {
        tracing::info!(
            "  {} not attempted, they stay queued",
            total - outcome.uploaded - outcome.failed
        );
    }
    tracing::info!("  elapsed: {}", format_duration(started.elapsed()));
    if outcome.has_failures() {
        tracing::info!("Check the log file for details on failed uploads");
    }

    Ok(outcome)
}

fn classify(e: &UploadError) -> RetryAction {
    if e.is_retryable() {
        RetryAction::Retry
    } else {
        RetryAction::Abort
    }
}

/// A file that did not finish. `asset_id` is set when the file reached
/// iCloud but could not be linked into the album.
struct FileFailure {
    error: UploadError,
    asset_id: Option<String>,
}

impl FileFailure {
    fn new(error: UploadError) -> Self {
        Self {
            error,
            asset_id: None,
        }
    }
}

/// Asset id left behind by an earlier run that uploaded `path` but failed
/// to link it.
async fn uploaded_asset_id(state_db: Option<&dyn StateDb>, path: &Path) -> Option<String> {
    let db = state_db?;
    match db.get_record(path).await {
        Ok(record) => record.and_then(|r| r.asset_id),
        Err(e) => {
            tracing::warn!("Could not read state for {}: {}", path.display(), e);
            None
        }
    }
}

/// Upload one file and link it into the album. A file that already has an
/// asset id only gets linked, so a failed link never re-uploads it.
async fn upload_single_file(
    backend: &dyn UploadBackend,
    path: &Path,
    album: Option<&AlbumHandle>,
    retry: &RetryPolicy,
    known_asset: Option<String>,
) -> Result<String, FileFailure> {
    let asset_id = match known_asset {
        Some(asset_id) => {
            tracing::debug!("{} already uploaded as {}", path.display(), asset_id);
            asset_id
        }
        None => {
            if tokio::fs::metadata(path).await.is_err() {
                return Err(FileFailure::new(UploadError::NotFound(path.to_path_buf())));
            }
            let label = path.display().to_string();
            retry_with_backoff(retry, &label, classify, || backend.upload_file(path))
                .await
                .map_err(FileFailure::new)?
        }
    };

    if let Some(album) = album {
        if let Err(error) = backend.add_to_album(&asset_id, album).await {
            return Err(FileFailure {
                error,
                asset_id: Some(asset_id),
            });
        }
    }
    Ok(asset_id)
}

fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
