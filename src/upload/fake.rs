//! In-memory upload backend shared by the engine and queue tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{AlbumHandle, UploadBackend, UploadConfig, UploadError};
use crate::icloud::error::ICloudError;
use crate::retry::RetryPolicy;

/// Albums by name, a set of file names that fail.
#[derive(Default)]
pub(crate) struct FakeBackend {
    pub(crate) albums: Mutex<Vec<AlbumHandle>>,
    pub(crate) create_fails: bool,
    /// Album creation succeeds but the album never becomes visible.
    pub(crate) create_invisible: bool,
    pub(crate) failing_files: HashSet<String>,
    pub(crate) transient_failures: AtomicUsize,
    /// Album links rejected before links start succeeding.
    pub(crate) link_failures: AtomicUsize,
    /// Cancelled from inside the first upload call.
    pub(crate) cancel_on_upload: Option<CancellationToken>,
    pub(crate) uploads: AtomicUsize,
    pub(crate) creates: AtomicUsize,
    pub(crate) finds: AtomicUsize,
    pub(crate) links: Mutex<Vec<(String, String)>>,
}

impl FakeBackend {
    pub(crate) fn with_album(name: &str, record_name: &str) -> Self {
        let backend = Self::default();
        backend.albums.lock().unwrap().push(AlbumHandle {
            name: name.into(),
            record_name: record_name.into(),
        });
        backend
    }

    pub(crate) fn failing(names: &[&str]) -> Self {
        Self {
            failing_files: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    pub(crate) fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

fn rejected(reason: &str, code: &str) -> UploadError {
    ICloudError::Api {
        reason: reason.into(),
        code: code.into(),
    }
    .into()
}

#[async_trait]
impl UploadBackend for FakeBackend {
    async fn find_album(&self, name: &str) -> Result<Option<AlbumHandle>, UploadError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .albums
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.name == name)
            .cloned())
    }

    async fn create_album(&self, name: &str) -> Result<(), UploadError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.create_fails {
            return Err(rejected("denied", "ACCESS_DENIED"));
        }
        if !self.create_invisible {
            self.albums.lock().unwrap().push(AlbumHandle {
                name: name.to_string(),
                record_name: format!("REC-{}", name),
            });
        }
        Ok(())
    }

    async fn upload_file(&self, path: &Path) -> Result<String, UploadError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_upload {
            token.cancel();
        }
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ICloudError::Http {
                status: 503,
                body: String::new(),
            }
            .into());
        }
        if self.failing_files.contains(&name) {
            return Err(rejected("rejected", "BAD_REQUEST"));
        }
        Ok(format!("ASSET-{}", name))
    }

    async fn add_to_album(&self, asset_id: &str, album: &AlbumHandle) -> Result<(), UploadError> {
        if self
            .link_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(rejected("conflict", "CONFLICT"));
        }
        self.links
            .lock()
            .unwrap()
            .push((asset_id.to_string(), album.record_name.clone()));
        Ok(())
    }

    fn album_settle_delay(&self) -> Duration {
        Duration::ZERO
    }
}

pub(crate) fn config(album: Option<&str>) -> UploadConfig {
    UploadConfig {
        album: album.map(str::to_string),
        concurrency: 3,
        dry_run: false,
        no_progress_bar: true,
        retry: RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        },
    }
}

/// Write a small file for each name under `dir`.
pub(crate) fn files(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|n| {
            let p = dir.join(n);
            std::fs::write(&p, b"jpeg").unwrap();
            p
        })
        .collect()
}
