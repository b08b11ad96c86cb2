//! Local directory scanning for uploadable photos.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

/// Extensions accepted for upload. iCloud's upload endpoint only takes JPEGs.
const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Directory not found: {0}")]
    NotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// A discovered file and its size at scan time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Whether `path` has a JPEG extension (case-insensitive).
pub fn is_photo_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            PHOTO_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
}

/// Recursively collect JPEG files under `directory`, sorted by path.
///
/// Entries that cannot be read are logged and skipped rather than failing
/// the whole scan.
pub fn scan_directory(directory: &Path) -> Result<Vec<ScannedFile>, ScanError> {
    if !directory.exists() {
        return Err(ScanError::NotFound(directory.to_path_buf()));
    }
    if !directory.is_dir() {
        return Err(ScanError::NotADirectory(directory.to_path_buf()));
    }

    tracing::info!("Scanning directory recursively: {}", directory.display());

    let mut seen = BTreeSet::new();
    let mut files = Vec::new();
    for entry in WalkDir::new(directory).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_photo_file(entry.path()) {
            continue;
        }
        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                tracing::warn!("Cannot stat {}: {}", entry.path().display(), e);
                continue;
            }
        };
        let path = entry.into_path();
        if seen.insert(path.clone()) {
            files.push(ScannedFile { path, size });
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::info!("Found {} JPEG photos", files.len());
    Ok(files)
}
