//! Picking the files a run should send, from the scan and the state DB.

use std::path::PathBuf;

use crate::scan::ScannedFile;
use crate::state::error::StateError;
use crate::state::StateDb;

/// Record a directory scan and return the files not yet uploaded, in scan
/// order.
pub async fn upload_queue(
    db: &dyn StateDb,
    scanned: &[ScannedFile],
) -> Result<Vec<PathBuf>, StateError> {
    let discovered: Vec<(PathBuf, u64)> = scanned
        .iter()
        .map(|f| (f.path.clone(), f.size))
        .collect();
    db.record_discovered(&discovered).await?;

    let paths: Vec<PathBuf> = scanned.iter().map(|f| f.path.clone()).collect();
    let todo = db.todo(&paths).await?;
    let skipped = paths.len() - todo.len();
    if skipped > 0 {
        tracing::info!("Skipping {} photos already uploaded", skipped);
    }
    Ok(todo)
}

/// Everything `retry-failed` should send: failed files plus pending ones an
/// interrupted run never reached. Sorted by path.
pub async fn retry_queue(db: &dyn StateDb) -> Result<Vec<PathBuf>, StateError> {
    let failed = db.get_failed().await?;
    let pending = db.get_pending().await?;
    if !pending.is_empty() {
        tracing::info!(
            "Retrying {} failed and {} pending uploads",
            failed.len(),
            pending.len()
        );
    }

    let mut paths: Vec<PathBuf> = failed
        .into_iter()
        .chain(pending)
        .map(|r| r.path)
        .collect();
    paths.sort();
    paths.dedup();
    Ok(paths)
}
