//! Types for the upload state database.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Where a file stands in the upload work-queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadStatus {
    /// Discovered but not yet uploaded.
    Pending,
    /// Uploaded successfully; never re-queued unless the state is reset.
    Completed,
    /// Last upload attempt failed; re-queued on the next run.
    Failed,
}

impl UploadStatus {
    /// Convert to the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse from the string stored in the database.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the `uploads` table.
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub path: PathBuf,
    /// iCloud `CPLAsset` record name returned by the upload.
    pub asset_id: Option<String>,
    /// Album the file was added to, if any.
    pub album: Option<String>,
    pub last_error: Option<String>,
    pub size_bytes: u64,
    pub discovered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of failed attempts since the last reset.
    pub attempts: u32,
    pub status: UploadStatus,
}

/// Counters for a single `upload` / `retry-failed` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadRunStats {
    pub files_queued: u64,
    pub files_uploaded: u64,
    pub files_failed: u64,
    /// Whether the run stopped early on a shutdown signal.
    pub interrupted: bool,
}

/// Aggregate view used by the `status` command.
#[derive(Debug, Clone, Default)]
pub struct UploadSummary {
    pub total: u64,
    pub completed: u64,
    pub pending: u64,
    pub failed: u64,
    pub last_run_started: Option<DateTime<Utc>>,
    pub last_run_completed: Option<DateTime<Utc>>,
}

impl UploadSummary {
    /// Files that a plain `upload` of the same tree would still send.
    pub fn outstanding(&self) -> u64 {
        self.pending + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_status_round_trip() {
        for status in [
            UploadStatus::Pending,
            UploadStatus::Completed,
            UploadStatus::Failed,
        ] {
            assert_eq!(UploadStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_upload_status_from_invalid() {
        assert_eq!(UploadStatus::from_str("downloaded"), None);
    }

    #[test]
    fn test_summary_outstanding() {
        let summary = UploadSummary {
            total: 10,
            completed: 6,
            pending: 3,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(summary.outstanding(), 4);
    }
}
