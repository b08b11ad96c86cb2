//! Size-sorted report over fetched media: filtering, summary and table.

use std::fmt::Write as _;

use super::{MediaEntry, MediaKind};

/// Entries selected for display plus the count before size filtering.
#[derive(Debug, Clone)]
pub struct Report {
    pub entries: Vec<MediaEntry>,
    pub total_count: usize,
}

/// Keep entries of at least `min_size_bytes`, largest first, truncated to
/// `limit`.
pub fn build_report(
    mut entries: Vec<MediaEntry>,
    min_size_bytes: Option<u64>,
    limit: Option<usize>,
) -> Report {
    let total_count = entries.len();
    if let Some(min) = min_size_bytes {
        entries.retain(|e| e.size >= min);
    }
    entries.sort_by(|a, b| b.size.cmp(&a.size));
    if let Some(limit) = limit.filter(|n| *n > 0) {
        if entries.len() > limit {
            tracing::debug!("Showing {} of {} matching files", limit, entries.len());
            entries.truncate(limit);
        }
    }
    Report {
        entries,
        total_count,
    }
}

pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} TB", size)
}

/// `HH:MM:SS`; hours are not wrapped.
pub fn format_hms(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// `MM:SS`; minutes are not wrapped.
pub fn format_ms(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

impl Report {
    fn has_videos(&self) -> bool {
        self.entries.iter().any(|e| e.kind == MediaKind::Video)
    }

    pub fn render_summary(&self) -> String {
        let shown = self.entries.len();
        let (mut photo_count, mut photo_size) = (0usize, 0u64);
        let (mut video_count, mut video_size, mut video_secs) = (0usize, 0u64, 0u64);
        for e in &self.entries {
            match e.kind {
                MediaKind::Photo => {
                    photo_count += 1;
                    photo_size += e.size;
                }
                MediaKind::Video => {
                    video_count += 1;
                    video_size += e.size;
                    video_secs += e.duration_secs.unwrap_or(0);
                }
            }
        }

        let mut out = String::from("\nMedia Summary:\n");
        if self.total_count > shown {
            let _ = writeln!(
                out,
                "Showing {} of {} total files (sorted by size)",
                shown, self.total_count
            );
        } else {
            let _ = writeln!(out, "Total files: {}", shown);
        }
        let _ = writeln!(out, "Photos: {} ({})", photo_count, format_size(photo_size));
        let _ = writeln!(out, "Videos: {} ({})", video_count, format_size(video_size));
        let _ = writeln!(out, "Total size: {}", format_size(photo_size + video_size));
        if video_count > 0 {
            let _ = writeln!(out, "Total video duration: {}", format_hms(video_secs));
        }
        out
    }

    /// Header, 80-dash rule, one row per entry. The duration column only
    /// appears when at least one video is listed.
    pub fn render_table(&self) -> String {
        let with_duration = self.has_videos();
        let mut out = String::from("\nDetailed Media Listing (sorted by size):\n");
        if with_duration {
            let _ = writeln!(
                out,
                "{:>10} {:>8} {:>8} {:>19} Filename",
                "Size", "Type", "Duration", "Created"
            );
        } else {
            let _ = writeln!(out, "{:>10} {:>8} {:>19} Filename", "Size", "Type", "Created");
        }
        let _ = writeln!(out, "{}", "-".repeat(80));

        for e in &self.entries {
            let size = format_size(e.size);
            if with_duration {
                let duration = match e.kind {
                    MediaKind::Video => format_ms(e.duration_secs.unwrap_or(0)),
                    MediaKind::Photo => String::new(),
                };
                let _ = writeln!(
                    out,
                    "{:>10} {:>8} {:>8} {} {}",
                    size,
                    e.kind.as_str(),
                    duration,
                    e.created,
                    e.filename
                );
            } else {
                let _ = writeln!(
                    out,
                    "{:>10} {:>8} {} {}",
                    size,
                    e.kind.as_str(),
                    e.created,
                    e.filename
                );
            }
        }
        out
    }
}
