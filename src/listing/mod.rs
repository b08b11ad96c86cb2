//! `list` command: fetch library media and print a size-sorted report.

pub mod report;

pub use report::{build_report, format_size, Report};

use std::io::IsTerminal;
use std::time::Duration;

use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};

use crate::icloud::error::ICloudError;
use crate::icloud::photos::{PhotoAlbum, PhotoAsset, PhotosService};
use crate::types::MediaFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
        }
    }
}

/// One row of the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEntry {
    pub filename: String,
    pub size: u64,
    /// Local time, `%Y-%m-%d %H:%M:%S`.
    pub created: String,
    pub kind: MediaKind,
    pub duration_secs: Option<u64>,
}

impl MediaEntry {
    pub fn from_asset(asset: &PhotoAsset) -> Result<Self, String> {
        let filename = asset
            .filename()
            .ok_or_else(|| "asset has no filename".to_string())?;
        let is_video = asset.is_video();
        Ok(Self {
            filename,
            size: asset.size(),
            created: asset
                .asset_date()
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            kind: if is_video {
                MediaKind::Video
            } else {
                MediaKind::Photo
            },
            duration_secs: if is_video {
                Some(asset.duration_secs().unwrap_or(0))
            } else {
                None
            },
        })
    }
}

fn create_spinner(no_progress_bar: bool, message: String) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}: {pos} items [{elapsed}]") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Convert fetched assets to report rows, keeping only the requested kind.
/// Assets that cannot be converted are logged and skipped.
pub fn entries_from_assets(assets: &[PhotoAsset], filter: MediaFilter) -> Vec<MediaEntry> {
    assets
        .iter()
        .filter_map(|asset| match MediaEntry::from_asset(asset) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::error!("Error processing {}: {}", asset.id(), e);
                None
            }
        })
        .filter(|entry| match filter {
            MediaFilter::All => true,
            MediaFilter::Photos => entry.kind == MediaKind::Photo,
            MediaFilter::Videos => entry.kind == MediaKind::Video,
        })
        .collect()
}

/// Fetch media of the requested kind. Videos come from the "Videos" smart
/// folder when the library has one; everything else walks the whole library.
pub async fn fetch_media(
    service: &PhotosService,
    filter: MediaFilter,
    no_progress_bar: bool,
) -> Result<Vec<MediaEntry>, ICloudError> {
    tracing::info!("Fetching media information from iCloud...");

    if filter == MediaFilter::Videos {
        match service.smart_folder("Videos") {
            Some(videos) => {
                tracing::info!("Using Videos smart folder for efficient video fetching");
                match fetch_album(&videos, filter, no_progress_bar).await {
                    Ok(entries) => return Ok(entries),
                    Err(e) => tracing::warn!(
                        "Videos smart folder not available ({}), falling back to processing all media",
                        e
                    ),
                }
            }
            None => tracing::warn!(
                "Videos smart folder not available, falling back to processing all media"
            ),
        }
    }

    fetch_album(&service.all(), filter, no_progress_bar).await
}

async fn fetch_album(
    album: &PhotoAlbum,
    filter: MediaFilter,
    no_progress_bar: bool,
) -> Result<Vec<MediaEntry>, ICloudError> {
    let pb = create_spinner(no_progress_bar, format!("Fetching {}", filter.as_str()));
    let assets = album
        .photos(|n| pb.set_position(n as u64))
        .await;
    pb.finish_and_clear();
    let assets = assets?;
    tracing::debug!("Fetched {} assets from {}", assets.len(), album);
    Ok(entries_from_assets(&assets, filter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icloud::photos::cloudkit::Record;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        serde_json::from_value(value).unwrap()
    }

    fn asset(name: &str, filename: Option<&str>, item_type: &str, size: u64, duration: Option<f64>) -> PhotoAsset {
        let mut fields = json!({
            "itemType": {"value": item_type},
            "resOriginalRes": {"value": {"size": size}},
        });
        if let Some(f) = filename {
            fields["filenameEnc"] = json!({"value": f, "type": "STRING"});
        }
        if let Some(d) = duration {
            fields["duration"] = json!({"value": d});
        }
        PhotoAsset::new(
            record(json!({"recordName": name, "recordType": "CPLMaster", "fields": fields})),
            record(json!({"recordName": format!("{}-A", name), "recordType": "CPLAsset",
                "fields": {"assetDate": {"value": 1_700_000_000_000i64}}})),
        )
    }

    #[test]
    fn test_entry_from_photo() {
        let entry = MediaEntry::from_asset(&asset("M1", Some("IMG_1.JPG"), "public.jpeg", 2048, None)).unwrap();
        assert_eq!(entry.filename, "IMG_1.JPG");
        assert_eq!(entry.size, 2048);
        assert_eq!(entry.kind, MediaKind::Photo);
        assert_eq!(entry.duration_secs, None);
        let expected = Local
            .timestamp_opt(1_700_000_000, 0)
            .unwrap()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        assert_eq!(entry.created, expected);
    }

    #[test]
    fn test_entry_from_video_without_duration() {
        let entry =
            MediaEntry::from_asset(&asset("M2", Some("clip.mov"), "com.apple.quicktime-movie", 1, None)).unwrap();
        assert_eq!(entry.kind, MediaKind::Video);
        assert_eq!(entry.duration_secs, Some(0));
    }

    #[test]
    fn test_entries_filter_and_skip_broken() {
        let assets = vec![
            asset("M1", Some("a.jpg"), "public.jpeg", 1, None),
            asset("M2", Some("b.mov"), "com.apple.quicktime-movie", 2, Some(12.0)),
            asset("M3", None, "public.jpeg", 3, None),
        ];
        assert_eq!(entries_from_assets(&assets, MediaFilter::All).len(), 2);

        let photos = entries_from_assets(&assets, MediaFilter::Photos);
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].filename, "a.jpg");

        let videos = entries_from_assets(&assets, MediaFilter::Videos);
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].duration_secs, Some(12));
    }

    fn page(records: Vec<serde_json::Value>) -> serde_json::Value {
        json!({ "records": records })
    }

    fn indexed() -> serde_json::Value {
        page(vec![json!({"recordName": "_", "fields": {"state": {"value": "FINISHED"}}})])
    }

    fn master_and_asset(name: &str, filename: &str, item_type: &str) -> Vec<serde_json::Value> {
        vec![
            json!({"recordName": format!("{}-A", name), "recordType": "CPLAsset",
                "fields": {"masterRef": {"value": {"recordName": name}}}}),
            json!({"recordName": name, "recordType": "CPLMaster", "fields": {
                "filenameEnc": {"value": filename, "type": "STRING"},
                "itemType": {"value": item_type},
                "resOriginalRes": {"value": {"size": 10}},
            }}),
        ]
    }

    #[tokio::test]
    async fn test_fetch_videos_uses_smart_folder() {
        use crate::icloud::photos::session::fake::FakeSession;
        use crate::icloud::photos::ServiceParams;
        use crate::retry::RetryPolicy;
        use std::sync::Arc;

        let session = Arc::new(FakeSession::new(vec![
            indexed(),
            page(master_and_asset("M1", "clip.mov", "com.apple.quicktime-movie")),
            page(vec![]),
        ]));
        let service = PhotosService::new(
            "https://ck",
            None,
            session.clone(),
            ServiceParams::default(),
            RetryPolicy::none(),
        )
            .await
            .unwrap();
        let entries = fetch_media(&service, MediaFilter::Videos, true).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].filename, "clip.mov");
        let (_, body) = session.request(1);
        assert_eq!(body["query"]["recordType"], "CPLAssetAndMasterInSmartAlbumByAssetDate");
    }

    #[tokio::test]
    async fn test_fetch_videos_falls_back_to_all_on_error() {
        use crate::icloud::photos::session::fake::FakeSession;
        use crate::icloud::photos::ServiceParams;
        use crate::retry::RetryPolicy;
        use std::sync::Arc;

        let session = Arc::new(FakeSession::new(vec![indexed()]));
        session.push_err(ICloudError::Http {
            status: 404,
            body: "no such folder".into(),
        });
        let mut records = master_and_asset("M1", "a.jpg", "public.jpeg");
        records.extend(master_and_asset("M2", "b.mov", "com.apple.quicktime-movie"));
        session.push_ok(page(records));
        session.push_ok(page(vec![]));

        let service = PhotosService::new(
            "https://ck",
            None,
            session.clone(),
            ServiceParams::default(),
            RetryPolicy::none(),
        )
            .await
            .unwrap();
        let entries = fetch_media(&service, MediaFilter::Videos, true).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].filename, "b.mov");
        let (_, fallback) = session.request(2);
        assert_eq!(
            fallback["query"]["recordType"],
            "CPLAssetAndMasterByAssetDateWithoutHiddenOrDeleted"
        );
    }

    #[test]
    fn test_media_kind_labels() {
        assert_eq!(MediaKind::Photo.as_str(), "photo");
        assert_eq!(MediaKind::Video.as_str(), "video");
    }

    #[test]
    fn test_spinner_hidden_when_disabled() {
        assert!(create_spinner(true, "x".into()).is_hidden());
    }
}
