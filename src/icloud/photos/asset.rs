use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};

use super::cloudkit::Record;
use super::queries::item_type_from_str;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetItemType {
    Image,
    Movie,
}

/// A library item: the `CPLMaster` (file resources) joined with its
/// `CPLAsset` (dates, edits, album membership).
#[derive(Debug, Clone)]
pub struct PhotoAsset {
    master: Record,
    asset: Record,
}

impl PhotoAsset {
    pub fn new(master: Record, asset: Record) -> Self {
        Self { master, asset }
    }

    pub fn id(&self) -> &str {
        &self.master.record_name
    }

    /// Decoded `filenameEnc`, or `None` when absent or undecodable.
    pub fn filename(&self) -> Option<String> {
        let enc = &self.master.fields["filenameEnc"];
        let value = enc["value"].as_str()?;
        match enc["type"].as_str().unwrap_or("STRING") {
            "STRING" => Some(value.to_string()),
            "ENCRYPTED_BYTES" => String::from_utf8(BASE64.decode(value).ok()?).ok(),
            other => {
                tracing::warn!("Unsupported filenameEnc type: {}", other);
                None
            }
        }
    }

    /// Size in bytes of the original resource.
    pub fn size(&self) -> u64 {
        self.master.field("resOriginalRes")["size"]
            .as_u64()
            .unwrap_or(0)
    }

    /// When the photo or video was taken.
    pub fn asset_date(&self) -> DateTime<Utc> {
        self.asset
            .field("assetDate")
            .as_f64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single())
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    pub fn item_type(&self) -> Option<AssetItemType> {
        let raw = self.master.field("itemType").as_str()?;
        if let Some(t) = item_type_from_str(raw) {
            return Some(t);
        }
        let name = self.filename()?.to_lowercase();
        if [".heic", ".png", ".jpg", ".jpeg"]
            .iter()
            .any(|ext| name.ends_with(ext))
        {
            Some(AssetItemType::Image)
        } else {
            Some(AssetItemType::Movie)
        }
    }

    pub fn is_video(&self) -> bool {
        self.item_type() == Some(AssetItemType::Movie)
    }

    /// Whole seconds of playback for videos; the field sits on either record.
    pub fn duration_secs(&self) -> Option<u64> {
        [&self.asset, &self.master]
            .iter()
            .find_map(|r| r.field("duration").as_f64())
            .map(|secs| secs.max(0.0).round() as u64)
    }
}

impl std::fmt::Display for PhotoAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<PhotoAsset: {}>",
            self.filename().unwrap_or_else(|| self.id().to_string())
        )
    }
}
