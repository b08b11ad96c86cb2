//! Query parameters and desired keys shared by photos requests.

use super::asset::AssetItemType;

/// Fields requested for every asset listing; only what the report and
/// upload bookkeeping read.
pub(crate) const DESIRED_KEYS: &[&str] = &[
    "recordName",
    "recordType",
    "recordChangeTag",
    "masterRef",
    "filenameEnc",
    "itemType",
    "resOriginalRes",
    "resOriginalFileType",
    "assetDate",
    "addedDate",
    "duration",
    "isDeleted",
    "isHidden",
    "albumNameEnc",
    "position",
    "containerId",
    "itemId",
];

/// Page size for asset listings; each page carries an asset and a master
/// record per item.
pub(crate) const PAGE_SIZE: u64 = 100;

pub(crate) fn item_type_from_str(s: &str) -> Option<AssetItemType> {
    match s {
        "public.heic" | "public.heif" | "public.jpeg" | "public.png" | "com.adobe.raw-image"
        | "com.canon.cr2-raw-image" | "com.canon.cr3-raw-image" | "com.nikon.raw-image"
        | "com.sony.arw-raw-image" | "com.fuji.raw-image" | "com.olympus.raw-image" => {
            Some(AssetItemType::Image)
        }
        "com.apple.quicktime-movie" | "public.mpeg-4" => Some(AssetItemType::Movie),
        _ => None,
    }
}

/// Query string parameters CloudKit expects on every photos request.
#[derive(Debug, Clone, Default)]
pub struct ServiceParams {
    pub client_id: String,
    pub dsid: Option<String>,
}

impl ServiceParams {
    const CLIENT_BUILD_NUMBER: &'static str = "2522Project44";
    const CLIENT_MASTERING_NUMBER: &'static str = "2522B2";

    pub fn encode(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query
            .append_pair("clientBuildNumber", Self::CLIENT_BUILD_NUMBER)
            .append_pair("clientId", &self.client_id)
            .append_pair("clientMasteringNumber", Self::CLIENT_MASTERING_NUMBER);
        if let Some(dsid) = &self.dsid {
            query.append_pair("dsid", dsid);
        }
        query
            .append_pair("getCurrentSyncToken", "true")
            .append_pair("remapEnums", "true");
        query.finish()
    }
}
