use serde_json::{json, Value};

/// Built-in smart folder: a list type plus the filter that selects it.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderDef {
    pub list_type: &'static str,
    pub query_filter: Option<Value>,
}

fn smart_album_filter(value: &str) -> Value {
    json!([{
        "fieldName": "smartAlbum",
        "comparator": "EQUALS",
        "fieldValue": {"type": "STRING", "value": value}
    }])
}

const SMART_ALBUMS: &[(&str, &str)] = &[
    ("Videos", "VIDEO"),
    ("Favorites", "FAVORITE"),
    ("Panoramas", "PANORAMA"),
    ("Screenshots", "SCREENSHOT"),
    ("Time-lapse", "TIMELAPSE"),
    ("Slo-mo", "SLOMO"),
    ("Live", "LIVE"),
];

/// Look up a smart folder by display name.
pub fn smart_folder(name: &str) -> Option<FolderDef> {
    SMART_ALBUMS
        .iter()
        .find(|(display, _)| *display == name)
        .map(|(_, smart_album)| FolderDef {
            list_type: "CPLAssetAndMasterInSmartAlbumByAssetDate",
            query_filter: Some(smart_album_filter(smart_album)),
        })
}
