//! Photos service: library and album queries, album management and uploads
//! against iCloud's CloudKit-based photos backend.

mod album;
mod asset;
pub mod cloudkit;
pub mod queries;
pub mod session;
mod smart_folders;

pub use album::PhotoAlbum;
pub use asset::{AssetItemType, PhotoAsset};
pub use queries::ServiceParams;
pub use session::PhotosSession;

use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use self::cloudkit::{ModifyResponse, QueryResponse, UploadResponse};
use self::session::retry_post;
use crate::icloud::error::ICloudError;
use crate::retry::RetryPolicy;

const ROOT_FOLDERS: &[&str] = &["----Root-Folder----", "----Project-Root-Folder----"];

pub struct PhotosService {
    service_endpoint: String,
    upload_root: Option<String>,
    session: Arc<dyn PhotosSession>,
    params: ServiceParams,
    zone_id: Value,
    /// Applied to every CloudKit JSON call; file uploads are retried by the caller.
    retry: RetryPolicy,
}

impl std::fmt::Debug for PhotosService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotosService")
            .field("service_endpoint", &self.service_endpoint)
            .field("upload_root", &self.upload_root)
            .finish_non_exhaustive()
    }
}

impl PhotosService {
    /// Connect to the private photos database under `ck_root` (the
    /// `ckdatabasews` URL). Fails unless the library has finished indexing.
    pub async fn new(
        ck_root: &str,
        upload_root: Option<&str>,
        session: Arc<dyn PhotosSession>,
        params: ServiceParams,
        retry: RetryPolicy,
    ) -> Result<Self, ICloudError> {
        let service = Self {
            service_endpoint: format!(
                "{}/database/1/com.apple.photos.cloud/production/private",
                ck_root.trim_end_matches('/')
            ),
            upload_root: upload_root.map(|u| u.trim_end_matches('/').to_string()),
            session,
            params,
            zone_id: json!({"zoneName": "PrimarySync"}),
            retry,
        };
        service.check_indexing().await?;
        Ok(service)
    }

    fn query_url(&self) -> String {
        format!(
            "{}/records/query?{}",
            self.service_endpoint,
            self.params.encode()
        )
    }

    fn modify_url(&self) -> String {
        format!(
            "{}/records/modify?{}",
            self.service_endpoint,
            self.params.encode()
        )
    }

    async fn check_indexing(&self) -> Result<(), ICloudError> {
        let body = json!({
            "query": {"recordType": "CheckIndexingState"},
            "zoneID": self.zone_id,
        });
        let response = retry_post(self.session.as_ref(), &self.retry, &self.query_url(), &body).await?;
        let response: QueryResponse = serde_json::from_value(response)?;
        let state = response
            .records
            .first()
            .and_then(|r| r.field("state").as_str());
        if state != Some("FINISHED") {
            debug!("Indexing state: {:?}", state);
            return Err(ICloudError::IndexingNotFinished);
        }
        Ok(())
    }

    fn album(
        &self,
        name: &str,
        record_name: Option<String>,
        list_type: &str,
        query_filter: Option<Value>,
    ) -> PhotoAlbum {
        PhotoAlbum::new(
            name,
            record_name,
            Arc::clone(&self.session),
            self.query_url(),
            list_type,
            query_filter,
            self.zone_id.clone(),
            self.retry,
        )
    }

    /// The whole library, hidden and deleted items excluded.
    pub fn all(&self) -> PhotoAlbum {
        self.album(
            "All Photos",
            None,
            "CPLAssetAndMasterByAssetDateWithoutHiddenOrDeleted",
            None,
        )
    }

    /// A built-in smart folder such as "Videos", if the name is known.
    pub fn smart_folder(&self, name: &str) -> Option<PhotoAlbum> {
        let def = smart_folders::smart_folder(name)?;
        Some(self.album(name, None, def.list_type, def.query_filter))
    }

    /// User-created albums, folders and deleted albums excluded.
    pub async fn albums(&self) -> Result<Vec<PhotoAlbum>, ICloudError> {
        let mut albums = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut body = json!({
                "query": {"recordType": "CPLAlbumByPositionLive"},
                "zoneID": self.zone_id,
            });
            if let Some(m) = &marker {
                body["continuationMarker"] = json!(m);
            }
            let response = retry_post(self.session.as_ref(), &self.retry, &self.query_url(), &body).await?;
            let response: QueryResponse = serde_json::from_value(response)?;

            for record in &response.records {
                if ROOT_FOLDERS.contains(&record.record_name.as_str()) || record.is_deleted() {
                    continue;
                }
                let Some(name) = decode_album_name(record.field("albumNameEnc")) else {
                    debug!("Skipping album {} without a readable name", record.record_name);
                    continue;
                };
                let filter = json!([{
                    "fieldName": "parentId",
                    "comparator": "EQUALS",
                    "fieldValue": {"type": "STRING", "value": &record.record_name},
                }]);
                albums.push(self.album(
                    &name,
                    Some(record.record_name.clone()),
                    "CPLContainerRelationLiveByAssetDate",
                    Some(filter),
                ));
            }

            match response.continuation_marker {
                Some(m) => marker = Some(m),
                None => break,
            }
        }
        Ok(albums)
    }

    /// First user album whose title matches `name` exactly.
    pub async fn find_album(&self, name: &str) -> Result<Option<PhotoAlbum>, ICloudError> {
        Ok(self.albums().await?.into_iter().find(|a| a.name() == name))
    }

    /// Create a user album and return its record name.
    pub async fn create_album(&self, name: &str) -> Result<String, ICloudError> {
        let record_name = Uuid::new_v4().to_string().to_uppercase();
        let body = json!({
            "atomic": true,
            "zoneID": self.zone_id,
            "operations": [{
                "operationType": "create",
                "record": {
                    "recordName": record_name,
                    "recordType": "CPLAlbum",
                    "fields": {
                        "albumNameEnc": {"value": BASE64.encode(name), "type": "ENCRYPTED_BYTES"},
                        "albumType": {"value": 0},
                        "sortAscending": {"value": 1},
                        "sortType": {"value": 0},
                        "isDeleted": {"value": 0},
                        "position": {"value": 1024},
                    },
                },
            }],
        });
        self.modify(&body).await?;
        Ok(record_name)
    }

    /// Link an uploaded asset into a user album.
    pub async fn add_to_album(
        &self,
        asset_record_name: &str,
        album_record_name: &str,
    ) -> Result<(), ICloudError> {
        let body = json!({
            "atomic": true,
            "zoneID": self.zone_id,
            "operations": [{
                "operationType": "create",
                "record": {
                    "recordName": format!("{}-IN-{}", asset_record_name, album_record_name),
                    "recordType": "CPLContainerRelation",
                    "fields": {
                        "itemId": {"value": asset_record_name},
                        "containerId": {"value": album_record_name},
                        "position": {"value": 1024},
                    },
                },
            }],
        });
        self.modify(&body).await
    }

    async fn modify(&self, body: &Value) -> Result<(), ICloudError> {
        let response = retry_post(self.session.as_ref(), &self.retry, &self.modify_url(), body).await?;
        let response: ModifyResponse = serde_json::from_value(response)?;
        for record in &response.records {
            record.check()?;
        }
        Ok(())
    }

    /// Upload a file into the library (Camera Roll) and return the record
    /// name of the new `CPLAsset`.
    pub async fn upload_file(&self, path: &Path) -> Result<String, ICloudError> {
        let root = self
            .upload_root
            .as_deref()
            .ok_or(ICloudError::MissingService("uploadimagews"))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let query = {
            let mut query = url::form_urlencoded::Serializer::new(String::new());
            query.append_pair("filename", &filename);
            if let Some(dsid) = &self.params.dsid {
                query.append_pair("dsid", dsid);
            }
            query.finish()
        };
        let url = format!("{}/upload?{}", root, query);

        let bytes = tokio::fs::read(path).await?;
        let response = self.session.post_bytes(&url, bytes).await?;
        let response: UploadResponse = serde_json::from_value(response)?;
        response.asset_record_name()
    }
}

fn decode_album_name(value: &Value) -> Option<String> {
    let raw = value.as_str()?;
    String::from_utf8(BASE64.decode(raw).ok()?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icloud::photos::session::fake::FakeSession;

    fn indexed() -> Value {
        json!({"records": [{"recordName": "_", "recordType": "CheckIndexingState",
            "fields": {"state": {"value": "FINISHED"}}}]})
    }

    fn params() -> ServiceParams {
        ServiceParams {
            client_id: "cid".into(),
            dsid: Some("123".into()),
        }
    }

    async fn service(session: Arc<FakeSession>) -> PhotosService {
        PhotosService::new(
            "https://ck.example/",
            Some("https://up.example"),
            session,
            params(),
            RetryPolicy::none(),
        )
            .await
            .unwrap()
    }

    fn album_record(name: &str, title: &str) -> Value {
        json!({"recordName": name, "recordType": "CPLAlbum",
            "fields": {"albumNameEnc": {"value": BASE64.encode(title)}}})
    }

    #[tokio::test]
    async fn test_new_checks_indexing() {
        let session = Arc::new(FakeSession::new(vec![indexed()]));
        let svc = service(session.clone()).await;
        let (url, body) = session.request(0);
        assert!(url.starts_with(
            "https://ck.example/database/1/com.apple.photos.cloud/production/private/records/query?"
        ));
        assert!(url.contains("dsid=123"));
        assert_eq!(body["query"]["recordType"], "CheckIndexingState");
        assert!(format!("{:?}", svc).contains("PhotosService"));
    }

    #[tokio::test]
    async fn test_new_fails_while_indexing() {
        let session = Arc::new(FakeSession::new(vec![json!({"records": [
            {"recordName": "_", "fields": {"state": {"value": "RUNNING"}}}
        ]})]));
        let err = PhotosService::new("https://ck", None, session, params(), RetryPolicy::none())
            .await
            .unwrap_err();
        assert!(matches!(err, ICloudError::IndexingNotFinished));
    }

    #[tokio::test]
    async fn test_smart_folder_lookup() {
        let session = Arc::new(FakeSession::new(vec![indexed()]));
        let svc = service(session).await;
        assert_eq!(svc.smart_folder("Videos").unwrap().name(), "Videos");
        assert!(svc.smart_folder("Nope").is_none());
        assert_eq!(svc.all().name(), "All Photos");
    }

    #[tokio::test]
    async fn test_albums_skip_root_and_deleted() {
        let mut deleted = album_record("D1", "Old");
        deleted["fields"]["isDeleted"] = json!({"value": 1});
        let session = Arc::new(FakeSession::new(vec![
            indexed(),
            json!({"records": [
                album_record("----Root-Folder----", "root"),
                album_record("A1", "Trips"),
                deleted,
            ], "continuationMarker": "m1"}),
            json!({"records": [album_record("A2", "Family")]}),
        ]));
        let svc = service(session.clone()).await;
        let albums = svc.albums().await.unwrap();
        let names: Vec<_> = albums.iter().map(|a| a.name().to_string()).collect();
        assert_eq!(names, vec!["Trips", "Family"]);
        assert_eq!(albums[0].record_name(), Some("A1"));
        let (_, second_page) = session.request(2);
        assert_eq!(second_page["continuationMarker"], "m1");
    }

    #[tokio::test]
    async fn test_find_album_by_title() {
        let session = Arc::new(FakeSession::new(vec![
            indexed(),
            json!({"records": [album_record("A1", "Trips")]}),
            json!({"records": [album_record("A1", "Trips")]}),
        ]));
        let svc = service(session).await;
        assert_eq!(
            svc.find_album("Trips").await.unwrap().unwrap().record_name(),
            Some("A1")
        );
        assert!(svc.find_album("Missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_album_request() {
        let session = Arc::new(FakeSession::new(vec![indexed(), json!({"records": []})]));
        let svc = service(session.clone()).await;
        let record_name = svc.create_album("Holiday").await.unwrap();
        let (url, body) = session.request(1);
        assert!(url.contains("/records/modify?"));
        let record = &body["operations"][0]["record"];
        assert_eq!(record["recordType"], "CPLAlbum");
        assert_eq!(record["recordName"], record_name.as_str());
        assert_eq!(record["fields"]["albumNameEnc"]["value"], BASE64.encode("Holiday"));
    }

    #[tokio::test]
    async fn test_add_to_album_surfaces_record_error() {
        let session = Arc::new(FakeSession::new(vec![
            indexed(),
            json!({"records": [{"recordName": "X", "serverErrorCode": "ACCESS_DENIED", "reason": "no"}]}),
        ]));
        let svc = service(session.clone()).await;
        let err = svc.add_to_album("ASSET", "ALBUM").await.unwrap_err();
        assert!(matches!(err, ICloudError::Api { ref code, .. } if code == "ACCESS_DENIED"));
        let (_, body) = session.request(1);
        assert_eq!(body["operations"][0]["record"]["recordName"], "ASSET-IN-ALBUM");
    }

    #[tokio::test]
    async fn test_add_to_album_retries_with_service_policy_only() {
        let session = Arc::new(FakeSession::new(vec![indexed()]));
        let svc = PhotosService::new(
            "https://ck",
            None,
            session.clone(),
            params(),
            RetryPolicy {
                max_retries: 1,
                base_delay: std::time::Duration::ZERO,
                max_delay: std::time::Duration::ZERO,
            },
        )
        .await
        .unwrap();
        for _ in 0..3 {
            session.push_err(ICloudError::Http {
                status: 503,
                body: String::new(),
            });
        }
        let err = svc.add_to_album("ASSET", "ALBUM").await.unwrap_err();
        assert!(err.is_transient());
        // indexing check plus two link attempts
        assert_eq!(session.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_upload_file_posts_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("my photo.jpg");
        std::fs::write(&path, b"jpegdata").unwrap();

        let session = Arc::new(FakeSession::new(vec![
            indexed(),
            json!({"records": [{"recordName": "NEW", "recordType": "CPLAsset"}]}),
        ]));
        let svc = service(session.clone()).await;
        assert_eq!(svc.upload_file(&path).await.unwrap(), "NEW");
        let uploads = session.uploads.lock().unwrap();
        assert_eq!(
            uploads[0],
            ("https://up.example/upload?filename=my+photo.jpg&dsid=123".to_string(), 8)
        );
    }

    #[tokio::test]
    async fn test_upload_without_service() {
        let session = Arc::new(FakeSession::new(vec![indexed()]));
        let svc = PhotosService::new("https://ck", None, session, params(), RetryPolicy::none())
            .await
            .unwrap();
        let err = svc.upload_file(Path::new("/x.jpg")).await.unwrap_err();
        assert!(matches!(err, ICloudError::MissingService("uploadimagews")));
    }

    #[test]
    fn test_decode_album_name() {
        assert_eq!(
            decode_album_name(&json!(BASE64.encode("Trips"))).as_deref(),
            Some("Trips")
        );
        assert!(decode_album_name(&json!("%%%")).is_none());
        assert!(decode_album_name(&Value::Null).is_none());
    }
}
