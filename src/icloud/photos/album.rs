use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use super::asset::PhotoAsset;
use super::cloudkit::{QueryResponse, Record};
use super::queries::{DESIRED_KEYS, PAGE_SIZE};
use super::session::{retry_post, PhotosSession};
use crate::icloud::error::ICloudError;
use crate::retry::RetryPolicy;

/// A queryable collection: the whole library, a smart folder, or a user album.
#[derive(Clone)]
pub struct PhotoAlbum {
    name: String,
    /// `CPLAlbum` record name; `None` for the library and smart folders.
    record_name: Option<String>,
    session: Arc<dyn PhotosSession>,
    query_url: String,
    list_type: String,
    query_filter: Option<Value>,
    page_size: u64,
    zone_id: Value,
    retry: RetryPolicy,
}

impl PhotoAlbum {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: impl Into<String>,
        record_name: Option<String>,
        session: Arc<dyn PhotosSession>,
        query_url: String,
        list_type: impl Into<String>,
        query_filter: Option<Value>,
        zone_id: Value,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            record_name,
            session,
            query_url,
            list_type: list_type.into(),
            query_filter,
            page_size: PAGE_SIZE,
            zone_id,
            retry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record_name(&self) -> Option<&str> {
        self.record_name.as_deref()
    }

    #[cfg(test)]
    fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Fetch every asset in the album, page by page, reporting the running
    /// total after each page.
    pub async fn photos<F>(&self, mut on_page: F) -> Result<Vec<PhotoAsset>, ICloudError>
    where
        F: FnMut(usize),
    {
        let mut all_assets = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let body = self.list_query(offset);
            let response = retry_post(self.session.as_ref(), &self.retry, &self.query_url, &body).await?;
            let response: QueryResponse = serde_json::from_value(response)?;

            let mut asset_records: HashMap<String, Record> = HashMap::new();
            let mut master_records: Vec<Record> = Vec::new();
            for rec in response.records {
                match rec.record_type.as_str() {
                    "CPLAsset" => {
                        if let Some(master_id) = rec.field("masterRef")["recordName"].as_str() {
                            asset_records.insert(master_id.to_string(), rec);
                        }
                    }
                    "CPLMaster" => master_records.push(rec),
                    _ => {}
                }
            }

            if master_records.is_empty() {
                break;
            }
            debug!(
                "Album '{}': {} masters at offset {}",
                self.name,
                master_records.len(),
                offset
            );

            offset += master_records.len() as u64;
            for master in master_records {
                match asset_records.remove(&master.record_name) {
                    Some(asset) => all_assets.push(PhotoAsset::new(master, asset)),
                    None => debug!("No asset record for master {}", master.record_name),
                }
            }
            on_page(all_assets.len());
        }

        Ok(all_assets)
    }

    fn list_query(&self, offset: u64) -> Value {
        let mut filter_by = vec![
            json!({
                "fieldName": "startRank",
                "fieldValue": {"type": "INT64", "value": offset},
                "comparator": "EQUALS",
            }),
            json!({
                "fieldName": "direction",
                "fieldValue": {"type": "STRING", "value": "ASCENDING"},
                "comparator": "EQUALS",
            }),
        ];
        if let Some(arr) = self.query_filter.as_ref().and_then(Value::as_array) {
            filter_by.extend(arr.iter().cloned());
        }

        json!({
            "query": {
                "filterBy": filter_by,
                "recordType": &self.list_type,
            },
            "resultsLimit": self.page_size * 2,
            "desiredKeys": DESIRED_KEYS,
            "zoneID": self.zone_id,
        })
    }
}

impl std::fmt::Display for PhotoAlbum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl std::fmt::Debug for PhotoAlbum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<PhotoAlbum: '{}'>", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icloud::photos::session::fake::FakeSession;

    fn master(name: &str, size: u64) -> Value {
        json!({
            "recordName": name,
            "recordType": "CPLMaster",
            "fields": {
                "filenameEnc": {"value": format!("{}.JPG", name), "type": "STRING"},
                "resOriginalRes": {"value": {"size": size}},
            }
        })
    }

    fn asset_for(master: &str) -> Value {
        json!({
            "recordName": format!("{}-A", master),
            "recordType": "CPLAsset",
            "fields": {"masterRef": {"value": {"recordName": master}}}
        })
    }

    fn album(session: Arc<FakeSession>, filter: Option<Value>) -> PhotoAlbum {
        PhotoAlbum::new(
            "All Photos",
            None,
            session,
            "https://ck/records/query?x=1".into(),
            "CPLAssetAndMasterByAssetDateWithoutHiddenOrDeleted",
            filter,
            json!({"zoneName": "PrimarySync"}),
            RetryPolicy::none(),
        )
        .with_page_size(2)
    }

    #[tokio::test]
    async fn test_pages_until_no_masters() {
        let session = Arc::new(FakeSession::new(vec![
            json!({"records": [asset_for("M1"), master("M1", 10), asset_for("M2"), master("M2", 20)]}),
            json!({"records": [asset_for("M3"), master("M3", 30)]}),
            json!({"records": []}),
        ]));
        let mut pages = Vec::new();
        let photos = album(session.clone(), None)
            .photos(|n| pages.push(n))
            .await
            .unwrap();

        let ids: Vec<_> = photos.iter().map(|p| p.id().to_string()).collect();
        assert_eq!(ids, vec!["M1", "M2", "M3"]);
        assert_eq!(pages, vec![2, 3]);

        let (_, first) = session.request(0);
        assert_eq!(first["resultsLimit"], 4);
        assert_eq!(first["query"]["filterBy"][0]["fieldValue"]["value"], 0);
        let (_, second) = session.request(1);
        assert_eq!(second["query"]["filterBy"][0]["fieldValue"]["value"], 2);
        let (_, third) = session.request(2);
        assert_eq!(third["query"]["filterBy"][0]["fieldValue"]["value"], 3);
    }

    #[tokio::test]
    async fn test_master_without_asset_is_skipped_but_counted() {
        let session = Arc::new(FakeSession::new(vec![
            json!({"records": [master("M1", 10), asset_for("M2"), master("M2", 20)]}),
            json!({"records": []}),
        ]));
        let photos = album(session.clone(), None).photos(|_| {}).await.unwrap();
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].id(), "M2");
        let (_, second) = session.request(1);
        assert_eq!(second["query"]["filterBy"][0]["fieldValue"]["value"], 2);
    }

    #[tokio::test]
    async fn test_query_filter_appended() {
        let session = Arc::new(FakeSession::new(vec![json!({"records": []})]));
        let filter = json!([{"fieldName": "smartAlbum", "comparator": "EQUALS",
            "fieldValue": {"type": "STRING", "value": "VIDEO"}}]);
        let photos = album(session.clone(), Some(filter)).photos(|_| {}).await.unwrap();
        assert!(photos.is_empty());
        let (url, body) = session.request(0);
        assert_eq!(url, "https://ck/records/query?x=1");
        let filters = body["query"]["filterBy"].as_array().unwrap();
        assert_eq!(filters.len(), 3);
        assert_eq!(filters[2]["fieldName"], "smartAlbum");
        assert_eq!(body["zoneID"]["zoneName"], "PrimarySync");
    }

    #[tokio::test]
    async fn test_http_error_propagates() {
        let session = Arc::new(FakeSession::default());
        session.push_err(ICloudError::Http {
            status: 403,
            body: "forbidden".into(),
        });
        let err = album(session, None).photos(|_| {}).await.unwrap_err();
        assert!(matches!(err, ICloudError::Http { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_transient_error_retried_with_album_policy() {
        let session = Arc::new(FakeSession::default());
        session.push_err(ICloudError::Http {
            status: 503,
            body: String::new(),
        });
        session.push_ok(json!({"records": [asset_for("M1"), master("M1", 10)]}));
        session.push_ok(json!({"records": []}));
        let mut library = album(session.clone(), None);
        library.retry = RetryPolicy {
            max_retries: 1,
            base_delay: std::time::Duration::ZERO,
            max_delay: std::time::Duration::ZERO,
        };
        let photos = library.photos(|_| {}).await.unwrap();
        assert_eq!(photos.len(), 1);
        assert_eq!(session.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_no_retry_policy_tries_once() {
        let session = Arc::new(FakeSession::default());
        session.push_err(ICloudError::Http {
            status: 503,
            body: String::new(),
        });
        let err = album(session.clone(), None).photos(|_| {}).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(session.requests.lock().unwrap().len(), 1);
    }
}
