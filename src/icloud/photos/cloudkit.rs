//! CloudKit wire models for `records/query`, `records/modify` and the
//! upload service. Record fields stay as dynamic JSON: Apple's schema varies
//! by record type and changes without notice.

use serde::Deserialize;
use serde_json::Value;

use crate::icloud::error::ICloudError;

/// Response from `/records/query`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(default)]
    pub records: Vec<Record>,
    #[serde(default)]
    pub continuation_marker: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(default)]
    pub record_name: String,
    #[serde(default)]
    pub record_type: String,
    #[serde(default)]
    pub fields: Value,
    /// Set on per-record failures in `records/modify` responses.
    #[serde(default)]
    pub server_error_code: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Record {
    pub fn field(&self, name: &str) -> &Value {
        &self.fields[name]["value"]
    }

    pub fn is_deleted(&self) -> bool {
        self.field("isDeleted").as_bool().unwrap_or(false)
            || self.field("isDeleted").as_i64() == Some(1)
    }

    /// Turn a per-record server error into an [`ICloudError::Api`].
    pub fn check(&self) -> Result<(), ICloudError> {
        match &self.server_error_code {
            Some(code) => Err(ICloudError::Api {
                reason: self.reason.clone().unwrap_or_default(),
                code: code.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Response from `/records/modify`.
#[derive(Debug, Deserialize)]
pub struct ModifyResponse {
    #[serde(default)]
    pub records: Vec<Record>,
}

/// Response from the upload service. Either `records` or `errors` is present.
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub records: Vec<Record>,
    #[serde(default)]
    pub errors: Option<Value>,
}

impl UploadResponse {
    /// Record name of the created `CPLAsset`.
    pub fn asset_record_name(self) -> Result<String, ICloudError> {
        if let Some(errors) = self.errors {
            return Err(ICloudError::Api {
                reason: errors.to_string(),
                code: "UPLOAD_ERROR".to_string(),
            });
        }
        self.records
            .into_iter()
            .find(|r| r.record_type == "CPLAsset")
            .map(|r| r.record_name)
            .ok_or_else(|| {
                ICloudError::UnexpectedResponse("upload returned no CPLAsset record".into())
            })
    }
}
