use serde::Deserialize;
use serde_json::Value;

/// Response from `/signin/init`.
#[derive(Debug, Deserialize)]
pub struct SrpInitResponse {
    pub salt: String,
    pub b: String,
    /// Opaque challenge echoed back in `/signin/complete`.
    pub c: Value,
    pub iteration: u64,
    pub protocol: String,
}

/// Response from `/accountLogin` and `/validate`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLoginResponse {
    #[serde(default)]
    pub ds_info: Option<DsInfo>,
    #[serde(default)]
    pub webservices: Option<Webservices>,
    #[serde(default)]
    pub hsa_challenge_required: bool,
    #[serde(default)]
    pub hsa_trusted_browser: bool,
    #[serde(default)]
    pub domain_to_use: Option<String>,
}

impl AccountLoginResponse {
    pub fn dsid(&self) -> Option<&str> {
        self.ds_info.as_ref()?.dsid.as_deref()
    }

    /// CloudKit database web service root (photos library queries).
    pub fn ckdatabase_url(&self) -> Option<&str> {
        self.webservices
            .as_ref()?
            .ckdatabasews
            .as_ref()
            .map(|ws| ws.url.as_str())
    }

    /// Photo upload web service root.
    pub fn upload_url(&self) -> Option<&str> {
        self.webservices
            .as_ref()?
            .uploadimagews
            .as_ref()
            .map(|ws| ws.url.as_str())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DsInfo {
    #[serde(default)]
    pub hsa_version: i64,
    /// Apple sends this as a string on some accounts and a number on others.
    #[serde(default, deserialize_with = "string_or_number")]
    pub dsid: Option<String>,
    #[serde(default)]
    pub has_i_cloud_qualifying_device: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct Webservices {
    #[serde(default)]
    pub ckdatabasews: Option<WebserviceEndpoint>,
    #[serde(default)]
    pub uploadimagews: Option<WebserviceEndpoint>,
}

#[derive(Debug, Deserialize)]
pub struct WebserviceEndpoint {
    pub url: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
