//! Cookie-persisting HTTP session for Apple's auth and iCloud web services.
//!
//! Three files live in the cookie directory per account:
//! `<user>` (cookies as JSON), `<user>.session` (Apple session headers) and
//! `<user>.lock`, which holds an exclusive advisory lock for as long as the
//! [`Session`] is alive.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use reqwest::header::{HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;

use super::error::AuthError;

/// Response headers that carry session state, and the key each is stored
/// under in the `.session` file.
const HEADER_DATA: &[(&str, &str)] = &[
    ("X-Apple-ID-Account-Country", "account_country"),
    ("X-Apple-ID-Session-Id", "session_id"),
    ("X-Apple-Session-Token", "session_token"),
    ("X-Apple-TwoSV-Trust-Token", "trust_token"),
    ("scnt", "scnt"),
];

const USER_AGENT_VALUE: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Keep only word characters so the username is safe as a file stem.
pub fn sanitize_username(username: &str) -> String {
    username
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct CookieEntry {
    url: String,
    cookie: String,
}

fn cookie_name(set_cookie: &str) -> &str {
    set_cookie.split('=').next().unwrap_or("").trim()
}

fn is_cookie_expired(set_cookie: &str, now: DateTime<Utc>) -> bool {
    cookie::Cookie::parse(set_cookie)
        .ok()
        .and_then(|c| c.expires_datetime())
        .map(|expires| DateTime::<Utc>::from(std::time::SystemTime::from(expires)) < now)
        .unwrap_or(false)
}

/// Fold newly received `Set-Cookie` values into the persisted list,
/// replacing older values of the same cookie for the same URL.
fn merge_cookies<'a>(
    entries: &mut Vec<CookieEntry>,
    url: &str,
    set_cookies: impl IntoIterator<Item = &'a str>,
    now: DateTime<Utc>,
) {
    for raw in set_cookies {
        let name = cookie_name(raw);
        if name.is_empty() {
            continue;
        }
        entries.retain(|e| e.url != url || cookie_name(&e.cookie) != name);
        if !is_cookie_expired(raw, now) {
            entries.push(CookieEntry {
                url: url.to_string(),
                cookie: raw.to_string(),
            });
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

async fn write_private(path: &Path, contents: String) -> Result<()> {
    fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    restrict_permissions(path)?;
    Ok(())
}

fn acquire_lock(lock_path: &Path) -> Result<std::fs::File> {
    let file = std::fs::File::create(lock_path)
        .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;
    file.try_lock_exclusive()
        .map_err(|_| AuthError::Locked(lock_path.to_path_buf()))?;
    Ok(file)
}

/// HTTP client plus the persisted Apple session state for one account.
pub struct Session {
    client: Client,
    cookies: Vec<CookieEntry>,
    data: HashMap<String, String>,
    cookie_dir: PathBuf,
    stem: String,
    /// Released when dropped.
    _lock_file: std::fs::File,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("cookie_dir", &self.cookie_dir)
            .field("stem", &self.stem)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Lock the account, then restore cookies and session data from disk.
    pub async fn new(cookie_dir: &Path, username: &str, home_endpoint: &str) -> Result<Self> {
        let stem = sanitize_username(username);
        let cookie_dir = cookie_dir.to_path_buf();

        fs::create_dir_all(&cookie_dir).await.with_context(|| {
            format!(
                "Failed to create cookie directory: {}",
                cookie_dir.display()
            )
        })?;

        let lock_path = cookie_dir.join(format!("{}.lock", stem));
        let lock_file = tokio::task::spawn_blocking(move || acquire_lock(&lock_path)).await??;

        let jar = Arc::new(reqwest::cookie::Jar::default());
        let cookies = Self::load_cookies(&cookie_dir.join(&stem)).await;
        for entry in &cookies {
            if let Ok(url) = entry.url.parse::<url::Url>() {
                jar.add_cookie_str(&entry.cookie, &url);
            }
        }

        let mut default_headers = HeaderMap::new();
        default_headers.insert(ORIGIN, HeaderValue::from_str(home_endpoint)?);
        default_headers.insert(REFERER, HeaderValue::from_str(&format!("{}/", home_endpoint))?);
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = Client::builder()
            .cookie_provider(jar)
            .default_headers(default_headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let session_path = cookie_dir.join(format!("{}.session", stem));
        let data = Self::load_session_data(&session_path).await;

        Ok(Self {
            client,
            cookies,
            data,
            cookie_dir,
            stem,
            _lock_file: lock_file,
        })
    }

    async fn load_cookies(path: &Path) -> Vec<CookieEntry> {
        let Ok(contents) = fs::read_to_string(path).await else {
            return Vec::new();
        };
        let now = Utc::now();
        match serde_json::from_str::<Vec<CookieEntry>>(&contents) {
            Ok(entries) => {
                tracing::debug!("Read cookies from {}", path.display());
                entries
                    .into_iter()
                    .filter(|e| !is_cookie_expired(&e.cookie, now))
                    .collect()
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable cookie file {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    async fn load_session_data(path: &Path) -> HashMap<String, String> {
        let Ok(contents) = fs::read_to_string(path).await else {
            tracing::debug!("Session file does not exist");
            return HashMap::new();
        };
        match serde_json::from_str::<HashMap<String, Value>>(&contents) {
            Ok(map) => map
                .into_iter()
                .map(|(k, v)| match v {
                    Value::String(s) => (k, s),
                    other => (k, other.to_string()),
                })
                .collect(),
            Err(_) => {
                tracing::info!("Session file corrupt, starting fresh");
                HashMap::new()
            }
        }
    }

    pub fn cookiejar_path(&self) -> PathBuf {
        self.cookie_dir.join(&self.stem)
    }

    pub fn session_path(&self) -> PathBuf {
        self.cookie_dir.join(format!("{}.session", self.stem))
    }

    /// Value of a persisted session field such as `session_token`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.data.insert(key.to_string(), value.to_string());
    }

    pub(crate) fn data(&self) -> &HashMap<String, String> {
        &self.data
    }

    /// The underlying client; clones share the connection pool and cookies.
    pub fn http_client(&self) -> Client {
        self.client.clone()
    }

    /// POST a JSON body, then capture session headers and cookies.
    pub async fn post(
        &mut self,
        url: &str,
        body: &Value,
        headers: Option<HeaderMap>,
    ) -> Result<Response> {
        let mut builder = self.client.post(url).json(body);
        if let Some(h) = headers {
            builder = builder.headers(h);
        }
        tracing::debug!("POST {}", url);
        let response = builder.send().await?;
        self.capture(&response).await?;
        Ok(response)
    }

    pub async fn get_url(&mut self, url: &str, headers: Option<HeaderMap>) -> Result<Response> {
        let mut builder = self.client.get(url);
        if let Some(h) = headers {
            builder = builder.headers(h);
        }
        tracing::debug!("GET {}", url);
        let response = builder.send().await?;
        self.capture(&response).await?;
        Ok(response)
    }

    /// Apple may rotate tokens on any response, so this runs after every request.
    async fn capture(&mut self, response: &Response) -> Result<()> {
        let headers = response.headers();
        for &(header, key) in HEADER_DATA {
            if let Some(value) = headers.get(header).and_then(|v| v.to_str().ok()) {
                self.data.insert(key.to_string(), value.to_string());
            }
        }

        let set_cookies: Vec<&str> = headers
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        merge_cookies(
            &mut self.cookies,
            response.url().as_str(),
            set_cookies,
            Utc::now(),
        );

        self.save().await
    }

    /// Write session data and cookies to disk with owner-only permissions.
    pub async fn save(&self) -> Result<()> {
        write_private(&self.session_path(), serde_json::to_string_pretty(&self.data)?).await?;
        write_private(&self.cookiejar_path(), serde_json::to_string_pretty(&self.cookies)?)
            .await?;
        tracing::debug!("Saved session data to {}", self.session_path().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_sanitize_username() {
        assert_eq!(sanitize_username("user@example.com"), "userexamplecom");
        assert_eq!(sanitize_username("hello_world"), "hello_world");
        assert_eq!(sanitize_username("a.b-c@d"), "abcd");
    }

    #[test]
    fn test_is_cookie_expired() {
        assert!(is_cookie_expired(
            "foo=bar; Expires=Thu, 01 Jan 2020 00:00:00 GMT",
            now()
        ));
        assert!(!is_cookie_expired(
            "foo=bar; Expires=Thu, 01 Jan 2099 00:00:00 GMT",
            now()
        ));
        assert!(!is_cookie_expired("foo=bar", now()));
    }

    #[test]
    fn test_merge_cookies_replaces_same_name_and_url() {
        let mut entries = vec![
            CookieEntry {
                url: "https://a.example/".into(),
                cookie: "X-APPLE-WEBAUTH-TOKEN=old".into(),
            },
            CookieEntry {
                url: "https://b.example/".into(),
                cookie: "X-APPLE-WEBAUTH-TOKEN=other".into(),
            },
        ];
        merge_cookies(
            &mut entries,
            "https://a.example/",
            ["X-APPLE-WEBAUTH-TOKEN=new; Path=/", "dslang=US"],
            now(),
        );

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].url, "https://b.example/");
        assert!(entries.iter().any(|e| e.cookie.starts_with("X-APPLE-WEBAUTH-TOKEN=new")));
        assert!(!entries.iter().any(|e| e.cookie == "X-APPLE-WEBAUTH-TOKEN=old"));
    }

    #[test]
    fn test_merge_cookies_expired_removes_existing() {
        let mut entries = vec![CookieEntry {
            url: "https://a.example/".into(),
            cookie: "token=abc".into(),
        }];
        merge_cookies(
            &mut entries,
            "https://a.example/",
            ["token=; Expires=Thu, 01 Jan 1970 00:00:00 GMT"],
            now(),
        );
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_lock_prevents_second_session() {
        let dir = tempfile::tempdir().unwrap();
        let _first = Session::new(dir.path(), "user@test.com", "https://example.com")
            .await
            .unwrap();
        let err = Session::new(dir.path(), "user@test.com", "https://example.com")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Another icloud-media-rs instance"));
    }

    #[tokio::test]
    async fn test_lock_per_user_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _alice = Session::new(dir.path(), "alice@test.com", "https://example.com")
                .await
                .unwrap();
            let _bob = Session::new(dir.path(), "bob@test.com", "https://example.com")
                .await
                .unwrap();
        }
        Session::new(dir.path(), "alice@test.com", "https://example.com")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_session_data_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut session = Session::new(dir.path(), "user@test.com", "https://example.com")
                .await
                .unwrap();
            session.set("session_token", "tok123");
            session.set("client_id", "auth-abc");
            session.save().await.unwrap();
        }

        let session = Session::new(dir.path(), "user@test.com", "https://example.com")
            .await
            .unwrap();
        assert_eq!(session.get("session_token"), Some("tok123"));
        assert_eq!(session.get("client_id"), Some("auth-abc"));
        assert!(session.cookiejar_path().exists());
    }

    #[tokio::test]
    async fn test_expired_cookies_pruned_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            CookieEntry {
                url: "https://example.com/".into(),
                cookie: "old=1; Expires=Thu, 01 Jan 2020 00:00:00 GMT".into(),
            },
            CookieEntry {
                url: "https://example.com/".into(),
                cookie: "fresh=1; Expires=Thu, 01 Jan 2099 00:00:00 GMT".into(),
            },
        ];
        std::fs::write(
            dir.path().join(sanitize_username("user@test.com")),
            serde_json::to_string(&entries).unwrap(),
        )
        .unwrap();

        let session = Session::new(dir.path(), "user@test.com", "https://example.com")
            .await
            .unwrap();
        assert_eq!(session.cookies.len(), 1);
        assert!(session.cookies[0].cookie.starts_with("fresh="));
    }
}
