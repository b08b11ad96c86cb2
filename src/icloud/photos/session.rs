use async_trait::async_trait;
use serde_json::Value;

use crate::icloud::error::ICloudError;
use crate::retry::{retry_with_backoff, RetryAction, RetryPolicy};

/// Transport used by the photos service; implemented for the authenticated
/// `reqwest::Client` and by fakes in tests.
#[async_trait]
pub trait PhotosSession: Send + Sync {
    /// POST a CloudKit JSON body and parse the JSON response.
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ICloudError>;

    /// POST raw bytes (file upload) and parse the JSON response.
    async fn post_bytes(&self, url: &str, body: Vec<u8>) -> Result<Value, ICloudError>;
}

async fn read_json(response: reqwest::Response) -> Result<Value, ICloudError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ICloudError::Http {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}

#[async_trait]
impl PhotosSession for reqwest::Client {
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ICloudError> {
        tracing::debug!("POST {}", url);
        let response = self
            .post(url)
            .header("Content-type", "text/plain")
            .body(body.to_string())
            .send()
            .await?;
        read_json(response).await
    }

    async fn post_bytes(&self, url: &str, body: Vec<u8>) -> Result<Value, ICloudError> {
        tracing::debug!("POST {} ({} bytes)", url, body.len());
        let response = self
            .post(url)
            .header("Content-type", "application/octet-stream")
            .body(body)
            .send()
            .await?;
        read_json(response).await
    }
}

/// POST, backing off on rate limits and server errors per `policy`.
pub async fn retry_post(
    session: &dyn PhotosSession,
    policy: &RetryPolicy,
    url: &str,
    body: &Value,
) -> Result<Value, ICloudError> {
    retry_with_backoff(
        policy,
        url,
        |e: &ICloudError| {
            if e.is_transient() {
                RetryAction::Retry
            } else {
                RetryAction::Abort
            }
        },
        || session.post_json(url, body),
    )
    .await
}


#[cfg(test)]
mod tests {
    use super::fake::FakeSession;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_retry_post_returns_first_success() {
        let session = FakeSession::new(vec![json!({"ok": true})]);
        let value = retry_post(&session, &RetryPolicy::none(), "https://ck/records/query", &json!({}))
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(session.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_post_does_not_retry_client_errors() {
        let session = FakeSession::default();
        session.push_err(ICloudError::Http {
            status: 400,
            body: "bad".into(),
        });
        let err = retry_post(&session, &RetryPolicy::default(), "https://ck/records/query", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ICloudError::Http { status: 400, .. }));
        assert_eq!(session.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_post_honours_policy() {
        let session = FakeSession::default();
        for _ in 0..2 {
            session.push_err(ICloudError::Http {
                status: 429,
                body: String::new(),
            });
        }
        session.push_ok(json!({"ok": true}));
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: std::time::Duration::ZERO,
            max_delay: std::time::Duration::ZERO,
        };
        let value = retry_post(&session, &policy, "https://ck/records/query", &json!({}))
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(session.requests.lock().unwrap().len(), 3);
    }
}
