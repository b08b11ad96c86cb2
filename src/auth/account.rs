//! `/validate` and `/accountLogin` against the iCloud setup service.

use anyhow::{Context, Result};
use serde_json::{json, Value};

use super::endpoints::Endpoints;
use super::error::AuthError;
use super::responses::AccountLoginResponse;
use super::session::Session;

/// Check whether the persisted session token is still accepted.
pub async fn validate_token(
    session: &mut Session,
    endpoints: &Endpoints,
) -> Result<AccountLoginResponse> {
    let response = session.post(&endpoints.validate(), &Value::Null, None).await?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(AuthError::InvalidToken(text).into());
    }
    response
        .json()
        .await
        .context("Failed to parse validate response")
}

/// Exchange the session token for account data and web service URLs.
pub async fn account_login(
    session: &mut Session,
    endpoints: &Endpoints,
) -> Result<AccountLoginResponse> {
    let field = |key: &str| session.get(key).unwrap_or_default().to_string();
    let body = json!({
        "accountCountryCode": field("account_country"),
        "dsWebAuthToken": field("session_token"),
        "extended_login": true,
        "trustToken": field("trust_token"),
    });

    let response = session.post(&endpoints.account_login(), &body, None).await?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(AuthError::InvalidToken(text).into());
    }

    let data: AccountLoginResponse = response
        .json()
        .await
        .context("Failed to parse accountLogin response")?;

    if let Some(domain) = data.domain_to_use.clone() {
        return Err(AuthError::WrongDomain(domain).into());
    }
    Ok(data)
}
