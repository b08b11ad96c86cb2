//! Trusted-device verification codes and session trust.

use std::io::{self, Write};

use anyhow::{Context, Result};
use serde_json::json;

use super::endpoints::Endpoints;
use super::error::AuthError;
use super::headers::auth_headers;
use super::session::Session;

const CODE_LENGTH: usize = 6;

/// Apple's error code for an incorrect security code.
const WRONG_CODE: &str = "-21669";

/// Trim and validate a code typed by the user.
pub(crate) fn parse_code(input: &str) -> Option<String> {
    let code = input.trim();
    (code.len() == CODE_LENGTH && code.chars().all(|c| c.is_ascii_digit()))
        .then(|| code.to_string())
}

async fn prompt_code() -> Result<String> {
    let line = tokio::task::spawn_blocking(|| {
        print!("Enter the 2FA code sent to your trusted device: ");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        Ok::<_, io::Error>(line)
    })
    .await??;
    Ok(line)
}

/// Prompt for a code and submit it. `Ok(false)` means Apple rejected it.
pub async fn verify_code(
    session: &mut Session,
    endpoints: &Endpoints,
    client_id: &str,
) -> Result<bool> {
    let Some(code) = parse_code(&prompt_code().await?) else {
        tracing::error!("Invalid 2FA code: must be exactly {} digits", CODE_LENGTH);
        return Ok(false);
    };

    let headers = auth_headers(
        endpoints,
        client_id,
        session.data(),
        &[("accept", "application/json".to_string())],
    )?;
    let body = json!({ "securityCode": { "code": code } });
    let response = session
        .post(&endpoints.verify_security_code(), &body, Some(headers))
        .await?;

    let status = response.status();
    if status.is_success() {
        tracing::debug!("Code verification successful");
        return Ok(true);
    }

    let text = response.text().await.unwrap_or_default();
    if text.contains(WRONG_CODE) {
        tracing::error!("Code verification failed: wrong code");
        return Ok(false);
    }
    Err(AuthError::Api {
        code: status.as_u16(),
        message: text,
    }
    .into())
}

/// Ask Apple to trust this session so later runs skip the second factor.
pub async fn trust_session(
    session: &mut Session,
    endpoints: &Endpoints,
    client_id: &str,
) -> Result<()> {
    let headers = auth_headers(endpoints, client_id, session.data(), &[])?;
    session
        .get_url(&endpoints.trust(), Some(headers))
        .await
        .context("Failed to trust session")?;
    tracing::debug!("Session trusted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_code_accepts_six_digits() {
        assert_eq!(parse_code("123456\n").as_deref(), Some("123456"));
        assert_eq!(parse_code("  654321  ").as_deref(), Some("654321"));
    }

    #[test]
    fn test_parse_code_rejects_bad_input() {
        assert!(parse_code("12345").is_none());
        assert!(parse_code("1234567").is_none());
        assert!(parse_code("12a456").is_none());
        assert!(parse_code("").is_none());
    }
}
