//! iCloud sign-in: persisted session token, SRP login, trusted-device code.
//!
//! Order of attempts:
//! 1. validate the token saved by a previous run;
//! 2. otherwise run SRP with the password and log in with the new token;
//! 3. if Apple still wants a second factor, prompt for it and trust the session.

pub mod account;
pub mod endpoints;
pub mod error;
mod headers;
pub mod responses;
pub mod session;
pub mod srp;
pub mod twofa;

use anyhow::Result;
use uuid::Uuid;

use self::endpoints::Endpoints;
use self::error::AuthError;
pub use self::responses::AccountLoginResponse;
use self::session::Session;
use crate::config::AccountConfig;

/// An authenticated session and the account data that came with it.
pub struct AuthResult {
    pub session: Session,
    pub data: AccountLoginResponse,
}

impl std::fmt::Debug for AuthResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthResult")
            .field("session", &self.session)
            .field("dsid", &self.data.dsid())
            .finish()
    }
}

pub async fn authenticate(
    account: &AccountConfig,
    password_provider: &dyn Fn() -> Option<String>,
) -> Result<AuthResult> {
    let endpoints = Endpoints::for_domain(account.domain);
    let mut session = Session::new(
        &account.cookie_directory,
        &account.username,
        endpoints.home,
    )
    .await?;

    let client_id = match session.get("client_id") {
        Some(id) => id.to_string(),
        None => {
            let id = format!("auth-{}", Uuid::new_v4());
            session.set("client_id", &id);
            id
        }
    };

    let mut data = None;
    if session.get("session_token").is_some() {
        match account::validate_token(&mut session, &endpoints).await {
            Ok(d) => {
                tracing::debug!("Existing session token is valid");
                data = Some(d);
            }
            Err(e) => tracing::debug!("Saved session token rejected, logging in again: {}", e),
        }
    }

    let data = match data {
        Some(d) => d,
        None => {
            let password = password_provider()
                .ok_or_else(|| AuthError::FailedLogin("No password available".into()))?;
            tracing::debug!("Authenticating as {}", account.username);
            srp::sign_in(
                &mut session,
                &endpoints,
                &account.username,
                &password,
                &client_id,
            )
            .await?;
            account::account_login(&mut session, &endpoints).await?
        }
    };

    if !check_requires_2fa(&data) {
        tracing::info!("Authentication completed successfully");
        return Ok(AuthResult { session, data });
    }

    tracing::info!("Two-factor authentication is required");
    if !twofa::verify_code(&mut session, &endpoints, &client_id).await? {
        tracing::error!("Failed to verify 2FA code");
        return Err(AuthError::TwoFactorFailed("verification code rejected".into()).into());
    }
    twofa::trust_session(&mut session, &endpoints, &client_id).await?;
    let data = account::account_login(&mut session, &endpoints).await?;

    tracing::info!("Authentication completed successfully");
    Ok(AuthResult { session, data })
}

/// HSA2 accounts need a code unless this browser is already trusted, and only
/// when the account has a device able to receive one.
pub(crate) fn check_requires_2fa(data: &AccountLoginResponse) -> bool {
    let Some(ds) = &data.ds_info else {
        return false;
    };
    ds.hsa_version == 2
        && (data.hsa_challenge_required || !data.hsa_trusted_browser)
        && ds.has_i_cloud_qualifying_device
}
