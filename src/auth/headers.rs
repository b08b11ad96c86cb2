//! OAuth widget headers required by `idmsa.apple.com` requests.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::endpoints::Endpoints;
use super::error::AuthError;

/// Public widget key embedded in icloud.com's JavaScript.
const APPLE_WIDGET_KEY: &str = "d39ba9916b7251055b22c7f910e2ea796ee65e98b2ddecea8f5dde8d9d1a815d";

/// Build the auth-service headers, echoing back `scnt` and the session id
/// when the session has them. `extra` entries override defaults.
pub(crate) fn auth_headers(
    endpoints: &Endpoints,
    client_id: &str,
    session_data: &HashMap<String, String>,
    extra: &[(&'static str, String)],
) -> Result<HeaderMap, AuthError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Accept",
        HeaderValue::from_static("application/json, text/javascript"),
    );
    headers.insert("Content-Type", HeaderValue::from_static("application/json"));
    headers.insert(
        "X-Apple-OAuth-Client-Id",
        HeaderValue::from_static(APPLE_WIDGET_KEY),
    );
    headers.insert(
        "X-Apple-OAuth-Client-Type",
        HeaderValue::from_static("firstPartyAuth"),
    );
    headers.insert(
        "X-Apple-OAuth-Redirect-URI",
        HeaderValue::from_static(endpoints.home),
    );
    headers.insert(
        "X-Apple-OAuth-Require-Grant-Code",
        HeaderValue::from_static("true"),
    );
    headers.insert(
        "X-Apple-OAuth-Response-Mode",
        HeaderValue::from_static("web_message"),
    );
    headers.insert(
        "X-Apple-OAuth-Response-Type",
        HeaderValue::from_static("code"),
    );
    headers.insert("X-Apple-OAuth-State", HeaderValue::from_str(client_id)?);
    headers.insert(
        "X-Apple-Widget-Key",
        HeaderValue::from_static(APPLE_WIDGET_KEY),
    );

    for (key, header) in [("scnt", "scnt"), ("session_id", "X-Apple-ID-Session-Id")] {
        if let Some(v) = session_data
            .get(key)
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(header, v);
        }
    }

    for (name, value) in extra {
        headers.insert(HeaderName::from_static(*name), HeaderValue::from_str(value)?);
    }

    Ok(headers)
}

/// Origin/Referer pointing at the auth root, needed by `/signin/*`.
pub(crate) fn signin_overrides(endpoints: &Endpoints) -> [(&'static str, String); 2] {
    [
        ("origin", endpoints.auth_root.to_string()),
        ("referer", format!("{}/", endpoints.auth_root)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Domain;

    #[test]
    fn test_redirect_uri_follows_domain() {
        let data = HashMap::new();
        let com = auth_headers(&Endpoints::for_domain(Domain::Com), "c1", &data, &[]).unwrap();
        assert_eq!(
            com.get("X-Apple-OAuth-Redirect-URI").unwrap(),
            "https://www.icloud.com"
        );
        let cn = auth_headers(&Endpoints::for_domain(Domain::Cn), "c1", &data, &[]).unwrap();
        assert_eq!(
            cn.get("X-Apple-OAuth-Redirect-URI").unwrap(),
            "https://www.icloud.com.cn"
        );
        assert_eq!(cn.get("X-Apple-OAuth-State").unwrap(), "c1");
    }

    #[test]
    fn test_session_values_echoed() {
        let mut data = HashMap::new();
        data.insert("scnt".to_string(), "scnt-value".to_string());
        data.insert("session_id".to_string(), "sid".to_string());
        let headers =
            auth_headers(&Endpoints::for_domain(Domain::Com), "c1", &data, &[]).unwrap();
        assert_eq!(headers.get("scnt").unwrap(), "scnt-value");
        assert_eq!(headers.get("X-Apple-ID-Session-Id").unwrap(), "sid");
    }

    #[test]
    fn test_extra_headers_override() {
        let endpoints = Endpoints::for_domain(Domain::Com);
        let mut extra = signin_overrides(&endpoints).to_vec();
        extra.push(("accept", "application/json".to_string()));
        let headers = auth_headers(&endpoints, "c1", &HashMap::new(), &extra).unwrap();
        assert_eq!(headers.get("Origin").unwrap(), "https://idmsa.apple.com");
        assert_eq!(headers.get("Referer").unwrap(), "https://idmsa.apple.com/");
        assert_eq!(headers.get("Accept").unwrap(), "application/json");
    }
}
