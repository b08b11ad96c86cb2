//! Apple's SRP-6a variant (RFC 5054 2048-bit group, SHA-256).
//!
//! Two departures from textbook SRP: the password is first stretched with
//! PBKDF2 over its SHA-256 digest, and `x` omits the username while keeping
//! the `:` separator.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use num_bigint::BigUint;
use rand::Rng;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::endpoints::Endpoints;
use super::error::AuthError;
use super::headers::{auth_headers, signin_overrides};
use super::responses::SrpInitResponse;
use super::session::Session;

const N_HEX: &str = concat!(
    "AC6BDB41324A9A9BF166DE5E1389582FAF72B6651987EE07FC319294",
    "3DB56050A37329CBB4A099ED8193E0757767A13DD52312AB4B03310D",
    "CD7F48A9DA04FD50E8083969EDB767B0CF6095179A163AB3661A05FB",
    "D5FAAAE82918A9962F0B93B855F97993EC975EEAA80D740ADBF4FF74",
    "7359D041D5C33EA71D281E446B14773BCA97B43A23FB801676BD207A",
    "436C6481F1D2B9078717461A5B9D32E688F87748544523B524B0D57D",
    "5EA77A2775D2ECFA032CFBDBF52FB3786160279004E57AE6AF874E73",
    "03CE53299CCC041C7BC308D82A5698F3A8D0C38271AE35F8E9DBFBB6",
    "94B5C803D89F7AE435DE236D525F54759B65E372FCD68EF20FA7111F",
    "9E4AFF73",
);
const GENERATOR: u32 = 2;

/// Derive the SRP password key. `s2k_fo` hashes the hex digest, `s2k` the raw one.
fn derive_password_key(password: &str, protocol: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
    let digest = Sha256::digest(password.as_bytes());
    let input: Vec<u8> = if protocol == "s2k_fo" {
        digest
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<String>()
            .into_bytes()
    } else {
        digest.to_vec()
    };

    let mut key = vec![0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(&input, salt, iterations, &mut key);
    key
}

fn pad_to(value: &BigUint, len: usize) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    let mut padded = vec![0u8; len.saturating_sub(bytes.len())];
    padded.extend_from_slice(&bytes);
    padded
}

fn hash_int(parts: &[&[u8]]) -> BigUint {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Client-side proof for `/signin/complete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrpProof {
    pub m1: Vec<u8>,
    pub m2: Vec<u8>,
}

/// One SRP handshake's worth of client state.
pub struct SrpClient {
    n: BigUint,
    g: BigUint,
    a: BigUint,
    a_pub: BigUint,
}

impl SrpClient {
    pub fn new() -> Result<Self> {
        let mut secret = [0u8; 32];
        rand::rng().fill(&mut secret[..]);
        Self::with_secret(&secret)
    }

    fn with_secret(secret: &[u8]) -> Result<Self> {
        let n = BigUint::parse_bytes(N_HEX.as_bytes(), 16)
            .context("Failed to parse SRP group prime")?;
        let g = BigUint::from(GENERATOR);
        let a = BigUint::from_bytes_be(secret);
        let a_pub = g.modpow(&a, &n);
        Ok(Self { n, g, a, a_pub })
    }

    fn n_len(&self) -> usize {
        self.n.to_bytes_be().len()
    }

    /// `A`, base64 encoded for `/signin/init`.
    pub fn public_key_b64(&self) -> String {
        BASE64.encode(self.a_pub.to_bytes_be())
    }

    /// `k = H(N | pad(g))`
    fn multiplier(&self) -> BigUint {
        hash_int(&[
            self.n.to_bytes_be().as_slice(),
            pad_to(&self.g, self.n_len()).as_slice(),
        ])
    }

    /// Compute M1/M2 from the server challenge.
    pub fn process_challenge(
        &self,
        username: &str,
        password_key: &[u8],
        salt: &[u8],
        b_pub: &BigUint,
    ) -> Result<SrpProof, AuthError> {
        let n_len = self.n_len();
        if b_pub % &self.n == BigUint::ZERO {
            return Err(AuthError::FailedLogin("SRP: B mod N is zero".into()));
        }

        let u = hash_int(&[
            pad_to(&self.a_pub, n_len).as_slice(),
            pad_to(b_pub, n_len).as_slice(),
        ]);
        if u == BigUint::ZERO {
            return Err(AuthError::FailedLogin("SRP: u is zero".into()));
        }

        let inner = Sha256::new()
            .chain_update(b":")
            .chain_update(password_key)
            .finalize();
        let x = hash_int(&[salt, inner.as_slice()]);

        let v = self.g.modpow(&x, &self.n);
        let kv = (self.multiplier() * v) % &self.n;
        let base = ((b_pub % &self.n) + &self.n - kv) % &self.n;
        let s = base.modpow(&(&self.a + &u * &x), &self.n);
        let key = Sha256::digest(s.to_bytes_be());

        let h_n = Sha256::digest(self.n.to_bytes_be());
        let h_g = Sha256::digest(pad_to(&self.g, n_len));
        let h_xor: Vec<u8> = h_n.iter().zip(h_g.iter()).map(|(a, b)| a ^ b).collect();

        let m1 = Sha256::new()
            .chain_update(&h_xor)
            .chain_update(Sha256::digest(username.as_bytes()))
            .chain_update(salt)
            .chain_update(self.a_pub.to_bytes_be())
            .chain_update(b_pub.to_bytes_be())
            .chain_update(&key)
            .finalize()
            .to_vec();
        let m2 = Sha256::new()
            .chain_update(self.a_pub.to_bytes_be())
            .chain_update(&m1)
            .chain_update(&key)
            .finalize()
            .to_vec();

        Ok(SrpProof { m1, m2 })
    }
}

/// Run `/signin/init` + `/signin/complete`.
///
/// Returns normally both on full success and when Apple answers 409, which
/// means the password was accepted but a second factor is still needed.
pub async fn sign_in(
    session: &mut Session,
    endpoints: &Endpoints,
    apple_id: &str,
    password: &str,
    client_id: &str,
) -> Result<()> {
    let client = SrpClient::new()?;

    let headers = auth_headers(
        endpoints,
        client_id,
        session.data(),
        &signin_overrides(endpoints),
    )?;
    let init_body = json!({
        "a": client.public_key_b64(),
        "accountName": apple_id,
        "protocols": ["s2k", "s2k_fo"],
    });

    tracing::debug!("Initiating SRP authentication for {}", apple_id);
    let response = session
        .post(&endpoints.signin_init(), &init_body, Some(headers))
        .await?;
    let status = response.status();
    if status.as_u16() == 401 {
        return Err(AuthError::FailedLogin("Failed to initiate SRP authentication".into()).into());
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(AuthError::Api {
            code: status.as_u16(),
            message,
        }
        .into());
    }

    let init: SrpInitResponse = response
        .json()
        .await
        .context("Failed to parse SRP init response")?;
    let iterations = u32::try_from(init.iteration).context("SRP iteration count exceeds u32")?;
    let salt = BASE64.decode(&init.salt).context("Failed to decode SRP salt")?;
    let b_pub = BigUint::from_bytes_be(
        &BASE64
            .decode(&init.b)
            .context("Failed to decode SRP server key")?,
    );
    tracing::debug!("SRP protocol: {}, iterations: {}", init.protocol, iterations);

    let password_key = derive_password_key(password, &init.protocol, &salt, iterations);
    let proof = client.process_challenge(apple_id, &password_key, &salt, &b_pub)?;

    let trust_tokens: Vec<&str> = session
        .get("trust_token")
        .filter(|t| !t.is_empty())
        .into_iter()
        .collect();
    let complete_body = json!({
        "accountName": apple_id,
        "c": init.c,
        "m1": BASE64.encode(&proof.m1),
        "m2": BASE64.encode(&proof.m2),
        "rememberMe": true,
        "trustTokens": trust_tokens,
    });

    // scnt / session id may have rotated on the init response.
    let headers = auth_headers(
        endpoints,
        client_id,
        session.data(),
        &signin_overrides(endpoints),
    )?;
    let response = session
        .post(&endpoints.signin_complete(), &complete_body, Some(headers))
        .await?;

    match response.status().as_u16() {
        409 => {
            tracing::debug!("Sign-in accepted, second factor required");
            Ok(())
        }
        412 => {
            tracing::debug!("Sign-in returned 412, completing account repair");
            let headers = auth_headers(endpoints, client_id, session.data(), &[])?;
            let repair = session
                .post(&endpoints.repair_complete(), &json!({}), Some(headers))
                .await?;
            if repair.status().is_success() {
                Ok(())
            } else {
                let message = repair.text().await.unwrap_or_default();
                Err(AuthError::Api {
                    code: 412,
                    message: format!("Repair failed: {}", message),
                }
                .into())
            }
        }
        code if (200..300).contains(&code) => Ok(()),
        _ => {
            let message = response.text().await.unwrap_or_default();
            Err(AuthError::FailedLogin(format!(
                "Invalid email/password combination: {}",
                message
            ))
            .into())
        }
    }
}
