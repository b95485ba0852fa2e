//! Google Identity Services sign-in.
//!
//! The browser hands us the ID token it received from Google. We ask Google's
//! tokeninfo endpoint to validate it, then check that it was minted for our
//! client id and that the address is verified.

use serde::Deserialize;
use tracing::warn;

use crate::error::ApiError;

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleIdentity {
    pub google_id: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    sub: String,
    email: Option<String>,
    /// Google sends `"true"` as a string; accept a JSON bool as well.
    #[serde(default)]
    email_verified: Option<serde_json::Value>,
    name: Option<String>,
}

pub struct GoogleVerifier {
    client_id: String,
    http: reqwest::Client,
}

impl GoogleVerifier {
    pub fn new(client_id: String) -> Self {
        Self {
            client_id,
            http: reqwest::Client::new(),
        }
    }

    pub async fn verify(&self, credential: &str) -> Result<GoogleIdentity, ApiError> {
        let resp = self
            .http
            .get(TOKENINFO_URL)
            .query(&[("id_token", credential)])
            .send()
            .await
            .map_err(|e| {
                warn!("Google tokeninfo request failed: {}", e);
                ApiError::external("Could not reach Google")
            })?;

        if !resp.status().is_success() {
            warn!("Google rejected credential with status {}", resp.status());
            return Err(ApiError::unauthorized("Invalid Google credential"));
        }

        let info: TokenInfo = resp.json().await.map_err(|e| {
            warn!("Unreadable Google tokeninfo response: {}", e);
            ApiError::external("Unexpected response from Google")
        })?;

        check_token_info(info, &self.client_id)
    }
}

fn check_token_info(info: TokenInfo, client_id: &str) -> Result<GoogleIdentity, ApiError> {
    if info.aud != client_id {
        warn!("Google credential issued for another audience: {}", info.aud);
        return Err(ApiError::unauthorized("Invalid Google credential"));
    }

    let verified = match &info.email_verified {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s == "true",
        _ => false,
    };
    if !verified {
        return Err(ApiError::unauthorized("Google account email is not verified"));
    }

    let email = info
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Google credential carries no email"))?;

    Ok(GoogleIdentity {
        google_id: info.sub,
        email,
        name: info.name,
    })
}
