//! Gmail OAuth2 token management
//!
//! The tap runs unattended, so there is no interactive authorization flow
//! here: a previously issued token (with a refresh token) must be supplied,
//! either inline in the tap config as base64-encoded JSON or as a JSON file
//! in the mailtap config directory. Expired access tokens are refreshed
//! over HTTP; refreshed tokens are kept in memory only and never written
//! back to durable storage.

use anyhow::{Context, Result};
use base64::prelude::*;
use serde::Deserialize;
use std::cell::RefCell;

/// Stored token filename in the mailtap config directory
const TOKEN_FILE: &str = "gmail-token.json";

/// Error raised when the stored credential cannot be loaded.
///
/// This is fatal at startup, before any search is issued.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("No stored Gmail token found (expected inline token_base64 or {TOKEN_FILE})")]
    NotFound,
    #[error("Stored Gmail token is corrupt: {0}")]
    Invalid(String),
}

/// OAuth client credentials for the Gmail API
#[derive(Debug, Clone, Deserialize)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format (installed app)
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<GmailCredentials>,
    web: Option<GmailCredentials>,
}

impl GmailCredentials {
    /// Credentials filename in the mailtap config directory
    const CREDENTIALS_FILE: &'static str = "google-credentials.json";

    /// Load client credentials, preferring the config-directory file
    /// (Google Cloud Console format) and falling back to environment
    /// variables (GMAIL_CLIENT_ID / GMAIL_CLIENT_SECRET).
    pub fn load() -> Result<Self> {
        if config::config_exists(Self::CREDENTIALS_FILE) {
            let file: GoogleCredentialFile = config::load_json(Self::CREDENTIALS_FILE)?;
            return file
                .installed
                .or(file.web)
                .context("Credentials file missing 'installed' or 'web' section");
        }

        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }
}

/// Stored token data, as issued by Google's token endpoint
#[derive(Debug, Clone, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    /// Epoch seconds after which the access token is stale
    expires_at: Option<i64>,
}

/// Token response from Google's refresh endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// Token management for one run.
///
/// Holds the decoded token in memory for the lifetime of the run. Not
/// designed for concurrent use: each unit of work needs its own handle.
#[derive(Debug)]
pub struct GmailAuth {
    credentials: GmailCredentials,
    token: RefCell<StoredToken>,
}

impl GmailAuth {
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Seconds of remaining validity below which a token is refreshed early
    const EXPIRY_BUFFER_SECS: i64 = 300;

    /// Build from an inline base64-encoded token JSON blob (as carried in
    /// the tap config). The decoded secret exists only in this process.
    pub fn from_token_base64(credentials: GmailCredentials, token_base64: &str) -> Result<Self> {
        let cleaned: String = token_base64.split_whitespace().collect();
        let bytes = BASE64_STANDARD
            .decode(cleaned.as_bytes())
            .map_err(|e| CredentialError::Invalid(e.to_string()))?;
        let token: StoredToken =
            serde_json::from_slice(&bytes).map_err(|e| CredentialError::Invalid(e.to_string()))?;
        Ok(Self {
            credentials,
            token: RefCell::new(token),
        })
    }

    /// Build from the token file in the mailtap config directory.
    pub fn from_token_file(credentials: GmailCredentials) -> Result<Self> {
        if !config::config_exists(TOKEN_FILE) {
            return Err(CredentialError::NotFound.into());
        }
        let token: StoredToken = config::load_json(TOKEN_FILE)
            .map_err(|e| CredentialError::Invalid(e.to_string()))?;
        Ok(Self {
            credentials,
            token: RefCell::new(token),
        })
    }

    /// Get a valid access token, refreshing over HTTP if it is expired or
    /// close to expiry. The refreshed token is cached in memory for the
    /// rest of the run.
    pub fn get_access_token(&self) -> Result<String> {
        {
            let token = self.token.borrow();
            if let Some(expires_at) = token.expires_at {
                let now = chrono::Utc::now().timestamp();
                if expires_at > now + Self::EXPIRY_BUFFER_SECS {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let refresh_token = self
            .token
            .borrow()
            .refresh_token
            .clone()
            .context("Stored token is expired and has no refresh token")?;

        let refreshed = self.refresh_access_token(&refresh_token)?;

        let mut token = self.token.borrow_mut();
        token.access_token = refreshed.access_token.clone();
        token.expires_at = refreshed
            .expires_in
            .map(|d| chrono::Utc::now().timestamp() + d as i64);

        Ok(refreshed.access_token)
    }

    /// Exchange a refresh token for a fresh access token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        response
            .into_body()
            .read_json()
            .context("Failed to parse refresh token response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> GmailCredentials {
        GmailCredentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    fn encode_token(json: &str) -> String {
        BASE64_STANDARD.encode(json.as_bytes())
    }

    #[test]
    fn test_from_token_base64() {
        let json = r#"{"access_token":"at","refresh_token":"rt","expires_at":9999999999}"#;
        let auth = GmailAuth::from_token_base64(creds(), &encode_token(json)).unwrap();
        // far-future expiry: no refresh attempt, token returned as-is
        assert_eq!(auth.get_access_token().unwrap(), "at");
    }

    #[test]
    fn test_from_token_base64_tolerates_whitespace() {
        let json = r#"{"access_token":"at","refresh_token":"rt","expires_at":9999999999}"#;
        let mut encoded = encode_token(json);
        encoded.insert(4, '\n');
        let auth = GmailAuth::from_token_base64(creds(), &encoded).unwrap();
        assert_eq!(auth.get_access_token().unwrap(), "at");
    }

    #[test]
    fn test_corrupt_token_base64_is_credential_error() {
        let err = GmailAuth::from_token_base64(creds(), "!!not-base64!!").unwrap_err();
        assert!(err.downcast_ref::<CredentialError>().is_some());
    }

    #[test]
    fn test_corrupt_token_json_is_credential_error() {
        let err = GmailAuth::from_token_base64(creds(), &encode_token("{not json")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CredentialError>(),
            Some(CredentialError::Invalid(_))
        ));
    }
}
