use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::Settings;

const PROBE_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Credentials file not found: {0}")]
    MissingCredentials(PathBuf),
    #[error("Credentials file {0} has no rows")]
    EmptyCredentials(PathBuf),
    #[error("Failed to read credentials: {0}")]
    Csv(#[from] csv::Error),
    #[error("Refresh token not found in the token cache nor in the credentials file")]
    MissingRefreshToken,
    #[error("Token request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token endpoint returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Malformed token response: {0}")]
    MalformedResponse(String),
    #[error("Failed to persist token state: {0}")]
    Io(#[from] std::io::Error),
}

/// One row of the static credentials file. Only the first row is used.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub client_name: String,
    pub app_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Last response of the OAuth token endpoint, persisted as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// `token_type`, `expires_in`, `scope`, `user_id`, ...
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

pub fn load_credentials(path: &Path) -> Result<Credentials, AuthError> {
    if !path.exists() {
        return Err(AuthError::MissingCredentials(path.to_path_buf()));
    }

    let mut reader = csv::Reader::from_path(path)?;
    match reader.deserialize::<Credentials>().next() {
        Some(row) => Ok(row?),
        None => Err(AuthError::EmptyCredentials(path.to_path_buf())),
    }
}

/// Reads the token cache. A missing or unreadable file yields an empty state.
pub fn load_token_state(path: &Path) -> TokenState {
    if !path.exists() {
        debug!("No token cache at {:?}", path);
        return TokenState::default();
    }

    match fs::read_to_string(path) {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            warn!("Ignoring malformed token cache {:?}: {}", path, e);
            TokenState::default()
        }),
        Err(e) => {
            warn!("Failed to read token cache {:?}: {}", path, e);
            TokenState::default()
        }
    }
}

fn save_token_state(path: &Path, state: &TokenState) -> Result<(), AuthError> {
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
    fs::write(path, json)?;
    Ok(())
}

/// Obtains, caches and refreshes the marketplace bearer token.
///
/// Every public operation returns `None` instead of an error; callers decide
/// whether a missing token is fatal.
pub struct TokenManager {
    http: Client,
    probe_url: String,
    token_url: String,
    client_file: PathBuf,
    token_file: PathBuf,
    credentials: OnceLock<Credentials>,
}

impl TokenManager {
    pub fn new(http: Client, settings: &Settings) -> Self {
        Self {
            http,
            probe_url: format!("{}/users/me", settings.api_base_url.trim_end_matches('/')),
            token_url: settings.token_url(),
            client_file: settings.client_file.clone(),
            token_file: settings.token_file.clone(),
            credentials: OnceLock::new(),
        }
    }

    /// Returns the cached access token when the API still accepts it,
    /// otherwise a freshly refreshed one.
    pub async fn get_valid_token(&self) -> Option<String> {
        let state = load_token_state(&self.token_file);
        let Some(access_token) = state.access_token.filter(|t| !t.is_empty()) else {
            info!("No cached token, requesting a new one...");
            return self.refresh().await;
        };

        let probe = self
            .http
            .get(&self.probe_url)
            .bearer_auth(&access_token)
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .send()
            .await;

        match probe {
            Ok(resp) if resp.status() == StatusCode::OK => {
                info!("Cached access token is valid");
                Some(access_token)
            }
            Ok(resp) => {
                info!("Token probe failed (status {}), refreshing", resp.status());
                self.refresh().await
            }
            Err(e) => {
                info!("Token probe connection failed ({}), refreshing", e);
                self.refresh().await
            }
        }
    }

    /// Exchanges the refresh token for a new access token and rewrites the token cache.
    pub async fn refresh(&self) -> Option<String> {
        info!("Refreshing access token...");
        match self.try_refresh().await {
            Ok(token) => {
                info!("✅ Access token refreshed and saved to {:?}", self.token_file);
                Some(token)
            }
            Err(e) => {
                error!("Token refresh failed: {}", e);
                None
            }
        }
    }

    async fn try_refresh(&self) -> Result<String, AuthError> {
        let credentials = self.credentials()?;
        let stored = load_token_state(&self.token_file);

        let refresh_token = stored
            .refresh_token
            .or_else(|| credentials.refresh_token.clone())
            .filter(|t| !t.trim().is_empty())
            .ok_or(AuthError::MissingRefreshToken)?;

        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", credentials.app_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];

        let resp = self
            .http
            .post(&self.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Status { status, body });
        }

        let state: TokenState = resp
            .json()
            .await
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;

        save_token_state(&self.token_file, &state)?;

        state
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse("missing access_token".to_string()))
    }

    fn credentials(&self) -> Result<&Credentials, AuthError> {
        if let Some(credentials) = self.credentials.get() {
            return Ok(credentials);
        }
        let loaded = load_credentials(&self.client_file)?;
        debug!("Loaded credentials for app {}", loaded.client_name);
        Ok(self.credentials.get_or_init(|| loaded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_credentials_uses_first_row() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "client_name,app_id,client_secret,refresh_token").unwrap();
        writeln!(file, "loja,123456,s3cret,TG-first").unwrap();
        writeln!(file, "outra,999,other,TG-second").unwrap();

        let credentials = load_credentials(file.path()).unwrap();
        assert_eq!(credentials.client_name, "loja");
        assert_eq!(credentials.app_id, "123456");
        assert_eq!(credentials.refresh_token.as_deref(), Some("TG-first"));
    }

    #[test]
    fn test_load_credentials_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_credentials(&dir.path().join("client.csv")).err().unwrap();
        assert!(matches!(err, AuthError::MissingCredentials(_)));
    }

    #[test]
    fn test_load_credentials_header_only() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "client_name,app_id,client_secret,refresh_token").unwrap();

        let err = load_credentials(file.path()).err().unwrap();
        assert!(matches!(err, AuthError::EmptyCredentials(_)));
    }

    #[test]
    fn test_malformed_token_cache_is_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let state = load_token_state(file.path());
        assert!(state.access_token.is_none());
        assert!(state.refresh_token.is_none());
    }

    #[test]
    fn test_token_state_keeps_metadata() {
        let json = r#"{"access_token":"APP_USR-1","refresh_token":"TG-2","expires_in":21600,"user_id":42}"#;
        let state: TokenState = serde_json::from_str(json).unwrap();
        assert_eq!(state.access_token.as_deref(), Some("APP_USR-1"));
        assert_eq!(state.metadata["expires_in"], 21600);

        let round = serde_json::to_value(&state).unwrap();
        assert_eq!(round["user_id"], 42);
        assert_eq!(round["refresh_token"], "TG-2");
    }
}
