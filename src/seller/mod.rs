use std::sync::Arc;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::TokenManager;

pub const NOT_AVAILABLE: &str = "N/A";

/// Per-row failure of the profile fetch, carried as data rather than raised.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("token refresh failed")]
    Auth,
    #[error("profile request failed with status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("connection error: {0}")]
    Connection(String),
}

impl FetchError {
    /// Code written into the nickname column as `ERRO <code>`.
    pub fn code(&self) -> String {
        match self {
            FetchError::Auth => "AuthError".to_string(),
            FetchError::HttpStatus { status, .. } => status.to_string(),
            FetchError::Connection(_) => "ConnectionError".to_string(),
        }
    }
}

pub type ProfilePayload = Result<Value, FetchError>;

/// Flat view of a seller profile; one per input row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SellerRecord {
    #[serde(rename = "id_consultado")]
    pub seller_id: u64,
    pub nickname: String,
    pub city: String,
    pub state: String,
    pub power_seller_status: String,
    #[serde(rename = "cnpj_encontrado")]
    pub cnpj_found: String,
    #[serde(skip)]
    failed: bool,
}

impl SellerRecord {
    pub fn is_error(&self) -> bool {
        self.failed
    }

    /// A record takes part in the CNPJ search only with a real nickname and city.
    pub fn is_searchable(&self) -> bool {
        !self.failed
            && !self.nickname.trim().is_empty()
            && self.nickname != NOT_AVAILABLE
            && !self.city.trim().is_empty()
            && self.city != NOT_AVAILABLE
    }
}

/// Removes one leading and one trailing `.` plus surrounding whitespace.
pub fn sanitize_nickname(nickname: &str) -> String {
    let trimmed = nickname.trim();
    let trimmed = trimmed.strip_prefix('.').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    trimmed.trim().to_string()
}

/// Maps a raw profile payload to a [`SellerRecord`]. Every missing field
/// defaults to `N/A` on its own.
pub fn extract(seller_id: u64, payload: &ProfilePayload) -> SellerRecord {
    let value = match payload {
        Ok(value) => value,
        Err(e) => return error_record(seller_id, &e.code()),
    };

    if let Some(marker) = value.get("error") {
        let code = match marker {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return error_record(seller_id, &code);
    }

    let text = |v: Option<&Value>| -> String {
        match v {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => NOT_AVAILABLE.to_string(),
        }
    };

    let nickname = match value.get("nickname") {
        Some(Value::String(s)) => sanitize_nickname(s),
        other => text(other),
    };

    SellerRecord {
        seller_id,
        nickname,
        city: text(value.pointer("/address/city")),
        state: text(value.pointer("/address/state")),
        power_seller_status: text(value.pointer("/seller_reputation/power_seller_status")),
        cnpj_found: NOT_AVAILABLE.to_string(),
        failed: false,
    }
}

fn error_record(seller_id: u64, code: &str) -> SellerRecord {
    SellerRecord {
        seller_id,
        nickname: format!("ERRO {}", code),
        city: NOT_AVAILABLE.to_string(),
        state: NOT_AVAILABLE.to_string(),
        power_seller_status: NOT_AVAILABLE.to_string(),
        cnpj_found: NOT_AVAILABLE.to_string(),
        failed: true,
    }
}

/// Marketplace profile client.
pub struct SellerClient {
    http: Client,
    base_url: String,
    tokens: Arc<TokenManager>,
}

impl SellerClient {
    pub fn new(http: Client, base_url: &str, tokens: Arc<TokenManager>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Fetches `/users/{id}`. On 401/403 the token is refreshed once and the
    /// request retried; the returned token is the one callers must keep using.
    pub async fn fetch(&self, seller_id: u64, token: String) -> (ProfilePayload, String) {
        let url = format!("{}/users/{}", self.base_url, seller_id);

        let mut token = token;
        let mut resp = match self.get(&url, &token).await {
            Ok(resp) => resp,
            Err(e) => return (Err(FetchError::Connection(e.to_string())), token),
        };

        if matches!(resp.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            warn!("Token rejected for seller {}, refreshing...", seller_id);
            let Some(fresh) = self.tokens.refresh().await else {
                return (Err(FetchError::Auth), token);
            };
            token = fresh;

            info!("Retrying seller {} with the new token", seller_id);
            resp = match self.get(&url, &token).await {
                Ok(resp) => resp,
                Err(e) => return (Err(FetchError::Connection(e.to_string())), token),
            };
        }

        if resp.status() != StatusCode::OK {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return (Err(FetchError::HttpStatus { status, body }), token);
        }

        match resp.json::<Value>().await {
            Ok(value) => (Ok(value), token),
            Err(e) => (Err(FetchError::Connection(e.to_string())), token),
        }
    }

    async fn get(&self, url: &str, token: &str) -> reqwest::Result<reqwest::Response> {
        self.http
            .get(url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
    }
}
