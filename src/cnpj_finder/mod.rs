pub mod browser;
pub mod parser;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{error, info, warn};

pub use browser::{AutomationError, ChromeRenderer, PageRenderer};
pub use parser::find_best_cnpj;

use crate::seller::sanitize_nickname;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                              (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";

/// Sites that publish CNPJ lookups.
pub const TARGET_SITES: &str =
    "site:econodata.com.br OR site:cnpja.com OR site:cnpj.biz OR site:cadastroempresa.com.br";

/// Text of the search engine's "unusual traffic" block page.
pub const BOT_DETECTION_MARKER: &str = "Nossos sistemas detectaram tráfego incomum";

pub const NOT_FOUND: &str = "Nao encontrado (Selenium)";
pub const AUTOMATION_ERROR: &str = "Erro Selenium";

const SEARCH_TIMEOUT_SECS: u64 = 10;

/// HTTP client for the search engine. Has no cookie store, so no search
/// carries cookies from an earlier one.
pub fn build_search_client() -> reqwest::Result<Client> {
    Client::builder().use_rustls_tls().build()
}

/// Anything that can turn a seller name and city into a CNPJ outcome string.
///
/// `nickname` is taken as already sanitized (see [`sanitize_nickname`]).
#[async_trait]
pub trait CnpjLookup: Send + Sync {
    async fn find_cnpj(&self, nickname: &str, city: &str) -> String;
}

/// Search-engine backed resolver: plain HTTP first, rendered browser page second.
pub struct CnpjResolver<R = ChromeRenderer> {
    http: Client,
    search_url: String,
    renderer: R,
}

impl<R: PageRenderer> CnpjResolver<R> {
    pub fn new(http: Client, search_url: &str, renderer: R) -> Self {
        Self {
            http,
            search_url: search_url.to_string(),
            renderer,
        }
    }

    pub fn search_query(nickname: &str, city: &str) -> String {
        format!("\"{}\" \"{}\" {}", nickname, city, TARGET_SITES)
    }

    pub fn search_page_url(&self, query: &str) -> String {
        format!(
            "{}?q={}&gl=br&hl=pt",
            self.search_url,
            urlencoding::encode(query)
        )
    }

    /// Never fails: returns a CNPJ, [`NOT_FOUND`] or [`AUTOMATION_ERROR`].
    pub async fn resolve(&self, nickname: &str, city: &str) -> String {
        self.resolve_sanitized(&sanitize_nickname(nickname), city).await
    }

    /// Same as [`CnpjResolver::resolve`] for a nickname that went through
    /// [`sanitize_nickname`] already.
    pub async fn resolve_sanitized(&self, nickname: &str, city: &str) -> String {
        let url = self.search_page_url(&Self::search_query(nickname, city));

        info!("Fast search for {} in {}", nickname, city);

        match self.fast_search(&url, nickname, city).await {
            Ok(FastOutcome::Found(cnpj)) => {
                info!("✅ CNPJ found over plain HTTP: {}", cnpj);
                return cnpj;
            }
            Ok(FastOutcome::Blocked) => {
                warn!("Search engine returned its block page to the HTTP client");
            }
            Ok(FastOutcome::NoMatch) => {
                warn!("No CNPJ found over plain HTTP, trying the browser");
            }
            Err(e) => {
                error!("Search request failed: {}. Trying the browser", e);
            }
        }

        self.browser_search(&url, nickname, city).await
    }

    async fn fast_search(
        &self,
        url: &str,
        nickname: &str,
        city: &str,
    ) -> reqwest::Result<FastOutcome> {
        let body = self
            .http
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(Duration::from_secs(SEARCH_TIMEOUT_SECS))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        if body.contains(BOT_DETECTION_MARKER) {
            return Ok(FastOutcome::Blocked);
        }

        Ok(match find_best_cnpj(&body, nickname, city) {
            Some(cnpj) => FastOutcome::Found(cnpj),
            None => FastOutcome::NoMatch,
        })
    }

    async fn browser_search(&self, url: &str, nickname: &str, city: &str) -> String {
        warn!("Using the browser fallback (slower)");
        match self.renderer.render(url).await {
            Ok(html) => match find_best_cnpj(&html, nickname, city) {
                Some(cnpj) => {
                    info!("✅ CNPJ found in rendered page: {}", cnpj);
                    cnpj
                }
                None => NOT_FOUND.to_string(),
            },
            Err(e) => {
                error!("Browser fallback failed: {}", e);
                AUTOMATION_ERROR.to_string()
            }
        }
    }
}

enum FastOutcome {
    Found(String),
    Blocked,
    NoMatch,
}

#[async_trait]
impl<R: PageRenderer> CnpjLookup for CnpjResolver<R> {
    async fn find_cnpj(&self, nickname: &str, city: &str) -> String {
        self.resolve_sanitized(nickname, city).await
    }
}
