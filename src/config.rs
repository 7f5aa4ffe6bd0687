use std::path::PathBuf;

pub const DEFAULT_API_BASE_URL: &str = "https://api.mercadolibre.com";
pub const DEFAULT_SEARCH_URL: &str = "https://www.google.com/search";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
pub const DEFAULT_CLIENT_FILE: &str = "client.csv";
pub const DEFAULT_TOKEN_FILE: &str = "token_storage.json";

/// Runtime settings, resolved from the environment (and `.env`) with CLI overrides.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Marketplace API root, e.g. `https://api.mercadolibre.com`
    pub api_base_url: String,
    /// Static credentials file (`client_name,app_id,client_secret,refresh_token`)
    pub client_file: PathBuf,
    /// Token cache rewritten on every refresh
    pub token_file: PathBuf,
    pub search_url: String,
    pub webdriver_url: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            api_base_url: env_or("MELI_API_BASE_URL", DEFAULT_API_BASE_URL),
            client_file: PathBuf::from(env_or("MELI_CLIENT_FILE", DEFAULT_CLIENT_FILE)),
            token_file: PathBuf::from(env_or("MELI_TOKEN_FILE", DEFAULT_TOKEN_FILE)),
            search_url: env_or("CNPJ_SEARCH_URL", DEFAULT_SEARCH_URL),
            webdriver_url: env_or("WEBDRIVER_URL", DEFAULT_WEBDRIVER_URL),
        }
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.api_base_url.trim_end_matches('/'))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            client_file: PathBuf::from(DEFAULT_CLIENT_FILE),
            token_file: PathBuf::from(DEFAULT_TOKEN_FILE),
            search_url: DEFAULT_SEARCH_URL.to_string(),
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}
