use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thirtyfour::prelude::*;
use thirtyfour::{CapabilitiesHelper, ChromeCapabilities};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::USER_AGENT;

const RESULTS_WAIT_SECS: u64 = 15;

const CHROME_PATHS: [&str; 4] = [
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
];

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("Failed to create browser profile directory: {0}")]
    Profile(#[from] std::io::Error),
    #[error("Browser automation failed: {0}")]
    WebDriver(#[from] WebDriverError),
}

/// Renders a search page in a real browser and returns its HTML.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String, AutomationError>;
}

/// Disposable headless Chrome session driven through chromedriver.
///
/// Each call gets its own browser process and a fresh temporary profile,
/// both gone before `render` returns.
pub struct ChromeRenderer {
    webdriver_url: String,
    wait: Duration,
}

impl ChromeRenderer {
    pub fn new(webdriver_url: &str) -> Self {
        Self {
            webdriver_url: webdriver_url.to_string(),
            wait: Duration::from_secs(RESULTS_WAIT_SECS),
        }
    }

    fn capabilities(&self, profile_dir: &Path) -> WebDriverResult<ChromeCapabilities> {
        let mut caps = DesiredCapabilities::chrome();
        caps.add_chrome_arg(&format!("--user-agent={}", USER_AGENT))?;
        caps.add_chrome_arg("--headless=new")?;
        caps.add_chrome_arg("--no-sandbox")?;
        caps.add_chrome_arg("--disable-dev-shm-usage")?;
        caps.add_chrome_arg("--disable-gpu")?;
        caps.add_chrome_arg("--log-level=3")?;
        caps.add_chrome_arg(&format!("--user-data-dir={}", profile_dir.display()))?;
        caps.add_chrome_option(
            "prefs",
            serde_json::json!({ "profile.managed_default_content_settings.images": 2 }),
        )?;
        caps.add("pageLoadStrategy", "eager")?;

        if let Some(binary) = CHROME_PATHS.iter().find(|p| Path::new(p).exists()) {
            info!("Using Chrome binary at {}", binary);
            caps.set_binary(binary)?;
        }

        Ok(caps)
    }

    async fn fetch_rendered(&self, driver: &WebDriver, url: &str) -> WebDriverResult<String> {
        driver.goto(url).await?;
        driver
            .query(By::Id("rso"))
            .wait(self.wait, Duration::from_millis(250))
            .first()
            .await?;
        driver.source().await
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    async fn render(&self, url: &str) -> Result<String, AutomationError> {
        let profile = tempfile::tempdir()?;
        debug!("Browser profile at {:?}", profile.path());

        let caps = self.capabilities(profile.path())?;
        let driver = WebDriver::new(self.webdriver_url.as_str(), caps).await?;

        let result = self.fetch_rendered(&driver, url).await;

        if let Err(e) = driver.quit().await {
            warn!("Failed to close browser session cleanly: {}", e);
        }
        drop(profile);

        Ok(result?)
    }
}
