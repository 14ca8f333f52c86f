// spider_chrome re-exports chromiumoxide API
use super::driver::{
    LoadState, Locator, OptionSource, PageDriver, PageFactory, ScreenshotScope,
};
use crate::error::{BrowserError, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::element::Element;
use chromiumoxide::page::{Page, ScreenshotParams};
use chromiumoxide_fetcher::{BrowserFetcher, BrowserFetcherOptions};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct ChromeBrowser {
    browser: Browser,
    temp_dir: Option<PathBuf>,
}

/// Connection mode for Chrome browser
pub enum ConnectionMode {
    /// Sandboxed mode - launches Chrome using system installation
    Sandboxed {
        chrome_path: Option<String>,
        no_sandbox: bool,
        headless: bool,
    },
    /// Advanced mode - connects to existing Chrome on debug port
    DebugPort(u16),
}

impl ChromeBrowser {
    /// Connect to existing Chrome on debug port (advanced mode)
    pub async fn connect_debug_port(port: u16) -> Result<Self> {
        Self::new(ConnectionMode::DebugPort(port)).await
    }

    pub async fn new(mode: ConnectionMode) -> Result<Self> {
        let (browser, temp_dir) = match mode {
            ConnectionMode::Sandboxed {
                chrome_path,
                no_sandbox,
                headless,
            } => {
                // Unique profile dir so concurrent runs never share state
                let unique_id = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_nanos())
                    .unwrap_or_default();
                let temp_dir =
                    std::env::temp_dir().join(format!("variant-capture-{}", unique_id));
                std::fs::create_dir_all(&temp_dir).map_err(|e| {
                    BrowserError::LaunchFailed(format!("Failed to create temp directory: {}", e))
                })?;

                let mut config = if headless {
                    BrowserConfig::builder()
                } else {
                    BrowserConfig::builder().with_head()
                };

                config = config.user_data_dir(&temp_dir);

                if no_sandbox {
                    config = config.arg("--no-sandbox");
                }

                if let Some(path) = chrome_path {
                    config = config.chrome_executable(path);
                } else {
                    match Self::ensure_chrome_installed().await {
                        Ok(path) => {
                            config = config.chrome_executable(path);
                        }
                        Err(e) => {
                            log::warn!("Auto-download failed ({}), trying system Chrome...", e);
                        }
                    }
                }

                let config = config.build().map_err(|e| {
                    BrowserError::LaunchFailed(format!(
                        "{}. Install Chrome or pass --chrome-path /path/to/chrome \
                         (Linux sandbox issue? Try --no-sandbox)",
                        e
                    ))
                })?;

                let (browser, mut handler) = Browser::launch(config)
                    .await
                    .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

                tokio::spawn(async move {
                    while (handler.next().await).is_some() {
                        // Handle browser events
                    }
                });

                (browser, Some(temp_dir))
            }
            ConnectionMode::DebugPort(port) => {
                let url = format!("http://localhost:{}", port);
                let (browser, mut handler) = Browser::connect(&url).await.map_err(|e| {
                    BrowserError::ConnectionFailed(format!(
                        "Failed to connect to Chrome on port {}. \
                             Make sure Chrome is running with --remote-debugging-port={}: {}",
                        port, port, e
                    ))
                })?;

                tokio::spawn(async move {
                    while (handler.next().await).is_some() {
                        // Handle browser events
                    }
                });

                (browser, None)
            }
        };

        Ok(Self { browser, temp_dir })
    }

    /// Close the browser connection
    pub async fn close(self) -> Result<()> {
        self.browser
            .close()
            .await
            .map_err(|e| BrowserError::Other(e.to_string()))?;
        Ok(())
    }

    /// Ensure Chrome is installed, downloading if necessary
    async fn ensure_chrome_installed() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| BrowserError::Other("Cannot determine cache directory".to_string()))?
            .join("variant-capture")
            .join("chrome");

        tokio::fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| BrowserError::Other(format!("Failed to create cache dir: {}", e)))?;

        let marker = cache_dir.join(".downloaded");
        if marker.exists() {
            if let Some(executable) = Self::find_chrome_in_cache(&cache_dir) {
                return Ok(executable);
            }
        }

        log::info!("Downloading Chrome for Testing (first time only, ~150MB)...");
        let fetcher = BrowserFetcher::new(
            BrowserFetcherOptions::builder()
                .with_path(&cache_dir)
                .build()
                .map_err(|e| BrowserError::Other(format!("Fetcher config failed: {}", e)))?,
        );

        let info = fetcher
            .fetch()
            .await
            .map_err(|e| BrowserError::Other(format!("Chrome download failed: {}", e)))?;

        tokio::fs::write(&marker, "downloaded")
            .await
            .map_err(|e| BrowserError::Other(format!("Failed to write marker: {}", e)))?;

        Ok(info.executable_path)
    }

    fn find_chrome_in_cache(cache_dir: &Path) -> Option<PathBuf> {
        [
            "chrome",
            "chrome.exe",
            "Google Chrome.app/Contents/MacOS/Google Chrome",
            "chrome-linux/chrome",
            "chrome-mac/Chromium.app/Contents/MacOS/Chromium",
            "chrome-win/chrome.exe",
        ]
        .iter()
        .map(|p| cache_dir.join(p))
        .find(|p| p.exists())
    }
}

#[async_trait]
impl PageFactory for ChromeBrowser {
    type Page = ChromePage;

    async fn open_page(&self) -> Result<ChromePage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Other(format!("Failed to create page: {}", e)))?;
        Ok(ChromePage::new(page))
    }
}

impl Drop for ChromeBrowser {
    fn drop(&mut self) {
        if let Some(temp_dir) = &self.temp_dir {
            if temp_dir.exists() {
                let _ = std::fs::remove_dir_all(temp_dir);
            }
        }
    }
}

/// A single Chrome tab driven over CDP.
#[derive(Clone)]
pub struct ChromePage {
    page: Page,
}

impl ChromePage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// Get access to the underlying page for advanced CDP usage
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// First element matching the locator, honouring its text filter.
    async fn find(&self, locator: &Locator) -> Result<Option<Element>> {
        let elements = match self.page.find_elements(locator.css.as_str()).await {
            Ok(elements) => elements,
            // chromiumoxide reports an empty match set as an error on some versions
            Err(_) => return Ok(None),
        };

        if locator.has_text.is_none() {
            return Ok(elements.into_iter().next());
        }

        let mut texts = Vec::with_capacity(elements.len());
        for element in &elements {
            texts.push(element.inner_text().await.ok().flatten().unwrap_or_default());
        }
        Ok(locator
            .pick(&texts)
            .and_then(|index| elements.into_iter().nth(index)))
    }

    fn normalize_url(url: &str) -> String {
        if !url.starts_with("http://")
            && !url.starts_with("https://")
            && !url.starts_with("file://")
            && !url.starts_with("about:")
            && !url.starts_with("data:")
        {
            format!("https://{}", url)
        } else {
            url.to_string()
        }
    }
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        use chromiumoxide::cdp::browser_protocol::page::{EventLoadEventFired, NavigateParams};

        let normalized_url = Self::normalize_url(url);
        log::debug!("Navigating to {}", normalized_url);

        // Subscribe before navigating so a fast load event is not missed
        let mut load_events = self
            .page
            .event_listener::<EventLoadEventFired>()
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

        let params = NavigateParams::builder()
            .url(&normalized_url)
            .build()
            .map_err(|e| {
                BrowserError::NavigationFailed(format!("Invalid URL {}: {}", normalized_url, e))
            })?;

        let response = self.page.execute(params).await.map_err(|e| {
            let error_str = e.to_string();
            if error_str.contains("oneshot canceled") {
                BrowserError::NavigationFailed(
                    "Browser connection lost. The browser may have been closed or crashed."
                        .to_string(),
                )
            } else {
                BrowserError::NavigationFailed(format!(
                    "Failed to navigate to {}: {}",
                    normalized_url, e
                ))
            }
        })?;

        if let Some(error_text) = response.result.error_text.clone() {
            return Err(BrowserError::NavigationFailed(format!(
                "Navigation error: {}",
                error_text
            )));
        }

        match tokio::time::timeout(timeout, load_events.next()).await {
            Ok(_) => Ok(()),
            Err(_) => Err(BrowserError::Timeout(format!(
                "load event for {} not fired within {}ms",
                normalized_url,
                timeout.as_millis()
            ))),
        }
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()> {
        let wanted: &[&str] = match state {
            LoadState::DomContentLoaded => &["interactive", "complete"],
            LoadState::Load => &["complete"],
        };

        let poll = async {
            loop {
                let ready_state = self
                    .evaluate("document.readyState")
                    .await?
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_default();
                if wanted.contains(&ready_state.as_str()) {
                    return Ok(());
                }
                tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(timeout, poll).await.map_err(|_| {
            BrowserError::Timeout(format!("{:?} not reached within {}ms", state, timeout.as_millis()))
        })?
    }

    async fn wait_for_selector(&self, locator: &Locator, timeout: Duration) -> Result<bool> {
        let poll = async {
            loop {
                if self.find(locator).await?.is_some() {
                    return Ok::<bool, BrowserError>(true);
                }
                tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(found) => found,
            Err(_) => Ok(false),
        }
    }

    async fn query_selector(&self, locator: &Locator) -> Result<bool> {
        Ok(self.find(locator).await?.is_some())
    }

    async fn query_selector_all(
        &self,
        selector: &str,
        source: &OptionSource,
    ) -> Result<Vec<String>> {
        let elements = match self.page.find_elements(selector).await {
            Ok(elements) => elements,
            Err(_) => return Ok(Vec::new()),
        };

        let mut values = Vec::with_capacity(elements.len());
        for element in elements {
            let value = match source {
                OptionSource::Text => element.inner_text().await?,
                OptionSource::Attribute(name) => element.attribute(name.as_str()).await?,
            };
            if let Some(value) = value.map(|v| v.trim().to_string()) {
                if !value.is_empty() {
                    values.push(value);
                }
            }
        }
        Ok(values)
    }

    async fn click(&self, locator: &Locator, timeout: Duration) -> Result<()> {
        let attempt = async {
            let element = self
                .find(locator)
                .await?
                .ok_or_else(|| BrowserError::ElementNotFound(locator.to_string()))?;
            let point = element.scroll_into_view().await?.clickable_point().await?;

            // A mouse event lands on whatever is topmost at the point
            let hit = element
                .call_js_fn(hit_test_function(point.x, point.y), false)
                .await?;
            let receives_click = hit
                .result
                .value
                .as_ref()
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            if !receives_click {
                return Err(BrowserError::Other(format!(
                    "{} is covered by another element",
                    locator
                )));
            }

            self.page.click(point).await?;
            Ok::<(), BrowserError>(())
        };

        tokio::time::timeout(timeout, attempt).await.map_err(|_| {
            BrowserError::Timeout(format!(
                "click on {} did not complete within {}ms",
                locator,
                timeout.as_millis()
            ))
        })?
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Other(format!("Script execution failed: {}", e)))?;

        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    async fn inner_text(&self, selector: &str) -> Result<Option<String>> {
        match self.find(&Locator::css(selector)).await? {
            Some(element) => Ok(element
                .inner_text()
                .await?
                .map(|text| normalize_whitespace(&text))),
            None => Ok(None),
        }
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.page.press_key(key).await?;
        Ok(())
    }

    async fn screenshot(&self, scope: ScreenshotScope) -> Result<Vec<u8>> {
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .full_page(scope.is_full_page())
                    .build(),
            )
            .await
            .map_err(|e| BrowserError::Other(format!("Failed to take screenshot: {}", e)))
    }

    async fn set_viewport_size(&self, width: u32, height: u32) -> Result<()> {
        use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;

        self.page
            .emulate_viewport(SetDeviceMetricsOverrideParams::new(
                width as i64,
                height as i64,
                1.0,
                false,
            ))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| BrowserError::Other(e.to_string()))
    }
}

/// Function run on the target element: true when the element (or a label
/// bound to it) is what sits topmost at viewport point `(x, y)`.
fn hit_test_function(x: f64, y: f64) -> String {
    format!(
        r#"function() {{
            const hit = document.elementFromPoint({x}, {y});
            if (hit === null) return false;
            if (hit === this || this.contains(hit)) return true;
            const label = hit.closest('label');
            return label !== null && label.control === this;
        }}"#
    )
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
