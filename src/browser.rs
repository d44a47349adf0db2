//! Headless browser sessions for the scrape provider.
//!
//! This module is only available when the `headless` Cargo feature is enabled.
//! It provides a shared browser process with bounded tab concurrency and a
//! `PageFetcher` whose sessions are real Chrome tabs driven over CDP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EventResponseReceived, Headers, ResourceType, SetExtraHttpHeadersParams,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::Page;
use futures::{FutureExt, StreamExt};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::fetcher::{PageFetcher, PageSession, WaitStrategy};
use crate::fingerprint::ClientFingerprint;
use crate::{Result, SearchError};

/// Configuration for the browser pool.
#[derive(Debug, Clone)]
pub struct BrowserPoolConfig {
    /// Maximum number of concurrent browser tabs.
    pub max_tabs: usize,
    /// Whether to run the browser in headless mode.
    pub headless: bool,
    /// Path to the Chrome/Chromium executable. If `None`, auto-detected.
    pub chrome_path: Option<String>,
    /// Additional launch arguments for Chrome.
    pub launch_args: Vec<String>,
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            max_tabs: 4,
            headless: true,
            chrome_path: None,
            launch_args: Vec::new(),
        }
    }
}

/// A shared pool managing a single browser process with tab concurrency control.
///
/// The browser is lazily launched on the first `acquire_browser()` call. A
/// semaphore limits the number of concurrent tabs to prevent memory exhaustion.
pub struct BrowserPool {
    config: BrowserPoolConfig,
    browser: Mutex<Option<Arc<Browser>>>,
    tab_semaphore: Arc<Semaphore>,
}

impl BrowserPool {
    /// Creates a new browser pool with the given configuration.
    pub fn new(config: BrowserPoolConfig) -> Self {
        let max_tabs = config.max_tabs.max(1);
        Self {
            config,
            browser: Mutex::new(None),
            tab_semaphore: Arc::new(Semaphore::new(max_tabs)),
        }
    }

    /// Tabs that can still be opened without waiting.
    pub fn available_tabs(&self) -> usize {
        self.tab_semaphore.available_permits()
    }

    /// Waits for a free tab slot. The slot is held until the permit drops.
    async fn acquire_tab(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.tab_semaphore)
            .acquire_owned()
            .await
            .map_err(|e| SearchError::Browser(format!("Tab semaphore closed: {}", e)))
    }

    /// Lazily launches the browser and returns a shared handle.
    pub async fn acquire_browser(&self) -> Result<Arc<Browser>> {
        let mut guard = self.browser.lock().await;

        if let Some(ref browser) = *guard {
            return Ok(Arc::clone(browser));
        }

        debug!("Launching headless browser");

        let mut builder = BrowserConfig::builder();

        if self.config.headless {
            builder = builder.arg("--headless=new");
        }

        // Explicit path > auto-detect
        let chrome_path = match self.config.chrome_path {
            Some(ref path) => std::path::PathBuf::from(path),
            None => crate::browser_setup::detect_chrome().ok_or_else(|| {
                SearchError::Browser(
                    "Chrome/Chromium not found; set scrape.chrome_path or CHROME".to_string(),
                )
            })?,
        };
        debug!("Using Chrome at: {}", chrome_path.display());
        builder = builder.chrome_executable(chrome_path);

        // Anti-detection: hide navigator.webdriver and automation indicators
        builder = builder.arg("--disable-blink-features=AutomationControlled");

        builder = builder
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--disable-default-apps")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--mute-audio")
            .arg("--no-first-run");

        for arg in &self.config.launch_args {
            builder = builder.arg(arg);
        }

        let browser_config = builder
            .build()
            .map_err(|e| SearchError::Browser(format!("Failed to build browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| SearchError::Browser(format!("Failed to launch browser: {}", e)))?;

        // Spawn the CDP event handler as a background task
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("Browser CDP handler error: {}", e);
                }
            }
            debug!("Browser CDP handler exited");
        });

        let browser = Arc::new(browser);
        *guard = Some(Arc::clone(&browser));

        Ok(browser)
    }

    /// Closes the browser process if no session still holds it.
    pub async fn shutdown(&self) {
        let mut guard = self.browser.lock().await;
        let Some(browser) = guard.take() else {
            return;
        };
        match Arc::try_unwrap(browser) {
            Ok(mut browser) => {
                if let Err(e) = browser.close().await {
                    warn!("Failed to close browser: {}", e);
                }
                debug!("Browser pool shut down");
            }
            Err(_) => debug!("Browser still referenced at shutdown; dropping handle"),
        }
    }
}

/// A `PageFetcher` whose sessions are browser tabs.
///
/// Each `open()` takes a tab slot, opens a blank tab, applies the client
/// identity (user agent, headers, viewport, stealth script) before any
/// navigation, then loads the URL and waits per the configured strategy.
pub struct BrowserFetcher {
    pool: Arc<BrowserPool>,
    wait: WaitStrategy,
}

impl BrowserFetcher {
    /// Creates a new browser fetcher with default wait strategy (`Load`).
    pub fn new(pool: Arc<BrowserPool>) -> Self {
        Self {
            pool,
            wait: WaitStrategy::default(),
        }
    }

    /// Sets the wait strategy for page rendering.
    pub fn with_wait(mut self, wait: WaitStrategy) -> Self {
        self.wait = wait;
        self
    }

    async fn apply_identity(page: &Page, fingerprint: &ClientFingerprint) -> Result<()> {
        page.execute(SetUserAgentOverrideParams {
            user_agent: fingerprint.user_agent.clone(),
            accept_language: Some(fingerprint.accept_language.clone()),
            platform: Some(fingerprint.platform.clone()),
            user_agent_metadata: None,
        })
        .await
        .map_err(|e| SearchError::Browser(format!("Failed to set user agent: {}", e)))?;

        let extra: serde_json::Map<String, serde_json::Value> = fingerprint
            .headers()
            .into_iter()
            .filter(|(name, _)| *name != "User-Agent")
            .map(|(name, value)| (name.to_string(), serde_json::Value::String(value)))
            .collect();
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(
            serde_json::Value::Object(extra),
        )))
        .await
        .map_err(|e| SearchError::Browser(format!("Failed to set headers: {}", e)))?;

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(fingerprint.viewport.width as i64)
            .height(fingerprint.viewport.height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(SearchError::Browser)?;
        page.execute(metrics)
            .await
            .map_err(|e| SearchError::Browser(format!("Failed to set viewport: {}", e)))?;

        page.execute(AddScriptToEvaluateOnNewDocumentParams {
            source: fingerprint.stealth_script(),
            include_command_line_api: None,
            world_name: None,
            run_immediately: None,
        })
        .await
        .map_err(|e| SearchError::Browser(format!("Failed to inject stealth script: {}", e)))?;

        Ok(())
    }

    async fn navigate(&self, page: &Page, url: &str) -> Result<()> {
        page.goto(url)
            .await
            .map_err(|e| SearchError::Browser(format!("Navigation failed: {}", e)))?;

        match &self.wait {
            WaitStrategy::Load => {
                page.wait_for_navigation()
                    .await
                    .map_err(|e| SearchError::Browser(format!("Navigation wait failed: {}", e)))?;
            }
            WaitStrategy::NetworkIdle { idle_ms } => {
                page.wait_for_navigation()
                    .await
                    .map_err(|e| SearchError::Browser(format!("Navigation wait failed: {}", e)))?;
                tokio::time::sleep(Duration::from_millis(*idle_ms)).await;
            }
            WaitStrategy::Selector { css, timeout_ms } => {
                // A block page won't have the selector; let block detection
                // look at whatever rendered instead of failing here.
                let found = tokio::time::timeout(Duration::from_millis(*timeout_ms), async {
                    page.find_element(css.as_str()).await
                })
                .await;
                if let Err(_) | Ok(Err(_)) = found {
                    debug!(
                        "Selector '{}' not found within {}ms, proceeding with current page content",
                        css, timeout_ms
                    );
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn open(&self, url: &str, fingerprint: &ClientFingerprint) -> Result<Box<dyn PageSession>> {
        let permit = self.pool.acquire_tab().await?;
        let browser = self.pool.acquire_browser().await?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SearchError::Browser(format!("Failed to open tab: {}", e)))?;

        // From here on the session owns the tab, so every early return closes it.
        let mut session = BrowserSession {
            page: Some(page),
            status: None,
            _permit: permit,
        };
        let page = session.page()?;
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| SearchError::Browser(format!("Failed to watch responses: {}", e)))?;
        Self::apply_identity(page, fingerprint).await?;
        self.navigate(page, url).await?;

        session.status = document_status(drain(&mut responses));
        debug!("Main document status: {:?}", session.status);
        Ok(Box::new(session))
    }

    async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

/// Responses already delivered, without waiting for more.
fn drain(responses: &mut EventStream<EventResponseReceived>) -> Vec<(ResourceType, i64)> {
    let mut seen = Vec::new();
    while let Some(Some(event)) = responses.next().now_or_never() {
        seen.push((event.r#type.clone(), event.response.status));
    }
    seen
}

/// Status of the first document response, which is the main frame's;
/// later documents belong to iframes.
fn document_status(responses: impl IntoIterator<Item = (ResourceType, i64)>) -> Option<u16> {
    responses
        .into_iter()
        .find(|(kind, _)| *kind == ResourceType::Document)
        .and_then(|(_, status)| u16::try_from(status).ok())
}

/// One open tab plus its concurrency slot.
struct BrowserSession {
    page: Option<Page>,
    status: Option<u16>,
    _permit: OwnedSemaphorePermit,
}

impl BrowserSession {
    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| SearchError::Browser("page session already closed".into()))
    }
}

#[async_trait]
impl PageSession for BrowserSession {
    fn status(&self) -> Option<u16> {
        self.status
    }

    async fn html(&mut self) -> Result<String> {
        self.page()?
            .content()
            .await
            .map_err(|e| SearchError::Browser(format!("Failed to get page content: {}", e)))
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>> {
        let params = CaptureScreenshotParams {
            format: Some(CaptureScreenshotFormat::Png),
            capture_beyond_viewport: Some(true),
            ..Default::default()
        };
        self.page()?
            .screenshot(params)
            .await
            .map_err(|e| SearchError::Browser(format!("Failed to capture screenshot: {}", e)))
    }

    async fn close(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!("Failed to close browser tab: {}", e);
            }
        }
    }
}

impl Drop for BrowserSession {
    /// Covers cancellation: the request future was dropped mid-scrape.
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        debug!("Failed to close abandoned browser tab: {}", e);
                    }
                });
            }
        }
    }
}
