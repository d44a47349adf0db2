//! Scrape provider: loads a public engine's results page and extracts it
//! with the selector chain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};
use url::Url;

use crate::artifacts::{ArtifactSink, CaptureReason, DebugArtifact, NoopArtifactSink};
use crate::block::BlockDetector;
use crate::config::{Renderer, ScrapeConfig};
use crate::fetcher::{PageFetcher, PageSession};
use crate::fetcher_http::HttpFetcher;
use crate::fingerprint::FingerprintPool;
use crate::provider::Provider;
use crate::selector::SelectorChain;
use crate::{
    ProviderBatch, ProviderError, ProviderKind, ProviderResult, Result, SafeSearch, SearchQuery,
    TimeRange,
};

/// Builds the page fetcher the configuration asks for.
pub fn build_fetcher(config: &ScrapeConfig) -> Result<Arc<dyn PageFetcher>> {
    match config.renderer {
        Renderer::Http => Ok(Arc::new(HttpFetcher::new(config.timeout())?)),
        #[cfg(feature = "headless")]
        Renderer::Browser => {
            use crate::browser::{BrowserFetcher, BrowserPool, BrowserPoolConfig};
            use crate::fetcher::WaitStrategy;

            let pool = Arc::new(BrowserPool::new(BrowserPoolConfig {
                max_tabs: config.max_tabs,
                chrome_path: config.chrome_path.clone(),
                ..Default::default()
            }));
            let wait = match &config.wait_selector {
                Some(css) => WaitStrategy::Selector {
                    css: css.clone(),
                    timeout_ms: config.wait_timeout_ms,
                },
                None => WaitStrategy::Load,
            };
            Ok(Arc::new(BrowserFetcher::new(pool).with_wait(wait)))
        }
        #[cfg(not(feature = "headless"))]
        Renderer::Browser => Err(crate::SearchError::Config(
            "scrape.renderer = \"browser\" needs the `headless` feature".into(),
        )),
    }
}

/// DuckDuckGo region code for a bare locale.
fn region_for(locale: Option<&str>) -> &'static str {
    let lang = locale
        .and_then(|l| l.split(['-', '_']).next())
        .unwrap_or_default();
    match lang {
        "en" => "us-en",
        "de" => "de-de",
        "fr" => "fr-fr",
        "es" => "es-es",
        "it" => "it-it",
        "ja" => "jp-jp",
        "zh" => "cn-zh",
        "pt" => "br-pt",
        "ru" => "ru-ru",
        "nl" => "nl-nl",
        _ => "wt-wt",
    }
}

/// Headless scrape of a public search engine.
pub struct ScrapeProvider {
    base_url: Url,
    chain: SelectorChain,
    detector: BlockDetector,
    fetcher: Arc<dyn PageFetcher>,
    fingerprints: Arc<FingerprintPool>,
    artifacts: Arc<dyn ArtifactSink>,
    jitter: Duration,
    timeout: Duration,
}

impl ScrapeProvider {
    /// Creates the provider. Fails if the base URL or any selector is invalid.
    pub fn new(config: &ScrapeConfig, fetcher: Arc<dyn PageFetcher>) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(&config.base_url)?,
            chain: SelectorChain::compile(&config.strategies)?,
            detector: BlockDetector::new(&config.block_markers),
            fetcher,
            fingerprints: Arc::new(FingerprintPool::default().with_strategy(config.rotation)),
            artifacts: Arc::new(NoopArtifactSink),
            jitter: Duration::from_millis(config.jitter_ms),
            timeout: config.timeout(),
        })
    }

    /// Sets the client fingerprint pool.
    pub fn with_fingerprints(mut self, fingerprints: Arc<FingerprintPool>) -> Self {
        self.fingerprints = fingerprints;
        self
    }

    /// Sets where debug artifacts go.
    pub fn with_artifact_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.artifacts = sink;
        self
    }

    /// Results page URL for a query.
    pub fn search_url(&self, query: &SearchQuery) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("q", &query.text)
                .append_pair("kl", region_for(query.locale().as_deref()));
            let kp = match query.safe {
                SafeSearch::High => "1",
                SafeSearch::Medium => "-1",
                SafeSearch::Off => "-2",
            };
            pairs.append_pair("kp", kp);
            if let Some(range) = query.time_range() {
                let df = match range {
                    TimeRange::Day => "d",
                    TimeRange::Week => "w",
                    TimeRange::Month => "m",
                    TimeRange::Year => "y",
                };
                pairs.append_pair("df", df);
            }
            if query.offset() > 0 {
                pairs.append_pair("s", &query.offset().to_string());
            }
        }
        url
    }

    /// Decides what a loaded page means. Never awaits: the parsed document
    /// is not `Send`.
    fn classify(&self, html: &str, status: Option<u16>) -> ProviderResult<ProviderBatch> {
        if let Some(status) = status.filter(|s| BlockDetector::is_block_status(*s)) {
            return Err(ProviderError::Blocked(format!("HTTP {status}")));
        }

        if let Some(matched) = self.chain.extract(html, &self.base_url) {
            info!(
                "Selector strategy '{}' (#{}) extracted {} results",
                matched.strategy,
                matched.index + 1,
                matched.results.len()
            );
            return Ok(ProviderBatch::new(ProviderKind::Scrape, matched.results));
        }

        match self.detector.block_reason(html, status) {
            Some(reason) => Err(ProviderError::Blocked(reason)),
            None => Err(ProviderError::NoSelectorMatched {
                tried: self.chain.len(),
            }),
        }
    }

    async fn pause(&self) {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return;
        }
        let delay = rand::thread_rng().gen_range(0..=max);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    async fn capture(
        &self,
        session: &mut Box<dyn PageSession>,
        error: &ProviderError,
        query: &SearchQuery,
        url: &str,
        html: String,
    ) {
        let reason = match error {
            ProviderError::Blocked(_) => CaptureReason::Blocked,
            ProviderError::NoSelectorMatched { .. } => CaptureReason::NoSelectorMatched,
            _ => return,
        };
        let mut artifact = DebugArtifact::new(reason, &query.text, url, html);
        match session.screenshot().await {
            Ok(png) => artifact = artifact.with_screenshot(png),
            Err(e) => debug!("No screenshot for artifact: {}", e),
        }
        if let Err(e) = self.artifacts.capture(artifact).await {
            warn!("Failed to persist debug artifact: {}", e);
        }
    }
}

#[async_trait]
impl Provider for ScrapeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Scrape
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, query: &SearchQuery) -> ProviderResult<ProviderBatch> {
        let url = self.search_url(query);
        self.pause().await;

        let fingerprint = self.fingerprints.next();
        debug!("Scraping {} as {}", url, fingerprint.user_agent);

        let mut session = self
            .fetcher
            .open(url.as_str(), &fingerprint)
            .await
            .map_err(|e| ProviderError::Browser(e.to_string()))?;

        let html = match session.html().await {
            Ok(html) => html,
            Err(e) => {
                session.close().await;
                return Err(ProviderError::Browser(e.to_string()));
            }
        };

        let outcome = self.classify(&html, session.status());
        if let Err(ref error) = outcome {
            warn!("Scrape of '{}' failed: {}", query.text, error);
            self.capture(&mut session, error, query, url.as_str(), html).await;
            if matches!(error, ProviderError::Blocked(_)) {
                self.fingerprints.rotate();
            }
        }
        session.close().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::ClientFingerprint;
    use crate::selector::SelectorStrategy;
    use crate::SearchError;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const REACT_ONLY_PAGE: &str = r#"
        <html><body>
            <article data-testid="result">
                <h2><a href="https://www.python.org/">Welcome to Python.org</a></h2>
                <div data-result="snippet">The official home of Python.</div>
            </article>
            <article data-testid="result">
                <h2><a href="https://docs.python.org/3/">Python 3 Documentation</a></h2>
                <div data-result="snippet">Docs.</div>
            </article>
            <article data-testid="result">
                <h2><a href="https://pypi.org/">PyPI</a></h2>
            </article>
        </body></html>
    "#;

    const ANOMALY_PAGE: &str = r#"<html><body>
        <div class="anomaly-modal__title">Unfortunately, bots use DuckDuckGo too.</div>
    </body></html>"#;

    #[derive(Default)]
    struct Calls {
        opened: AtomicUsize,
        closed: AtomicUsize,
        user_agents: Mutex<Vec<String>>,
        urls: Mutex<Vec<String>>,
    }

    struct StaticSession {
        html: String,
        status: Option<u16>,
        calls: Arc<Calls>,
        open: bool,
    }

    #[async_trait]
    impl PageSession for StaticSession {
        fn status(&self) -> Option<u16> {
            self.status
        }

        async fn html(&mut self) -> Result<String> {
            Ok(self.html.clone())
        }

        async fn screenshot(&mut self) -> Result<Vec<u8>> {
            Ok(b"\x89PNG".to_vec())
        }

        async fn close(&mut self) {
            if std::mem::take(&mut self.open) {
                self.calls.closed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    struct StaticFetcher {
        html: String,
        status: Option<u16>,
        calls: Arc<Calls>,
    }

    impl StaticFetcher {
        fn new(html: &str, status: Option<u16>) -> (Arc<Self>, Arc<Calls>) {
            let calls = Arc::new(Calls::default());
            let fetcher = Arc::new(Self {
                html: html.to_string(),
                status,
                calls: Arc::clone(&calls),
            });
            (fetcher, calls)
        }
    }

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn open(&self, url: &str, fingerprint: &ClientFingerprint) -> Result<Box<dyn PageSession>> {
            self.calls.opened.fetch_add(1, Ordering::SeqCst);
            self.calls.urls.lock().unwrap().push(url.to_string());
            self.calls
                .user_agents
                .lock()
                .unwrap()
                .push(fingerprint.user_agent.clone());
            Ok(Box::new(StaticSession {
                html: self.html.clone(),
                status: self.status,
                calls: Arc::clone(&self.calls),
                open: true,
            }))
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl PageFetcher for FailingFetcher {
        async fn open(&self, _url: &str, _fingerprint: &ClientFingerprint) -> Result<Box<dyn PageSession>> {
            Err(SearchError::Browser("Failed to launch browser".into()))
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<DebugArtifact>>);

    #[async_trait]
    impl ArtifactSink for RecordingSink {
        async fn capture(&self, artifact: DebugArtifact) -> Result<Vec<PathBuf>> {
            self.0.lock().unwrap().push(artifact);
            Ok(Vec::new())
        }
    }

    fn config() -> ScrapeConfig {
        ScrapeConfig {
            jitter_ms: 0,
            renderer: Renderer::Http,
            ..Default::default()
        }
    }

    fn fingerprint(ua: &str) -> ClientFingerprint {
        ClientFingerprint::new(ua, "en-US", "Win32", crate::fingerprint::Viewport {
            width: 1280,
            height: 800,
        })
    }

    #[test]
    fn test_search_url() {
        let (fetcher, _) = StaticFetcher::new("", None);
        let provider = ScrapeProvider::new(&config(), fetcher).unwrap();
        let query = SearchQuery::new("python programming")
            .with_start(11)
            .with_language("lang_de")
            .with_safe(SafeSearch::High)
            .with_date_restrict("w1");
        let url = provider.search_url(&query);
        assert!(url.as_str().starts_with("https://html.duckduckgo.com/html/?"));
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["q"], "python programming");
        assert_eq!(pairs["kl"], "de-de");
        assert_eq!(pairs["kp"], "1");
        assert_eq!(pairs["df"], "w");
        assert_eq!(pairs["s"], "10");
    }

    #[test]
    fn test_region_for() {
        assert_eq!(region_for(Some("en")), "us-en");
        assert_eq!(region_for(Some("pt-br")), "br-pt");
        assert_eq!(region_for(Some("xx")), "wt-wt");
        assert_eq!(region_for(None), "wt-wt");
    }

    #[tokio::test]
    async fn test_third_strategy_results_only() {
        let (fetcher, calls) = StaticFetcher::new(REACT_ONLY_PAGE, Some(200));
        let provider = ScrapeProvider::new(&config(), fetcher).unwrap();

        let batch = provider.fetch(&SearchQuery::new("python")).await.unwrap();
        assert_eq!(batch.kind, ProviderKind::Scrape);
        let urls: Vec<_> = batch.results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://www.python.org/", "https://docs.python.org/3/", "https://pypi.org/"]
        );
        assert_eq!(calls.opened.load(Ordering::SeqCst), 1);
        assert_eq!(calls.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_whole_page_kept_for_mapping() {
        let (fetcher, _) = StaticFetcher::new(REACT_ONLY_PAGE, None);
        let provider = ScrapeProvider::new(&config(), fetcher).unwrap();
        let batch = provider
            .fetch(&SearchQuery::new("python").with_num(2))
            .await
            .unwrap();
        assert_eq!(batch.results.len(), 3);
    }

    #[tokio::test]
    async fn test_no_selector_matched_captures_artifact() {
        let (fetcher, calls) = StaticFetcher::new("<html><body><main>new layout</main></body></html>", Some(200));
        let sink = Arc::new(RecordingSink::default());
        let provider = ScrapeProvider::new(&config(), fetcher)
            .unwrap()
            .with_artifact_sink(sink.clone());

        let err = provider.fetch(&SearchQuery::new("python")).await.unwrap_err();
        assert_eq!(err, ProviderError::NoSelectorMatched { tried: 5 });

        let artifacts = sink.0.lock().unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].reason, CaptureReason::NoSelectorMatched);
        assert!(artifacts[0].html.contains("new layout"));
        assert_eq!(artifacts[0].screenshot.as_deref(), Some(&b"\x89PNG"[..]));
        assert_eq!(artifacts[0].query, "python");
        assert_eq!(calls.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_block_page_is_blocked_and_rotates_fingerprint() {
        let (fetcher, calls) = StaticFetcher::new(ANOMALY_PAGE, Some(200));
        let sink = Arc::new(RecordingSink::default());
        let pool = Arc::new(FingerprintPool::new(vec![fingerprint("first"), fingerprint("second")]));
        let provider = ScrapeProvider::new(&config(), fetcher)
            .unwrap()
            .with_fingerprints(Arc::clone(&pool))
            .with_artifact_sink(sink.clone());

        let err = provider.fetch(&SearchQuery::new("a")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Blocked(_)));
        assert!(!err.needs_maintenance());
        provider.fetch(&SearchQuery::new("b")).await.unwrap_err();

        let uas = calls.user_agents.lock().unwrap().clone();
        assert_eq!(uas, vec!["first", "second"]);
        assert_eq!(sink.0.lock().unwrap()[0].reason, CaptureReason::Blocked);
        assert_eq!(calls.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_block_status_without_markup() {
        let (fetcher, _) = StaticFetcher::new(REACT_ONLY_PAGE, Some(403));
        let provider = ScrapeProvider::new(&config(), fetcher).unwrap();
        let err = provider.fetch(&SearchQuery::new("q")).await.unwrap_err();
        assert_eq!(err, ProviderError::Blocked("HTTP 403".into()));
    }

    #[tokio::test]
    async fn test_results_win_over_marker_mentions() {
        let page = format!("{REACT_ONLY_PAGE}<p>how to solve a g-recaptcha</p>");
        let (fetcher, _) = StaticFetcher::new(&page, Some(200));
        let provider = ScrapeProvider::new(&config(), fetcher).unwrap();
        assert!(provider.fetch(&SearchQuery::new("q")).await.is_ok());
    }

    #[tokio::test]
    async fn test_session_open_failure() {
        let provider = ScrapeProvider::new(&config(), Arc::new(FailingFetcher)).unwrap();
        let err = provider.fetch(&SearchQuery::new("q")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Browser(_)));
    }

    #[tokio::test]
    async fn test_custom_chain_from_config() {
        let mut cfg = config();
        cfg.strategies = vec![SelectorStrategy::new("only", "li.hit", "a")];
        let (fetcher, _) = StaticFetcher::new(REACT_ONLY_PAGE, None);
        let provider = ScrapeProvider::new(&cfg, fetcher).unwrap();
        let err = provider.fetch(&SearchQuery::new("q")).await.unwrap_err();
        assert_eq!(err, ProviderError::NoSelectorMatched { tried: 1 });
    }

    #[test]
    fn test_invalid_selector_rejected_at_construction() {
        let mut cfg = config();
        cfg.strategies = vec![SelectorStrategy::new("bad", "div[[", "a")];
        let (fetcher, _) = StaticFetcher::new("", None);
        assert!(ScrapeProvider::new(&cfg, fetcher).is_err());
    }

    #[test]
    fn test_build_http_fetcher() {
        assert!(build_fetcher(&config()).is_ok());
    }
}
