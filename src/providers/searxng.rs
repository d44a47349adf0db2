//! Aggregator provider backed by a SearXNG instance's JSON API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::AggregatorConfig;
use crate::provider::Provider;
use crate::{
    ProviderBatch, ProviderError, ProviderKind, ProviderResult, RawResult, Result, SafeSearch,
    SearchQuery,
};

/// Queries `GET {base}/search?format=json`.
pub struct Searxng {
    client: Client,
    search_url: Url,
    timeout: Duration,
    page_size: u32,
    engines: Vec<String>,
}

impl Searxng {
    /// Creates the provider with its own HTTP client.
    pub fn new(config: &AggregatorConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("a3s-cse/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .build()?;
        Self::with_client(config, client)
    }

    /// Creates the provider with a custom reqwest client.
    pub fn with_client(config: &AggregatorConfig, client: Client) -> Result<Self> {
        let base = Url::parse(config.base_url.trim_end_matches('/'))?;
        let search_url = Url::parse(&format!("{}/search", base.as_str().trim_end_matches('/')))?;
        Ok(Self {
            client,
            search_url,
            timeout: config.timeout(),
            page_size: config.page_size.max(1),
            engines: config.engines.clone(),
        })
    }

    /// Upstream page holding the first requested result, and how many
    /// results to skip on it.
    fn paging(&self, query: &SearchQuery) -> (u32, usize) {
        let offset = query.offset() as u32;
        let page_size = self.page_size;
        (offset / page_size + 1, (offset % page_size) as usize)
    }

    fn request_url(&self, query: &SearchQuery) -> Url {
        let (pageno, _) = self.paging(query);
        let mut url = self.search_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("q", &query.text)
                .append_pair("format", "json")
                .append_pair("pageno", &pageno.to_string())
                .append_pair("safesearch", safesearch_level(query.safe));
            if let Some(locale) = query.locale() {
                pairs.append_pair("language", &locale);
            }
            if let Some(range) = query.time_range() {
                pairs.append_pair("time_range", range.as_str());
            }
            if !self.engines.is_empty() {
                pairs.append_pair("engines", &self.engines.join(","));
            }
        }
        url
    }
}

fn safesearch_level(safe: SafeSearch) -> &'static str {
    match safe {
        SafeSearch::Off => "0",
        SafeSearch::Medium => "1",
        SafeSearch::High => "2",
    }
}

#[derive(Deserialize)]
struct SearxngResponse {
    #[serde(default)]
    number_of_results: f64,
    #[serde(default)]
    results: Vec<SearxngResult>,
}

#[derive(Deserialize)]
struct SearxngResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    engine: Option<String>,
    #[serde(default)]
    engines: Vec<String>,
    #[serde(default)]
    pretty_url: Option<String>,
}

impl SearxngResult {
    fn is_usable(&self) -> bool {
        !self.title.trim().is_empty()
            && (self.url.starts_with("http://") || self.url.starts_with("https://"))
    }

    fn into_raw(self, position: u32) -> RawResult {
        let mut raw = RawResult::new(self.url, self.title, self.content).with_position(position);
        if let Some(pretty) = self.pretty_url.filter(|p| !p.is_empty()) {
            raw = raw.with_displayed_url(pretty);
        }
        raw.engines = if self.engines.is_empty() {
            self.engine.into_iter().collect()
        } else {
            self.engines
        };
        raw
    }
}

#[async_trait]
impl Provider for Searxng {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Aggregator
    }

    fn name(&self) -> &str {
        "searxng"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, query: &SearchQuery) -> ProviderResult<ProviderBatch> {
        let url = self.request_url(query);
        debug!("SearXNG request: {}", url);

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::AggregatorUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::AggregatorUnavailable(format!("HTTP {}", status)));
        }

        let payload: SearxngResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::AggregatorUnavailable(format!("malformed payload: {}", e)))?;

        let (_, skip) = self.paging(query);
        let results: Vec<RawResult> = payload
            .results
            .into_iter()
            .filter(SearxngResult::is_usable)
            .skip(skip)
            .enumerate()
            .map(|(i, r)| r.into_raw(query.start + i as u32))
            .collect();

        if results.is_empty() {
            return Err(ProviderError::AggregatorUnavailable("empty result set".into()));
        }

        debug!("SearXNG returned {} usable results", results.len());
        let estimate = payload.number_of_results.max(0.0) as u64;
        Ok(ProviderBatch::new(ProviderKind::Aggregator, results).with_estimated_total(estimate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn provider(base_url: String) -> Searxng {
        Searxng::new(&AggregatorConfig {
            base_url,
            timeout_secs: 5,
            ..Default::default()
        })
        .unwrap()
    }

    fn payload(n: usize) -> serde_json::Value {
        let results: Vec<_> = (1..=n)
            .map(|i| {
                json!({
                    "url": format!("https://site{i}.example/page"),
                    "title": format!("Result {i}"),
                    "content": format!("Snippet {i}"),
                    "engine": "bing",
                    "engines": ["bing", "brave"],
                })
            })
            .collect();
        json!({ "query": "q", "number_of_results": 52000, "results": results })
    }

    #[test]
    fn test_request_url_carries_parameters() {
        let p = provider("http://searx.local:8080/".into());
        let query = SearchQuery::new("python programming")
            .with_start(21)
            .with_language("lang_de")
            .with_safe(SafeSearch::High)
            .with_date_restrict("m3");
        let url = p.request_url(&query);
        let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/search");
        assert_eq!(pairs["q"], "python programming");
        assert_eq!(pairs["format"], "json");
        assert_eq!(pairs["pageno"], "3");
        assert_eq!(pairs["language"], "de");
        assert_eq!(pairs["safesearch"], "2");
        assert_eq!(pairs["time_range"], "month");
        assert!(!pairs.contains_key("engines"));
    }

    #[test]
    fn test_paging_translation() {
        let p = provider("http://searx.local".into());
        assert_eq!(p.paging(&SearchQuery::new("q")), (1, 0));
        assert_eq!(p.paging(&SearchQuery::new("q").with_start(11)), (2, 0));
        assert_eq!(p.paging(&SearchQuery::new("q").with_start(15)), (2, 4));
    }

    #[tokio::test]
    async fn test_fetch_maps_results() {
        let seen = Arc::new(Mutex::new(None));
        let captured = Arc::clone(&seen);
        let router = Router::new().route(
            "/search",
            get(move |Query(params): Query<HashMap<String, String>>| {
                *captured.lock().unwrap() = Some(params);
                async { Json(payload(12)) }
            }),
        );
        let p = provider(serve(router).await);

        let batch = p.fetch(&SearchQuery::new("rust").with_num(5)).await.unwrap();
        assert_eq!(batch.kind, ProviderKind::Aggregator);
        assert_eq!(batch.results.len(), 12);
        assert_eq!(batch.results[0].url, "https://site1.example/page");
        assert_eq!(batch.results[0].position, Some(1));
        assert_eq!(batch.results[0].engines, vec!["bing", "brave"]);
        assert_eq!(batch.total_estimate(), 52000);

        let params = seen.lock().unwrap().clone().unwrap();
        assert_eq!(params["q"], "rust");
        assert_eq!(params["format"], "json");
    }

    #[tokio::test]
    async fn test_fetch_skips_unusable_results() {
        let router = Router::new().route(
            "/search",
            get(|| async {
                Json(json!({
                    "results": [
                        { "url": "", "title": "no url" },
                        { "url": "https://ok.example/", "title": "" },
                        { "url": "https://ok.example/a", "title": "Kept", "engine": "ddg" },
                    ]
                }))
            }),
        );
        let batch = provider(serve(router).await)
            .fetch(&SearchQuery::new("q"))
            .await
            .unwrap();
        assert_eq!(batch.results.len(), 1);
        assert_eq!(batch.results[0].title, "Kept");
        assert_eq!(batch.results[0].engines, vec!["ddg"]);
        assert_eq!(batch.estimated_total, None);
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let router = Router::new().route(
            "/search",
            get(|| async { StatusCode::TOO_MANY_REQUESTS.into_response() }),
        );
        let err = provider(serve(router).await)
            .fetch(&SearchQuery::new("q"))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::AggregatorUnavailable("HTTP 429 Too Many Requests".into()));
    }

    #[tokio::test]
    async fn test_fetch_empty_and_malformed_payloads() {
        let router = Router::new()
            .route("/empty/search", get(|| async { Json(json!({ "results": [] })) }))
            .route("/garbage/search", get(|| async { "<html>not json</html>" }));
        let base = serve(router).await;

        let empty = provider(format!("{base}/empty")).fetch(&SearchQuery::new("q")).await;
        assert!(matches!(empty, Err(ProviderError::AggregatorUnavailable(_))));

        let garbage = provider(format!("{base}/garbage")).fetch(&SearchQuery::new("q")).await;
        assert!(matches!(garbage, Err(ProviderError::AggregatorUnavailable(_))));
    }

    #[tokio::test]
    async fn test_fetch_unreachable() {
        let err = provider("http://127.0.0.1:1".into())
            .fetch(&SearchQuery::new("q"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AggregatorUnavailable(_)));
    }
}
