//! Selector strategies for pulling results out of a scraped results page.
//!
//! A [`SelectorChain`] holds strategies in priority order. Extraction runs
//! them one at a time and stops at the first one that yields a structurally
//! valid result; results from different strategies are never merged.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::{RawResult, Result, SearchError};

/// One extraction rule set, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorStrategy {
    /// Name used in logs and artifacts.
    pub name: String,
    /// Selects each result container.
    pub container: String,
    /// Selects the result link inside a container.
    pub link: String,
    /// Selects the title inside a container. Defaults to the link text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Selects the snippet inside a container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl SelectorStrategy {
    /// Creates a strategy that takes its title from the link text.
    pub fn new(name: impl Into<String>, container: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            container: container.into(),
            link: link.into(),
            title: None,
            snippet: None,
        }
    }

    /// Sets the title selector.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the snippet selector.
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }
}

/// Built-in chain for DuckDuckGo result markup, newest layout first.
pub fn default_strategies() -> Vec<SelectorStrategy> {
    vec![
        SelectorStrategy::new("html-result", "div.result:not(.result--ad)", "a.result__a")
            .with_snippet(".result__snippet"),
        SelectorStrategy::new(
            "results-links",
            "div.results_links, div.results_links_deep",
            "h2 a[href]",
        )
        .with_snippet(".result__snippet"),
        SelectorStrategy::new(
            "react-article",
            "article[data-testid='result']",
            "h2 > a, a[data-testid='result-title-a']",
        )
        .with_snippet("div[data-result='snippet']"),
        SelectorStrategy::new("web-result", "div.web-result", "a[href]")
            .with_title("h2, .result__title")
            .with_snippet("[class*='snippet']"),
        SelectorStrategy::new("generic", "div[class*='result']", "a[href^='http']")
            .with_snippet("[class*='snippet']"),
    ]
}

fn parse_selector(css: &str, strategy: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| {
        SearchError::Config(format!(
            "Strategy '{}': invalid selector '{}': {:?}",
            strategy, css, e
        ))
    })
}

/// A strategy with its selectors parsed.
#[derive(Debug)]
struct CompiledStrategy {
    name: String,
    container: Selector,
    link: Selector,
    title: Option<Selector>,
    snippet: Option<Selector>,
}

impl CompiledStrategy {
    fn compile(strategy: &SelectorStrategy) -> Result<Self> {
        let name = strategy.name.as_str();
        Ok(Self {
            name: strategy.name.clone(),
            container: parse_selector(&strategy.container, name)?,
            link: parse_selector(&strategy.link, name)?,
            title: strategy
                .title
                .as_deref()
                .map(|css| parse_selector(css, name))
                .transpose()?,
            snippet: strategy
                .snippet
                .as_deref()
                .map(|css| parse_selector(css, name))
                .transpose()?,
        })
    }

    /// Extracts every structurally valid result in document order.
    fn extract(&self, document: &Html, base: &Url) -> Vec<RawResult> {
        let mut results = Vec::new();

        for container in document.select(&self.container) {
            let Some(link_el) = container.select(&self.link).next() else {
                continue;
            };
            let Some(url) = link_el
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base))
            else {
                continue;
            };

            let title = match &self.title {
                Some(selector) => container.select(selector).next().map(element_text),
                None => Some(element_text(link_el)),
            }
            .unwrap_or_default();
            if title.is_empty() {
                continue;
            }

            let snippet = self
                .snippet
                .as_ref()
                .and_then(|selector| container.select(selector).next())
                .map(element_text)
                .unwrap_or_default();

            let position = results.len() as u32 + 1;
            results.push(RawResult::new(url, title, snippet).with_position(position));
        }

        results
    }
}

/// Results from the strategy that won.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainMatch {
    /// Name of the winning strategy.
    pub strategy: String,
    /// 0-based priority of the winning strategy.
    pub index: usize,
    /// Extracted results in page order.
    pub results: Vec<RawResult>,
}

/// Ordered, compiled selector strategies.
#[derive(Debug)]
pub struct SelectorChain {
    strategies: Vec<CompiledStrategy>,
}

impl SelectorChain {
    /// Compiles strategies, failing on the first invalid selector.
    pub fn compile(strategies: &[SelectorStrategy]) -> Result<Self> {
        if strategies.is_empty() {
            return Err(SearchError::Config("selector chain is empty".into()));
        }
        let strategies = strategies
            .iter()
            .map(CompiledStrategy::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { strategies })
    }

    /// Compiles the built-in chain.
    pub fn builtin() -> Result<Self> {
        Self::compile(&default_strategies())
    }

    /// Number of strategies.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether the chain has no strategies.
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Strategy names in priority order.
    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name.as_str()).collect()
    }

    /// Runs strategies in order; the first with at least one valid result wins.
    ///
    /// `base` resolves relative links and identifies the scraped engine's own
    /// host, whose links are never results.
    pub fn extract(&self, html: &str, base: &Url) -> Option<ChainMatch> {
        let document = Html::parse_document(html);

        for (index, strategy) in self.strategies.iter().enumerate() {
            let results = strategy.extract(&document, base);
            if results.is_empty() {
                debug!("Selector strategy '{}' matched nothing", strategy.name);
                continue;
            }
            debug!(
                "Selector strategy '{}' extracted {} results",
                strategy.name,
                results.len()
            );
            return Some(ChainMatch {
                strategy: strategy.name.clone(),
                index,
                results,
            });
        }

        None
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Turns a scraped `href` into an absolute http(s) result URL.
///
/// Unwraps DuckDuckGo (`/l/?uddg=`) and Google (`/url?q=`) redirects and
/// rejects links back into the scraped engine itself.
fn resolve_link(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }

    let mut url = base.join(href).ok()?;
    if let Some(target) = redirect_target(&url) {
        url = Url::parse(&target).ok()?;
    }

    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    if is_engine_host(host, base) {
        return None;
    }
    Some(url.to_string())
}

fn redirect_target(url: &Url) -> Option<String> {
    let param = match url.path() {
        "/l/" | "/l" => "uddg",
        "/url" => "q",
        _ => return None,
    };
    url.query_pairs()
        .find(|(k, _)| k == param)
        .map(|(_, v)| v.into_owned())
}

/// Whether `host` belongs to the engine serving `base`: the same host, a
/// subdomain of it (ignoring a leading `www.`), or one of its parents.
fn is_engine_host(host: &str, base: &Url) -> bool {
    let Some(base_host) = base.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    let base_host = base_host.to_ascii_lowercase();
    let engine = base_host.strip_prefix("www.").unwrap_or(&base_host);
    let within = |child: &str, parent: &str| {
        child == parent || child.strip_suffix(parent).is_some_and(|rest| rest.ends_with('.'))
    };
    within(&host, engine) || within(&base_host, &host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://html.duckduckgo.com/html/").unwrap()
    }

    const HTML_RESULT_PAGE: &str = r##"
        <html><body>
            <div class="result results_links results_links_deep web-result">
                <h2 class="result__title">
                    <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.python.org%2F&amp;rut=abc">Welcome to
                        Python.org</a>
                </h2>
                <a class="result__snippet" href="#">The official home of the Python Programming Language</a>
            </div>
            <div class="result result--ad">
                <a class="result__a" href="https://duckduckgo.com/y.js?ad_domain=ads.example">Sponsored</a>
            </div>
            <div class="result">
                <a class="result__a" href="https://docs.python.org/3/tutorial/">The Python Tutorial</a>
                <div class="result__snippet">Python is an easy to learn language.</div>
            </div>
        </body></html>
    "##;

    const REACT_ONLY_PAGE: &str = r#"
        <html><body>
            <section>
                <article data-testid="result">
                    <h2><a href="https://www.rust-lang.org/">Rust Programming Language</a></h2>
                    <div data-result="snippet">A language empowering everyone.</div>
                </article>
                <article data-testid="result">
                    <h2><a href="https://doc.rust-lang.org/book/">The Rust Book</a></h2>
                    <div data-result="snippet">The official book.</div>
                </article>
            </section>
        </body></html>
    "#;

    #[test]
    fn test_builtin_chain_compiles() {
        let chain = SelectorChain::builtin().unwrap();
        assert_eq!(chain.len(), 5);
        assert_eq!(chain.names()[0], "html-result");
    }

    #[test]
    fn test_compile_rejects_empty_chain() {
        assert!(matches!(SelectorChain::compile(&[]), Err(SearchError::Config(_))));
    }

    #[test]
    fn test_compile_rejects_invalid_selector() {
        let strategies = vec![SelectorStrategy::new("bad", "div.result", "a[")];
        let err = SelectorChain::compile(&strategies).unwrap_err();
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn test_first_strategy_extracts_html_layout() {
        let chain = SelectorChain::builtin().unwrap();
        let matched = chain.extract(HTML_RESULT_PAGE, &base()).unwrap();
        assert_eq!(matched.strategy, "html-result");
        assert_eq!(matched.index, 0);
        assert_eq!(matched.results.len(), 2);
        assert_eq!(matched.results[0].url, "https://www.python.org/");
        assert_eq!(matched.results[0].title, "Welcome to Python.org");
        assert_eq!(
            matched.results[0].snippet,
            "The official home of the Python Programming Language"
        );
        assert_eq!(matched.results[0].position, Some(1));
        assert_eq!(matched.results[1].url, "https://docs.python.org/3/tutorial/");
        assert_eq!(matched.results[1].position, Some(2));
    }

    #[test]
    fn test_only_third_strategy_parses_fixture() {
        let chain = SelectorChain::builtin().unwrap();
        let matched = chain.extract(REACT_ONLY_PAGE, &base()).unwrap();
        assert_eq!(matched.index, 2);
        assert_eq!(matched.strategy, "react-article");
        assert_eq!(matched.results.len(), 2);
        assert_eq!(matched.results[0].title, "Rust Programming Language");
        assert_eq!(matched.results[0].snippet, "A language empowering everyone.");
        assert_eq!(matched.results[1].url, "https://doc.rust-lang.org/book/");
    }

    #[test]
    fn test_strategy_with_only_invalid_links_falls_through() {
        let html = r#"
            <div class="result"><a class="result__a" href="/html/?q=next">More results</a></div>
            <div class="result"><a class="result__a" href="javascript:void(0)">Menu</a></div>
            <article data-testid="result">
                <h2><a href="https://example.org/page">Example</a></h2>
            </article>
        "#;
        let chain = SelectorChain::builtin().unwrap();
        let matched = chain.extract(html, &base()).unwrap();
        assert_eq!(matched.strategy, "react-article");
        assert_eq!(matched.results.len(), 1);
        assert_eq!(matched.results[0].snippet, "");
    }

    #[test]
    fn test_no_strategy_matches() {
        let chain = SelectorChain::builtin().unwrap();
        assert!(chain
            .extract("<html><body><p>Nothing here</p></body></html>", &base())
            .is_none());
    }

    #[test]
    fn test_custom_title_selector() {
        let strategies = vec![SelectorStrategy::new("custom", "li.hit", "a.go")
            .with_title("span.t")
            .with_snippet("p")];
        let chain = SelectorChain::compile(&strategies).unwrap();
        let html = r#"<ul>
            <li class="hit"><span class="t">Real Title</span><a class="go" href="https://a.example/">go</a><p>snip</p></li>
            <li class="hit"><a class="go" href="https://b.example/">untitled</a></li>
        </ul>"#;
        let matched = chain.extract(html, &base()).unwrap();
        assert_eq!(matched.results.len(), 1);
        assert_eq!(matched.results[0].title, "Real Title");
        assert_eq!(matched.results[0].snippet, "snip");
    }

    #[test]
    fn test_resolve_link_google_redirect() {
        let base = Url::parse("https://www.google.com/search").unwrap();
        assert_eq!(
            resolve_link("/url?q=https://example.com/page&sa=U", &base).as_deref(),
            Some("https://example.com/page")
        );
        assert_eq!(resolve_link("/search?q=related", &base), None);
    }

    #[test]
    fn test_engine_host_is_not_the_public_suffix() {
        let base = Url::parse("https://www.google.co.uk/search").unwrap();
        assert_eq!(
            resolve_link("https://www.bbc.co.uk/news", &base).as_deref(),
            Some("https://www.bbc.co.uk/news")
        );
        assert_eq!(resolve_link("https://maps.google.co.uk/", &base), None);
        assert_eq!(resolve_link("https://google.co.uk/preferences", &base), None);

        assert_eq!(resolve_link("https://duckduckgo.com/y.js?ad=1", &self::base()), None);
        assert_eq!(
            resolve_link("https://notduckduckgo.com/", &self::base()).as_deref(),
            Some("https://notduckduckgo.com/")
        );
    }

    #[test]
    fn test_resolve_link_rejects_non_http() {
        assert_eq!(resolve_link("mailto:a@b.c", &base()), None);
        assert_eq!(resolve_link("ftp://files.example.com/x", &base()), None);
        assert_eq!(resolve_link("#top", &base()), None);
    }

    #[test]
    fn test_strategy_deserialization_defaults() {
        let json = r#"{"name":"n","container":"div","link":"a"}"#;
        let strategy: SelectorStrategy = serde_json::from_str(json).unwrap();
        assert!(strategy.title.is_none());
        assert!(strategy.snippet.is_none());
    }
}
