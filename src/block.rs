//! Block and challenge page detection for the scrape provider.

/// Markers that show up on DuckDuckGo, Google and common CDN challenge pages.
pub fn default_markers() -> Vec<String> {
    [
        "anomaly-modal",
        "/anomaly.js",
        "bots use duckduckgo too",
        "/sorry/index",
        "g-recaptcha",
        "recaptcha/",
        "cf-challenge",
        "challenge-form",
        "captcha-delivery",
        "unusual traffic",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Recognizes pages served to suspected bots.
#[derive(Debug, Clone)]
pub struct BlockDetector {
    markers: Vec<String>,
}

impl BlockDetector {
    /// Builds a detector from case-insensitive markers. Blank markers are ignored.
    pub fn new(markers: &[String]) -> Self {
        Self {
            markers: markers
                .iter()
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// Status codes that mean the engine refused the request outright.
    pub fn is_block_status(status: u16) -> bool {
        matches!(status, 403 | 429)
    }

    /// Returns the first marker found in the page, if any.
    pub fn find_marker(&self, html: &str) -> Option<&str> {
        let haystack = html.to_lowercase();
        self.markers
            .iter()
            .find(|m| haystack.contains(m.as_str()))
            .map(String::as_str)
    }

    /// Describes why a response counts as blocked, if it does.
    ///
    /// Only consulted when extraction produced nothing: a page that yields
    /// real results is never treated as blocked, even if it mentions a marker.
    pub fn block_reason(&self, html: &str, status: Option<u16>) -> Option<String> {
        if let Some(status) = status.filter(|s| Self::is_block_status(*s)) {
            return Some(format!("HTTP {status}"));
        }
        self.find_marker(html).map(|m| format!("marker '{m}'"))
    }
}

impl Default for BlockDetector {
    fn default() -> Self {
        Self::new(&default_markers())
    }
}
