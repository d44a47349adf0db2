//! Raw provider results to canonical items.

use std::collections::HashSet;

use tracing::debug;
use url::Url;

use crate::response::{CanonicalItem, RESULT_KIND};
use crate::{ProviderKind, RawResult};

/// Maps raw results to canonical items, keeping upstream order.
///
/// Never fails. A record is dropped on its own when its title is blank, its
/// link is not an absolute http(s) URL, or its link repeats an earlier one.
pub fn map(kind: ProviderKind, raw: Vec<RawResult>) -> Vec<CanonicalItem> {
    let total = raw.len();
    let mut seen = HashSet::new();
    let items: Vec<CanonicalItem> = raw
        .into_iter()
        .filter_map(map_one)
        .filter(|item| seen.insert(dedup_key(&item.link)))
        .collect();

    if items.len() < total {
        debug!(
            "Mapper dropped {} of {} {} results",
            total - items.len(),
            total,
            kind
        );
    }
    items
}

fn map_one(raw: RawResult) -> Option<CanonicalItem> {
    let title = collapse_whitespace(&raw.title);
    if title.is_empty() {
        return None;
    }

    let url = Url::parse(raw.url.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    let display_link = host.strip_prefix("www.").unwrap_or(host).to_string();
    let formatted_url = format!("{}://{}{}", url.scheme(), host, url.path());
    let snippet = collapse_whitespace(&raw.snippet);

    Some(CanonicalItem {
        kind: RESULT_KIND.to_string(),
        html_title: html_escape::encode_text(&title).into_owned(),
        title,
        link: url.to_string(),
        display_link,
        html_snippet: html_escape::encode_text(&snippet).into_owned(),
        snippet,
        html_formatted_url: html_escape::encode_text(&formatted_url).into_owned(),
        formatted_url,
    })
}

/// Scheme-less, lowercase, no trailing slash.
fn dedup_key(link: &str) -> String {
    link.trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_lowercase()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_basic_fields() {
        let raw = vec![RawResult::new(
            "https://www.python.org/about/?x=1",
            "About Python",
            "Python is <fast> & fun",
        )];
        let items = map(ProviderKind::Aggregator, raw);
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.kind, "customsearch#result");
        assert_eq!(item.link, "https://www.python.org/about/?x=1");
        assert_eq!(item.display_link, "python.org");
        assert_eq!(item.formatted_url, "https://www.python.org/about/");
        assert_eq!(item.snippet, "Python is <fast> & fun");
        assert_eq!(item.html_snippet, "Python is &lt;fast&gt; &amp; fun");
    }

    #[test]
    fn test_map_drops_invalid_records_individually() {
        let raw = vec![
            RawResult::new("https://a.example/", "A", ""),
            RawResult::new("", "No link", ""),
            RawResult::new("/relative/path", "Relative", ""),
            RawResult::new("javascript:alert(1)", "Script", ""),
            RawResult::new("https://b.example/", "   ", ""),
            RawResult::new("not a url", "Garbage", ""),
            RawResult::new("https://c.example/", "C", ""),
        ];
        let items = map(ProviderKind::Scrape, raw);
        let links: Vec<_> = items.iter().map(|i| i.link.as_str()).collect();
        assert_eq!(links, vec!["https://a.example/", "https://c.example/"]);
    }

    #[test]
    fn test_map_never_emits_empty_link_or_title() {
        let raw = vec![
            RawResult::new("", "", ""),
            RawResult::new("https://x.example", "", "s"),
            RawResult::new("", "t", "s"),
            RawResult::new("https://y.example/p", "t", ""),
        ];
        for item in map(ProviderKind::Aggregator, raw) {
            assert!(!item.link.is_empty());
            assert!(!item.title.is_empty());
        }
    }

    #[test]
    fn test_map_preserves_order() {
        let raw: Vec<_> = ["z", "a", "m", "b"]
            .iter()
            .map(|s| RawResult::new(format!("https://{s}.example/"), *s, ""))
            .collect();
        let titles: Vec<_> = map(ProviderKind::Aggregator, raw)
            .into_iter()
            .map(|i| i.title)
            .collect();
        assert_eq!(titles, vec!["z", "a", "m", "b"]);
    }

    #[test]
    fn test_map_dedups_keeping_first() {
        let raw = vec![
            RawResult::new("https://example.com/page", "First", ""),
            RawResult::new("http://EXAMPLE.com/page/", "Second", ""),
            RawResult::new("https://example.com/other", "Third", ""),
        ];
        let titles: Vec<_> = map(ProviderKind::Aggregator, raw)
            .into_iter()
            .map(|i| i.title)
            .collect();
        assert_eq!(titles, vec!["First", "Third"]);
    }

    #[test]
    fn test_map_collapses_whitespace() {
        let raw = vec![RawResult::new("https://e.com", "  Rust \n Book ", "a\tb")];
        let items = map(ProviderKind::Scrape, raw);
        assert_eq!(items[0].title, "Rust Book");
        assert_eq!(items[0].snippet, "a b");
        assert_eq!(items[0].link, "https://e.com/");
    }

    #[test]
    fn test_map_empty_input() {
        assert!(map(ProviderKind::Aggregator, Vec::new()).is_empty());
    }
}
