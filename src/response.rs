//! Custom Search-shaped response payload.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SearchQuery;

/// Discriminator of the top-level payload.
pub const SEARCH_KIND: &str = "customsearch#search";

/// Discriminator of each item.
pub const RESULT_KIND: &str = "customsearch#result";

const URL_TEMPLATE: &str = "https://www.googleapis.com/customsearch/v1?q={searchTerms}&num={count?}&start={startIndex?}&lr={language?}&safe={safe?}&cx={cx?}&dateRestrict={dateRestrict?}&alt=json";

/// One search result in the client-visible schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalItem {
    pub kind: String,
    pub title: String,
    pub html_title: String,
    /// Absolute http(s) URL. Items without one are never built.
    pub link: String,
    /// Host of `link`, without a leading `www.`.
    pub display_link: String,
    pub snippet: String,
    pub html_snippet: String,
    pub formatted_url: String,
    pub html_formatted_url: String,
}

/// `url` object describing the request template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlTemplate {
    #[serde(rename = "type")]
    pub content_type: String,
    pub template: String,
}

impl Default for UrlTemplate {
    fn default() -> Self {
        Self {
            content_type: "application/json".to_string(),
            template: URL_TEMPLATE.to_string(),
        }
    }
}

/// Echoed or derived request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    pub title: String,
    pub total_results: String,
    pub search_terms: String,
    pub count: u32,
    pub start_index: u32,
    pub input_encoding: String,
    pub output_encoding: String,
    pub safe: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_restrict: Option<String>,
}

impl QueryDescriptor {
    fn describe(query: &SearchQuery, total: u64, count: u32, start_index: u32) -> Self {
        Self {
            title: format!("Custom Search - {}", query.text),
            total_results: total.to_string(),
            search_terms: query.text.clone(),
            count,
            start_index,
            input_encoding: "utf8".to_string(),
            output_encoding: "utf8".to_string(),
            safe: query.safe.as_str().to_string(),
            cx: query.cx.clone(),
            language: query.language.clone(),
            date_restrict: query.date_restrict.clone(),
        }
    }
}

/// `queries` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Queries {
    pub request: Vec<QueryDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<Vec<QueryDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_page: Option<Vec<QueryDescriptor>>,
}

/// `searchInformation` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchInformation {
    /// Seconds spent producing the response.
    pub search_time: f64,
    pub formatted_search_time: String,
    /// String-typed: upstream estimates carry no precision guarantee.
    pub total_results: String,
    pub formatted_total_results: String,
}

impl SearchInformation {
    fn new(elapsed: Duration, total: u64) -> Self {
        let secs = (elapsed.as_secs_f64() * 1000.0).round() / 1000.0;
        Self {
            search_time: secs,
            formatted_search_time: format!("{:.2}", secs),
            total_results: total.to_string(),
            formatted_total_results: group_thousands(total),
        }
    }
}

/// The full response payload.
///
/// Built once per cache miss and shared read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalResponse {
    pub kind: String,
    pub url: UrlTemplate,
    pub queries: Queries,
    pub search_information: SearchInformation,
    /// Always serialized, even when empty.
    pub items: Vec<CanonicalItem>,
}

impl CanonicalResponse {
    /// Builds the payload for a served request.
    ///
    /// `max_start` bounds the `nextPage` descriptor; it is only emitted when
    /// the page came back full and the following page is addressable.
    pub fn build(
        query: &SearchQuery,
        items: Vec<CanonicalItem>,
        total: u64,
        elapsed: Duration,
        max_start: u32,
    ) -> Self {
        let count = query.num;
        let request = QueryDescriptor::describe(query, total, count, query.start);

        let next_start = query.start.saturating_add(count);
        let next_page = (items.len() as u32 >= count && next_start <= max_start)
            .then(|| vec![QueryDescriptor::describe(query, total, count, next_start)]);

        let previous_page = (query.start > 1).then(|| {
            let prev_start = query.start.saturating_sub(count).max(1);
            vec![QueryDescriptor::describe(query, total, count, prev_start)]
        });

        Self {
            kind: SEARCH_KIND.to_string(),
            url: UrlTemplate::default(),
            queries: Queries {
                request: vec![request],
                next_page,
                previous_page,
            },
            search_information: SearchInformation::new(elapsed, total),
            items,
        }
    }

    /// Whether every descriptor already echoes `query`'s pass-through
    /// parameters.
    pub fn echoes(&self, query: &SearchQuery) -> bool {
        self.descriptors()
            .all(|d| d.cx == query.cx && d.language == query.language)
    }

    /// Copy whose descriptors echo `query`'s `cx` and `lr`.
    ///
    /// Those two stay out of the cache key, so a stored payload may carry
    /// another caller's values.
    pub fn echoing(&self, query: &SearchQuery) -> Self {
        let mut response = self.clone();
        for descriptor in response.descriptors_mut() {
            descriptor.cx = query.cx.clone();
            descriptor.language = query.language.clone();
        }
        response
    }

    fn descriptors(&self) -> impl Iterator<Item = &QueryDescriptor> {
        let queries = &self.queries;
        queries
            .request
            .iter()
            .chain(queries.next_page.iter().flatten())
            .chain(queries.previous_page.iter().flatten())
    }

    fn descriptors_mut(&mut self) -> impl Iterator<Item = &mut QueryDescriptor> {
        let queries = &mut self.queries;
        queries
            .request
            .iter_mut()
            .chain(queries.next_page.iter_mut().flatten())
            .chain(queries.previous_page.iter_mut().flatten())
    }

    /// Payload with no results, used alongside a service error.
    pub fn empty(query: &SearchQuery, elapsed: Duration) -> Self {
        Self::build(query, Vec::new(), 0, elapsed, 0)
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
