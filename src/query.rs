//! Search query representation.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::QueryLimits;
use crate::{Result, SearchError};

static LANG_RESTRICT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^lang_([A-Za-z]{2,3}(?:-[A-Za-z]{2,4})?)$").unwrap());

static DATE_RESTRICT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([dwmy])(\d{1,4})$").unwrap());

/// Safe search level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafeSearch {
    /// No filtering.
    #[default]
    Off,
    /// Moderate filtering.
    Medium,
    /// Strict filtering.
    High,
}

impl SafeSearch {
    /// Parses the `safe` request parameter. Unknown values mean off.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" | "active" | "strict" => Self::High,
            "medium" | "moderate" => Self::Medium,
            _ => Self::Off,
        }
    }

    /// Returns the value echoed back in request descriptors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Time range filter derived from `dateRestrict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Day,
    Week,
    Month,
    Year,
}

impl TimeRange {
    /// Parses `d[n]`, `w[n]`, `m[n]`, `y[n]`.
    ///
    /// Upstream only supports whole units, so the count is dropped.
    pub fn from_date_restrict(value: &str) -> Option<Self> {
        let caps = DATE_RESTRICT.captures(value.trim())?;
        match &caps[1] {
            "d" => Some(Self::Day),
            "w" => Some(Self::Week),
            "m" => Some(Self::Month),
            "y" => Some(Self::Year),
            _ => None,
        }
    }

    /// Returns the lowercase identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

/// Deterministic cache key for one set of query-shaping parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A search request with all Custom Search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// The search terms.
    pub text: String,
    /// Requested number of results.
    pub num: u32,
    /// 1-based index of the first result.
    pub start: u32,
    /// Language restriction, as sent (`lang_en`) or bare (`en`).
    pub language: Option<String>,
    /// Safe search level.
    pub safe: SafeSearch,
    /// Date restriction (`d7`, `m1`, ...).
    pub date_restrict: Option<String>,
    /// Search engine id. Echoed only.
    pub cx: Option<String>,
}

impl SearchQuery {
    /// Creates a new search query with the given terms.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            num: 10,
            start: 1,
            language: None,
            safe: SafeSearch::Off,
            date_restrict: None,
            cx: None,
        }
    }

    /// Sets the number of results.
    pub fn with_num(mut self, num: u32) -> Self {
        self.num = num;
        self
    }

    /// Sets the start index.
    pub fn with_start(mut self, start: u32) -> Self {
        self.start = start;
        self
    }

    /// Sets the language restriction.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Sets the safe search level.
    pub fn with_safe(mut self, safe: SafeSearch) -> Self {
        self.safe = safe;
        self
    }

    /// Sets the date restriction.
    pub fn with_date_restrict(mut self, date_restrict: impl Into<String>) -> Self {
        self.date_restrict = Some(date_restrict.into());
        self
    }

    /// Sets the search engine id.
    pub fn with_cx(mut self, cx: impl Into<String>) -> Self {
        self.cx = Some(cx.into());
        self
    }

    /// Collapses whitespace in the terms and clamps count and offset into
    /// the ranges providers support.
    pub fn normalize(mut self, limits: &QueryLimits) -> Result<Self> {
        self.text = self.text.split_whitespace().collect::<Vec<_>>().join(" ");
        if self.text.is_empty() {
            return Err(SearchError::InvalidQuery("Query cannot be empty".into()));
        }
        self.num = self.num.clamp(1, limits.max_results.max(1));
        self.start = self.start.clamp(1, limits.max_start.max(1));
        self.language = self
            .language
            .take()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        self.date_restrict = self
            .date_restrict
            .take()
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty());
        Ok(self)
    }

    /// Zero-based offset of the first requested result.
    pub fn offset(&self) -> usize {
        self.start.saturating_sub(1) as usize
    }

    /// Bare locale code, stripping the `lang_` prefix.
    pub fn locale(&self) -> Option<String> {
        let language = self.language.as_deref()?;
        match LANG_RESTRICT.captures(language) {
            Some(caps) => Some(caps[1].to_ascii_lowercase()),
            None => Some(language.to_ascii_lowercase()),
        }
    }

    /// Time range filter, when `dateRestrict` is set and well-formed.
    pub fn time_range(&self) -> Option<TimeRange> {
        self.date_restrict
            .as_deref()
            .and_then(TimeRange::from_date_restrict)
    }

    /// Hashes every parameter that changes what upstream returns.
    ///
    /// Each field is length-prefixed so adjacent values can't run together,
    /// and absent optionals hash differently from empty ones.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        let mut field = |value: Option<&str>| match value {
            Some(v) => {
                hasher.update([1u8]);
                hasher.update((v.len() as u64).to_le_bytes());
                hasher.update(v.as_bytes());
            }
            None => hasher.update([0u8]),
        };
        field(Some(&self.text));
        field(Some(&self.num.to_string()));
        field(Some(&self.start.to_string()));
        field(self.locale().as_deref());
        field(Some(self.safe.as_str()));
        field(self.date_restrict.as_deref());
        Fingerprint(hex::encode(hasher.finalize()))
    }
}
