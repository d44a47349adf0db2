//! Debug artifact capture for failed scrapes.
//!
//! When a scrape is blocked or no selector strategy matches, the provider
//! hands the page markup (and a screenshot, when the renderer can take one)
//! to an [`ArtifactSink`]. Files land next to each other under a timestamped
//! name so a drifted layout can be diagnosed without reproducing the request.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::Result;

/// Why an artifact was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureReason {
    Blocked,
    NoSelectorMatched,
}

impl CaptureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::NoSelectorMatched => "no_selector_matched",
        }
    }
}

/// Snapshot of a page the scrape provider could not use.
#[derive(Debug, Clone)]
pub struct DebugArtifact {
    pub reason: CaptureReason,
    pub query: String,
    pub url: String,
    pub html: String,
    /// PNG bytes.
    pub screenshot: Option<Vec<u8>>,
    pub captured_at: DateTime<Utc>,
}

impl DebugArtifact {
    pub fn new(reason: CaptureReason, query: impl Into<String>, url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            reason,
            query: query.into(),
            url: url.into(),
            html: html.into(),
            screenshot: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_screenshot(mut self, png: Vec<u8>) -> Self {
        self.screenshot = Some(png);
        self
    }

    /// File stem shared by the markup and the screenshot.
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}",
            self.reason.as_str(),
            self.captured_at.format("%Y%m%d_%H%M%S%3f")
        )
    }
}

/// Where artifacts go.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Persists the artifact, returning the files written.
    async fn capture(&self, artifact: DebugArtifact) -> Result<Vec<PathBuf>>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopArtifactSink;

#[async_trait]
impl ArtifactSink for NoopArtifactSink {
    async fn capture(&self, _artifact: DebugArtifact) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

/// Writes `<stem>.html` and `<stem>.png` into a directory.
#[derive(Debug, Clone)]
pub struct FsArtifactSink {
    dir: PathBuf,
}

impl FsArtifactSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ArtifactSink for FsArtifactSink {
    async fn capture(&self, artifact: DebugArtifact) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let stem = artifact.file_stem();
        let mut written = Vec::with_capacity(2);

        let html_path = self.dir.join(format!("{stem}.html"));
        let header = format!(
            "<!-- query: {} | url: {} | captured: {} -->\n",
            artifact.query.replace("--", "- -"),
            artifact.url,
            artifact.captured_at.to_rfc3339()
        );
        tokio::fs::write(&html_path, header + &artifact.html).await?;
        written.push(html_path);

        if let Some(png) = artifact.screenshot {
            let png_path = self.dir.join(format!("{stem}.png"));
            tokio::fs::write(&png_path, png).await?;
            written.push(png_path);
        }

        info!(
            "Captured {} artifact for '{}' in {}",
            artifact.reason.as_str(),
            artifact.query,
            self.dir.display()
        );
        Ok(written)
    }
}
