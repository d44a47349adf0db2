//! Page session abstraction for the scrape provider.
//!
//! A [`PageFetcher`] opens one [`PageSession`] per scrape attempt. The session
//! owns whatever backs it (a browser tab, a buffered HTTP body) until it is
//! closed or dropped, so the provider can read the markup, decide whether it
//! needs a screenshot for diagnostics, and only then release the resource.

use async_trait::async_trait;

use crate::fingerprint::ClientFingerprint;
use crate::Result;

/// Strategy for waiting until a page is considered fully loaded.
#[derive(Debug, Clone, Default)]
pub enum WaitStrategy {
    /// Wait for the page load event only.
    #[default]
    Load,
    /// Wait until network activity settles for the given duration.
    NetworkIdle {
        /// Milliseconds of network inactivity to wait for.
        idle_ms: u64,
    },
    /// Wait until a CSS selector matches an element on the page.
    Selector {
        /// CSS selector to wait for.
        css: String,
        /// Maximum time to wait in milliseconds before giving up and reading
        /// whatever rendered.
        timeout_ms: u64,
    },
}

/// One loaded page.
#[async_trait]
pub trait PageSession: Send {
    /// HTTP status of the main document, when the backend knows it.
    fn status(&self) -> Option<u16> {
        None
    }

    /// Rendered markup.
    async fn html(&mut self) -> Result<String>;

    /// Full-page PNG capture.
    async fn screenshot(&mut self) -> Result<Vec<u8>>;

    /// Releases the underlying resource. Safe to call more than once.
    async fn close(&mut self);
}

/// Opens page sessions presenting a given client identity.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Navigates to `url` and returns the loaded page.
    async fn open(&self, url: &str, fingerprint: &ClientFingerprint) -> Result<Box<dyn PageSession>>;

    /// Releases shared resources such as a browser process.
    async fn shutdown(&self) {}
}
