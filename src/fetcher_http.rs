//! HTTP-based page sessions using reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::fetcher::{PageFetcher, PageSession};
use crate::fingerprint::ClientFingerprint;
use crate::{Result, SearchError};

/// A page fetcher that uses plain HTTP requests via reqwest.
///
/// Suitable for targets that return server-rendered HTML, such as the
/// DuckDuckGo HTML endpoint. Cannot produce screenshots.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates a fetcher whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self { client })
    }

    /// Creates an `HttpFetcher` with a custom reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn open(&self, url: &str, fingerprint: &ClientFingerprint) -> Result<Box<dyn PageSession>> {
        let mut request = self.client.get(url);
        for (name, value) in fingerprint.headers() {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!("GET {} -> {} ({} bytes)", url, status, body.len());

        Ok(Box::new(HttpSession {
            status,
            body: Some(body),
        }))
    }
}

/// A fully buffered response body.
struct HttpSession {
    status: u16,
    body: Option<String>,
}

#[async_trait]
impl PageSession for HttpSession {
    fn status(&self) -> Option<u16> {
        Some(self.status)
    }

    async fn html(&mut self) -> Result<String> {
        self.body
            .clone()
            .ok_or_else(|| SearchError::Other("page session already closed".into()))
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>> {
        Err(SearchError::Browser(
            "screenshots need the browser renderer".into(),
        ))
    }

    async fn close(&mut self) {
        self.body = None;
    }
}
