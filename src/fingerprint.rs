//! Rotating client fingerprints for the scrape provider.
//!
//! Each scrape attempt presents one coherent identity: user agent, language
//! headers, platform and viewport all agree with each other. The pool hands
//! them out round-robin or at random and can be pushed forward after the
//! target starts blocking the current one.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Browser window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// One browser identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFingerprint {
    pub user_agent: String,
    pub accept_language: String,
    /// Value reported by `navigator.platform`.
    pub platform: String,
    pub viewport: Viewport,
}

impl ClientFingerprint {
    pub fn new(
        user_agent: impl Into<String>,
        accept_language: impl Into<String>,
        platform: impl Into<String>,
        viewport: Viewport,
    ) -> Self {
        Self {
            user_agent: user_agent.into(),
            accept_language: accept_language.into(),
            platform: platform.into(),
            viewport,
        }
    }

    /// Request headers a real browser with this identity would send.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("User-Agent", self.user_agent.clone()),
            ("Accept-Language", self.accept_language.clone()),
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"
                    .to_string(),
            ),
            ("Upgrade-Insecure-Requests", "1".to_string()),
            ("DNT", "1".to_string()),
        ]
    }

    /// Languages listed in `Accept-Language`, without quality values.
    pub fn languages(&self) -> Vec<String> {
        self.accept_language
            .split(',')
            .filter_map(|part| part.split(';').next())
            .map(|lang| lang.trim().to_string())
            .filter(|lang| !lang.is_empty())
            .collect()
    }

    /// Script run before any page script to hide automation tells.
    pub fn stealth_script(&self) -> String {
        let languages = serde_json::to_string(&self.languages()).unwrap_or_else(|_| "[]".into());
        let platform = serde_json::to_string(&self.platform).unwrap_or_else(|_| "\"\"".into());
        format!(
            r#"
            Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
            Object.defineProperty(navigator, 'languages', {{ get: () => {languages} }});
            Object.defineProperty(navigator, 'platform', {{ get: () => {platform} }});
            Object.defineProperty(navigator, 'plugins', {{ get: () => [1, 2, 3, 4, 5] }});
            window.chrome = window.chrome || {{ runtime: {{}} }};
            "#
        )
    }
}

/// Built-in identities: current desktop Chrome, Firefox and Safari builds.
pub fn default_fingerprints() -> Vec<ClientFingerprint> {
    vec![
        ClientFingerprint::new(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
            "en-US,en;q=0.9",
            "MacIntel",
            Viewport { width: 1440, height: 900 },
        ),
        ClientFingerprint::new(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
            "en-US,en;q=0.9",
            "Win32",
            Viewport { width: 1920, height: 1080 },
        ),
        ClientFingerprint::new(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
            "en-GB,en;q=0.8",
            "Linux x86_64",
            Viewport { width: 1366, height: 768 },
        ),
        ClientFingerprint::new(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
            "en-US,en;q=0.5",
            "Win32",
            Viewport { width: 1536, height: 864 },
        ),
        ClientFingerprint::new(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
            "en-US,en;q=0.9",
            "MacIntel",
            Viewport { width: 1680, height: 1050 },
        ),
    ]
}

/// Fingerprint selection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Cycle through the pool in order.
    #[default]
    RoundRobin,
    /// Pick uniformly at random.
    Random,
}

/// A pool of fingerprints with rotation.
#[derive(Debug)]
pub struct FingerprintPool {
    fingerprints: Vec<ClientFingerprint>,
    strategy: RotationStrategy,
    current_index: AtomicUsize,
}

impl FingerprintPool {
    /// Creates a pool. An empty list falls back to the built-in identities.
    pub fn new(fingerprints: Vec<ClientFingerprint>) -> Self {
        let fingerprints = if fingerprints.is_empty() {
            default_fingerprints()
        } else {
            fingerprints
        };
        Self {
            fingerprints,
            strategy: RotationStrategy::RoundRobin,
            current_index: AtomicUsize::new(0),
        }
    }

    /// Sets the selection strategy.
    pub fn with_strategy(mut self, strategy: RotationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Identity for the next attempt.
    ///
    /// Round-robin returns the current identity without advancing; only
    /// [`rotate`](Self::rotate) moves it, so a working identity is kept
    /// until the target pushes back.
    pub fn next(&self) -> ClientFingerprint {
        let index = match self.strategy {
            RotationStrategy::RoundRobin => {
                self.current_index.load(Ordering::SeqCst) % self.fingerprints.len()
            }
            RotationStrategy::Random => rand::thread_rng().gen_range(0..self.fingerprints.len()),
        };
        self.fingerprints[index].clone()
    }

    /// Moves past the current identity, typically after a block.
    pub fn rotate(&self) {
        let previous = self.current_index.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Rotated client fingerprint {} -> {}",
            previous % self.fingerprints.len(),
            (previous + 1) % self.fingerprints.len()
        );
    }
}

impl Default for FingerprintPool {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
