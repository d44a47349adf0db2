//! Upstream result sources.

use std::time::Duration;

use async_trait::async_trait;

use crate::{ProviderBatch, ProviderKind, ProviderResult, SearchQuery};

/// A source of raw results for a query.
///
/// Implementations make at most one outbound attempt per call; the
/// orchestrator owns fallback and the latency bound.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> ProviderKind;

    /// Upper bound on one `fetch`, enforced by the caller.
    fn timeout(&self) -> Duration;

    /// Fetches results in upstream order.
    async fn fetch(&self, query: &SearchQuery) -> ProviderResult<ProviderBatch>;

    /// Name used in logs.
    fn name(&self) -> &str {
        self.kind().as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProviderError, RawResult};

    struct Fixed(ProviderKind);

    #[async_trait]
    impl Provider for Fixed {
        fn kind(&self) -> ProviderKind {
            self.0
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn fetch(&self, query: &SearchQuery) -> ProviderResult<ProviderBatch> {
            if query.text == "fail" {
                return Err(ProviderError::AggregatorUnavailable("down".into()));
            }
            Ok(ProviderBatch::new(
                self.0,
                vec![RawResult::new("https://example.com", &query.text, "")],
            ))
        }
    }

    #[tokio::test]
    async fn test_provider_default_name() {
        let provider = Fixed(ProviderKind::Scrape);
        assert_eq!(provider.name(), "scrape");
        let batch = provider.fetch(&SearchQuery::new("ok")).await.unwrap();
        assert_eq!(batch.kind, ProviderKind::Scrape);
        assert_eq!(batch.results[0].title, "ok");
    }

    #[tokio::test]
    async fn test_provider_as_trait_object() {
        let provider: Box<dyn Provider> = Box::new(Fixed(ProviderKind::Aggregator));
        let err = provider.fetch(&SearchQuery::new("fail")).await.unwrap_err();
        assert!(matches!(err, ProviderError::AggregatorUnavailable(_)));
    }

    #[test]
    fn test_provider_blocking_fetch() {
        let provider = Fixed(ProviderKind::Aggregator);
        let batch = tokio_test::block_on(provider.fetch(&SearchQuery::new("rust")));
        let batch = tokio_test::assert_ok!(batch);
        assert_eq!(batch.results.len(), 1);
        tokio_test::assert_err!(tokio_test::block_on(provider.fetch(&SearchQuery::new("fail"))));
    }
}
