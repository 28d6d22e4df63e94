//! External search seam: provider trait and tier cascade.
//!
//! A [`WebSearchProvider`] answers `search(query, k)` with at most `k`
//! [`WebResult`]s. [`TieredWebSearch`] composes ordered [`SearchTier`]s:
//! each tier's outcome is an explicit `Result`, and the cascade moves to
//! the next tier when a tier fails or comes back empty.
//!
//! ```text
//! tier 1 ──Ok(non-empty)──▶ results
//!    │ Ok(empty) / Err(logged)
//!    ▼
//! tier 2 ──Ok(non-empty)──▶ results
//!    │ Ok(empty) / Err(logged)
//!    ▼
//! Ok([]) if any tier answered, else Err(AllTiersFailed)
//! ```

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::models::WebResult;

/// An external search surface.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    /// Search for up to `k` results.
    ///
    /// An `Err` means the provider as a whole could not run. Tiered
    /// providers absorb per-tier failures and return `Ok` with whatever
    /// the cascade produced.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<WebResult>, ProviderError>;
}

/// One tier of a [`TieredWebSearch`].
#[async_trait]
pub trait SearchTier: Send + Sync {
    /// Short label used in logs and error messages.
    fn name(&self) -> &'static str;

    async fn fetch(&self, query: &str, k: usize) -> Result<Vec<WebResult>, ProviderError>;
}

/// Ordered tier cascade. The first tier with results wins.
pub struct TieredWebSearch {
    tiers: Vec<Box<dyn SearchTier>>,
}

impl TieredWebSearch {
    pub fn new(tiers: Vec<Box<dyn SearchTier>>) -> Self {
        Self { tiers }
    }
}

#[async_trait]
impl WebSearchProvider for TieredWebSearch {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<WebResult>, ProviderError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut answered = false;
        let mut failures = Vec::new();
        for tier in &self.tiers {
            match tier.fetch(query, k).await {
                Ok(mut results) if !results.is_empty() => {
                    results.truncate(k);
                    debug!(tier = tier.name(), count = results.len(), "web tier answered");
                    return Ok(results);
                }
                Ok(_) => {
                    answered = true;
                    debug!(tier = tier.name(), "web tier returned nothing");
                }
                Err(e) => {
                    warn!(tier = tier.name(), error = %e, "web tier failed");
                    failures.push(e);
                }
            }
        }

        // Empty only when some tier actually answered.
        if answered || failures.is_empty() {
            Ok(Vec::new())
        } else {
            Err(ProviderError::AllTiersFailed(failures))
        }
    }
}

/// Provider used when web search is turned off. Every call fails with
/// [`ProviderError::Disabled`].
pub struct DisabledWebSearch;

#[async_trait]
impl WebSearchProvider for DisabledWebSearch {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<WebResult>, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

/// Domain relevance vocabulary for scraped results.
#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    terms: Vec<String>,
}

impl RelevanceFilter {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// The default healthcare vocabulary.
    pub fn healthcare() -> Self {
        Self::new(["health", "medical", "medicine", "healthcare", "clinical"])
    }

    /// True when the title or snippet contains at least one term
    /// (case-insensitive substring match).
    pub fn matches(&self, title: &str, snippet: &str) -> bool {
        let title = title.to_lowercase();
        let snippet = snippet.to_lowercase();
        self.terms
            .iter()
            .any(|t| title.contains(t.as_str()) || snippet.contains(t.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedTier {
        name: &'static str,
        outcome: Result<usize, &'static str>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SearchTier for FixedTier {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch(&self, _query: &str, _k: usize) -> Result<Vec<WebResult>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Ok(n) => Ok((0..n)
                    .map(|i| WebResult {
                        title: format!("{} {}", self.name, i),
                        content: "text".to_string(),
                        url: String::new(),
                        source: self.name.to_string(),
                    })
                    .collect()),
                Err(msg) => Err(ProviderError::Transport {
                    tier: self.name,
                    message: msg.to_string(),
                }),
            }
        }
    }

    fn tier(name: &'static str, outcome: Result<usize, &'static str>) -> (Box<dyn SearchTier>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(FixedTier {
                name,
                outcome,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    #[tokio::test]
    async fn test_first_tier_wins_and_truncates() {
        let (t1, c1) = tier("instant", Ok(6));
        let (t2, c2) = tier("scrape", Ok(2));
        let search = TieredWebSearch::new(vec![t1, t2]);

        let results = search.search("q", 4).await.unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.source == "instant"));
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_tier_falls_through() {
        let (t1, _) = tier("instant", Err("timeout"));
        let (t2, c2) = tier("scrape", Ok(1));
        let search = TieredWebSearch::new(vec![t1, t2]);

        let results = search.search("q", 3).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, "scrape");
        assert_eq!(c2.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_tiers_failing_reports_each_tier() {
        let (t1, c1) = tier("instant", Err("dns"));
        let (t2, c2) = tier("scrape", Err("blocked"));
        let search = TieredWebSearch::new(vec![t1, t2]);

        let err = search.search("q", 3).await.unwrap_err();
        match &err {
            ProviderError::AllTiersFailed(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        let msg = err.to_string();
        assert!(msg.contains("instant request failed: dns"), "{}", msg);
        assert!(msg.contains("scrape request failed: blocked"), "{}", msg);
        assert_eq!(c1.load(Ordering::SeqCst), 1);
        assert_eq!(c2.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_answer_after_failure_is_not_error() {
        let (t1, _) = tier("instant", Err("dns"));
        let (t2, _) = tier("scrape", Ok(0));
        let search = TieredWebSearch::new(vec![t1, t2]);

        assert!(search.search("q", 3).await.unwrap().is_empty());
        assert!(TieredWebSearch::new(Vec::new()).search("q", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        assert!(matches!(
            DisabledWebSearch.search("q", 3).await,
            Err(ProviderError::Disabled)
        ));
    }

    #[test]
    fn test_relevance_filter() {
        let filter = RelevanceFilter::healthcare();
        assert!(filter.matches("Clinical trials for asthma", ""));
        assert!(filter.matches("Asthma", "Guidance from the national health service"));
        assert!(!filter.matches("Football scores", "Saturday results"));

        let custom = RelevanceFilter::new(["  Veterinary ", ""]);
        assert!(custom.matches("veterinary clinic", ""));
        assert!(!custom.matches("health", "medical"));
    }
}
