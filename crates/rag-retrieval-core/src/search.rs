//! Retrieval orchestration: vector search with web fallback.
//!
//! [`Retriever::search`] always queries the [`EmbeddingIndex`] first and
//! only consults the [`WebSearchProvider`] when the index came back short.
//!
//! # Fallback Algorithm
//!
//! 1. `vector = index.query(query, limit, threshold)`.
//! 2. If `vector.len() >= limit` or fallback is off, return `vector` as-is.
//! 3. Otherwise ask the provider for `limit - vector.len()` items and wrap
//!    each as a `web_{n}` document with a fixed score of `0.5`.
//! 4. Merge: all vector hits first in index order, then web hits in
//!    provider order. Results are never re-sorted across origins, even when
//!    a web hit's `0.5` beats a weak vector hit.
//! 5. If the index itself fails and fallback is on, answer from the web
//!    alone with the full `limit`; if that fails too, report both causes.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RetrievalError;
use crate::index::EmbeddingIndex;
use crate::models::{
    CollectionStatus, Document, Metadata, MetadataValue, ResultOrigin, SearchResponse,
    SearchResult, WebResult,
};
use crate::web::WebSearchProvider;

/// Score assigned to every web fallback result.
pub const WEB_RESULT_SCORE: f64 = 0.5;

/// Parameters used by [`Retriever::search_analytics`].
pub const ANALYTICS_LIMIT: usize = 5;
pub const ANALYTICS_THRESHOLD: f64 = 0.3;

fn default_limit() -> usize {
    5
}
fn default_threshold() -> f64 {
    0.7
}
fn default_use_web_fallback() -> bool {
    true
}

/// Inputs for a single orchestrated search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_use_web_fallback")]
    pub use_web_fallback: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: default_limit(),
            threshold: default_threshold(),
            use_web_fallback: default_use_web_fallback(),
        }
    }
}

/// Timing and quality metrics for one search. Failures are carried in
/// `error` with zeroed metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchAnalytics {
    pub query: String,
    pub search_time_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_store_status: Option<CollectionStatus>,
    pub results_count: usize,
    pub used_web_fallback: bool,
    pub average_similarity_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The retrieval orchestrator.
pub struct Retriever {
    index: Arc<EmbeddingIndex>,
    web: Arc<dyn WebSearchProvider>,
}

impl Retriever {
    pub fn new(index: Arc<EmbeddingIndex>, web: Arc<dyn WebSearchProvider>) -> Self {
        Self { index, web }
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    /// Run [`Retriever::search`] with the fields of a [`SearchRequest`].
    pub async fn run(&self, req: &SearchRequest) -> Result<SearchResponse, RetrievalError> {
        self.search(&req.query, req.limit, req.threshold, req.use_web_fallback)
            .await
    }

    /// Orchestrated search. See the module docs for the algorithm.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        threshold: f64,
        use_web_fallback: bool,
    ) -> Result<SearchResponse, RetrievalError> {
        let vector_results = match self.index.query(query, limit, threshold).await {
            Ok(results) => results,
            Err(index_err) if use_web_fallback => {
                warn!(error = %index_err, "vector search failed, trying web-only search");
                return match self.web.search(query, limit).await {
                    Ok(mut web) => {
                        web.truncate(limit);
                        Ok(build_response(query, Vec::new(), web))
                    }
                    Err(web_err) => Err(RetrievalError::Exhausted {
                        index: index_err,
                        web: web_err,
                    }),
                };
            }
            Err(index_err) => return Err(RetrievalError::Index(index_err)),
        };

        if vector_results.len() >= limit || !use_web_fallback {
            let total_found = vector_results.len();
            return Ok(SearchResponse {
                query: query.to_string(),
                results: vector_results,
                total_found,
                used_web_fallback: false,
                web_results: None,
            });
        }

        let wanted = limit - vector_results.len();
        debug!(have = vector_results.len(), wanted, "index short, consulting web");

        match self.web.search(query, wanted).await {
            Ok(mut web) => {
                web.truncate(wanted);
                Ok(build_response(query, vector_results, web))
            }
            Err(e) => {
                warn!(error = %e, "web fallback unavailable, returning vector results only");
                let total_found = vector_results.len();
                Ok(SearchResponse {
                    query: query.to_string(),
                    results: vector_results,
                    total_found,
                    used_web_fallback: false,
                    web_results: None,
                })
            }
        }
    }

    /// Time a default search and summarise it. Never fails.
    pub async fn search_analytics(&self, query: &str) -> SearchAnalytics {
        let vector_store_status = self.index.status().await;
        let started = Instant::now();

        match self
            .search(query, ANALYTICS_LIMIT, ANALYTICS_THRESHOLD, true)
            .await
        {
            Ok(response) => {
                let search_time_seconds = started.elapsed().as_secs_f64();
                let average_similarity_score = if response.results.is_empty() {
                    0.0
                } else {
                    response
                        .results
                        .iter()
                        .map(|r| r.similarity_score)
                        .sum::<f64>()
                        / response.results.len() as f64
                };
                SearchAnalytics {
                    query: query.to_string(),
                    search_time_seconds,
                    vector_store_status: Some(vector_store_status),
                    results_count: response.results.len(),
                    used_web_fallback: response.used_web_fallback,
                    average_similarity_score,
                    error: None,
                }
            }
            Err(e) => SearchAnalytics {
                query: query.to_string(),
                search_time_seconds: 0.0,
                vector_store_status: None,
                results_count: 0,
                used_web_fallback: false,
                average_similarity_score: 0.0,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Append web results after the vector results, numbering each synthetic
/// document by its position in the merged list.
fn build_response(
    query: &str,
    vector_results: Vec<SearchResult>,
    web: Vec<WebResult>,
) -> SearchResponse {
    let mut results = vector_results;
    results.reserve(web.len());
    for item in &web {
        let n = results.len();
        results.push(SearchResult {
            document: web_document(n, item),
            similarity_score: WEB_RESULT_SCORE,
            source: ResultOrigin::WebSearch,
        });
    }

    SearchResponse {
        query: query.to_string(),
        total_found: results.len(),
        used_web_fallback: !web.is_empty(),
        results,
        web_results: Some(web),
    }
}

fn web_document(n: usize, item: &WebResult) -> Document {
    let mut metadata = Metadata::new();
    metadata.insert("title".to_string(), MetadataValue::from(item.title.as_str()));
    metadata.insert("source".to_string(), MetadataValue::from(item.source.as_str()));
    metadata.insert("url".to_string(), MetadataValue::from(item.url.as_str()));
    metadata.insert(
        "type".to_string(),
        MetadataValue::from(ResultOrigin::WebSearch.as_str()),
    );

    Document {
        id: format!("web_{}", n),
        content: item.content.clone(),
        metadata,
        source: item.source.clone(),
        created_at: Utc::now(),
    }
}
