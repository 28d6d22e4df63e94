//! Embedding index: ingestion, similarity query, and status.
//!
//! [`EmbeddingIndex`] pairs an [`Embedder`] with a [`Store`] and a default
//! collection name. It owns the only score semantics in the system:
//!
//! ```text
//! score = 1 - d            if d <= 1
//! score = max(0, 1/(1+d))  otherwise
//! ```
//!
//! where `d` is the cosine distance reported by the store. The mapping is
//! monotonically decreasing in `d` on each branch and always in `[0, 1]`.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::embedding::Embedder;
use crate::error::IndexError;
use crate::models::{
    CollectionStatus, Document, IndexHealth, Metadata, MetadataValue, NewDocument, ResultOrigin,
    SearchResult,
};
use crate::store::{Store, StoredDocument};

/// Separator used when flattening list-valued metadata.
pub const LIST_SEPARATOR: &str = ", ";

/// Convert a vector distance to a similarity score in `[0, 1]`.
pub fn distance_to_similarity(distance: f64) -> f64 {
    if distance <= 1.0 {
        (1.0 - distance).clamp(0.0, 1.0)
    } else {
        (1.0 / (1.0 + distance)).max(0.0)
    }
}

/// Flatten free-form JSON metadata into index-compatible scalars.
///
/// Lists become a [`LIST_SEPARATOR`]-joined string, nested objects are
/// stored as their JSON text, and nulls are dropped.
pub fn flatten_metadata(raw: &serde_json::Map<String, Value>) -> Metadata {
    raw.iter()
        .filter_map(|(key, value)| flatten_value(value).map(|v| (key.clone(), v)))
        .collect()
}

fn flatten_value(value: &Value) -> Option<MetadataValue> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(MetadataValue::Bool(*b)),
        Value::Number(n) => Some(MetadataValue::Number(n.clone())),
        Value::String(s) => Some(MetadataValue::Text(s.clone())),
        Value::Array(items) => Some(MetadataValue::Text(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(LIST_SEPARATOR),
        )),
        Value::Object(_) => Some(MetadataValue::Text(value.to_string())),
    }
}

/// A named collection of embedded documents.
pub struct EmbeddingIndex {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn Store>,
    collection: String,
}

impl EmbeddingIndex {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn Store>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            store,
            collection: collection.into(),
        }
    }

    /// The default collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Embed and store documents in `collection` (or the default one).
    ///
    /// Each document receives a fresh UUID and a `created_at` stamp; both
    /// are also written into its metadata as `doc_id` and `created_at`.
    /// Returns the number of documents stored.
    pub async fn add(
        &self,
        documents: &[NewDocument],
        collection: Option<&str>,
    ) -> Result<usize, IndexError> {
        if documents.is_empty() {
            return Ok(0);
        }

        let target = collection.unwrap_or(&self.collection);
        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != documents.len() {
            return Err(IndexError::Embedding(format!(
                "expected {} vectors, got {}",
                documents.len(),
                vectors.len()
            )));
        }

        let now = Utc::now();
        let stored: Vec<StoredDocument> = documents
            .iter()
            .zip(vectors)
            .map(|(doc, embedding)| {
                let id = Uuid::new_v4().to_string();
                let mut metadata = flatten_metadata(&doc.metadata);
                metadata.insert("doc_id".to_string(), MetadataValue::from(id.as_str()));
                metadata.insert(
                    "created_at".to_string(),
                    MetadataValue::Text(now.to_rfc3339()),
                );
                let source = metadata
                    .get("source")
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "Unknown".to_string());
                StoredDocument {
                    document: Document {
                        id,
                        content: doc.content.clone(),
                        metadata,
                        source,
                        created_at: now,
                    },
                    embedding,
                }
            })
            .collect();

        let count = self.store.insert(target, &stored).await?;
        info!(collection = target, count, "documents added to index");
        Ok(count)
    }

    /// Nearest-neighbour query with threshold filtering.
    ///
    /// Returns at most `k` results, each with `similarity_score >= threshold`,
    /// in the store's ranking order (descending similarity).
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        threshold: f64,
    ) -> Result<Vec<SearchResult>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed_query(text).await?;
        let neighbors = self.store.nearest(&self.collection, &query_vec, k).await?;
        let candidates = neighbors.len();

        let results: Vec<SearchResult> = neighbors
            .into_iter()
            .map(|n| SearchResult {
                similarity_score: distance_to_similarity(n.distance),
                document: n.document,
                source: ResultOrigin::VectorStore,
            })
            .filter(|r| r.similarity_score >= threshold)
            .collect();

        debug!(
            collection = %self.collection,
            candidates,
            kept = results.len(),
            threshold,
            "vector query"
        );
        Ok(results)
    }

    /// Collection status; never fails, errors are reported in the payload.
    pub async fn status(&self) -> CollectionStatus {
        match self.store.count(&self.collection).await {
            Ok(count) => CollectionStatus {
                collection_name: self.collection.clone(),
                document_count: count,
                status: IndexHealth::Active,
                error: None,
            },
            Err(e) => CollectionStatus {
                collection_name: self.collection.clone(),
                document_count: 0,
                status: IndexHealth::Error,
                error: Some(e.to_string()),
            },
        }
    }

    /// Number of documents in the default collection.
    pub async fn count(&self) -> Result<u64, IndexError> {
        self.store.count(&self.collection).await
    }
}
