//! Core data models shared by the index, the orchestrator, and the
//! generation pipeline.
//!
//! Every type here is request-scoped except [`Document`], which the
//! embedding index persists. Web fallback documents are synthesized per
//! response and never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A scalar metadata value.
///
/// The index only stores scalars. List-valued input is flattened to a
/// joined [`MetadataValue::Text`] at ingestion time (see
/// [`crate::index::flatten_metadata`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl MetadataValue {
    /// Returns the inner string for text values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Number(n) => write!(f, "{}", n),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

/// Key-ordered document metadata.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A document as stored in (or synthesized alongside) the embedding index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// The `title` metadata field, if present.
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").and_then(MetadataValue::as_str)
    }
}

/// Ingestion input: raw content plus free-form JSON metadata.
///
/// Metadata may contain lists and nested values; they are flattened
/// before storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDocument {
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Where a search result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOrigin {
    VectorStore,
    WebSearch,
}

impl ResultOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultOrigin::VectorStore => "vector_store",
            ResultOrigin::WebSearch => "web_search",
        }
    }
}

/// One ranked search hit with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub document: Document,
    /// Similarity in `[0.0, 1.0]`. Web fallback results carry a fixed `0.5`.
    pub similarity_score: f64,
    pub source: ResultOrigin,
}

/// A raw result from the external search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebResult {
    pub title: String,
    pub content: String,
    pub url: String,
    pub source: String,
}

/// The orchestrator's answer to a search call.
///
/// `results` holds all vector-store hits first, in index order, followed
/// by any web fallback hits in provider order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub total_found: usize,
    pub used_web_fallback: bool,
    /// Raw provider results when the provider was consulted.
    pub web_results: Option<Vec<WebResult>>,
}

/// Health of the backing collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexHealth {
    Active,
    Error,
}

/// Snapshot of a collection returned by the status operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionStatus {
    pub collection_name: String,
    pub document_count: u64,
    pub status: IndexHealth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Conversation role accepted in chat history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One prior conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: None,
            images: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: None,
            images: None,
        }
    }
}

/// A search hit flattened into the shape handed to the generation
/// pipeline and echoed back to chat clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDocument {
    pub content: String,
    pub metadata: Metadata,
    pub similarity_score: f64,
    pub source: ResultOrigin,
}

impl From<&SearchResult> for ContextDocument {
    fn from(result: &SearchResult) -> Self {
        Self {
            content: result.document.content.clone(),
            metadata: result.document.metadata.clone(),
            similarity_score: result.similarity_score,
            source: result.source,
        }
    }
}
