//! Storage abstraction for the embedding index.
//!
//! The [`Store`] trait is the persistence seam under
//! [`EmbeddingIndex`](crate::index::EmbeddingIndex): it holds documents with
//! their vectors, grouped into named collections, and answers
//! nearest-neighbour queries by cosine distance.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::IndexError;
use crate::models::Document;

/// A document paired with its embedding, ready for insertion.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub document: Document,
    pub embedding: Vec<f32>,
}

/// A nearest-neighbour hit.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub document: Document,
    /// Cosine distance in `[0.0, 2.0]`; lower is closer.
    pub distance: f64,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](Store::insert) | Append documents to a collection, creating it if absent |
/// | [`nearest`](Store::nearest) | Up to `k` closest documents, ascending distance |
/// | [`count`](Store::count) | Number of documents in a collection |
#[async_trait]
pub trait Store: Send + Sync {
    /// Append documents to `collection`. Returns the number stored.
    async fn insert(&self, collection: &str, docs: &[StoredDocument]) -> Result<usize, IndexError>;

    /// Return up to `k` documents closest to `query_vec`, ordered by
    /// ascending distance. An absent collection yields no neighbours.
    async fn nearest(
        &self,
        collection: &str,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, IndexError>;

    /// Number of documents in `collection` (zero if absent).
    async fn count(&self, collection: &str) -> Result<u64, IndexError>;
}
