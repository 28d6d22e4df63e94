//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! Collections are `Vec`s behind a `std::sync::RwLock`. Nearest-neighbour
//! search is brute-force cosine distance over every stored vector.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::error::IndexError;

use super::{Neighbor, Store, StoredDocument};

/// In-memory store keyed by collection name.
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Vec<StoredDocument>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> IndexError {
    IndexError::Storage("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert(&self, collection: &str, docs: &[StoredDocument]) -> Result<usize, IndexError> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        collections
            .entry(collection.to_string())
            .or_default()
            .extend(docs.iter().cloned());
        Ok(docs.len())
    }

    async fn nearest(
        &self,
        collection: &str,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, IndexError> {
        let collections = self.collections.read().map_err(poisoned)?;
        let Some(stored) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut neighbors: Vec<Neighbor> = stored
            .iter()
            .map(|sd| Neighbor {
                document: sd.document.clone(),
                distance: cosine_distance(query_vec, &sd.embedding),
            })
            .collect();
        neighbors.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        neighbors.truncate(k);
        Ok(neighbors)
    }

    async fn count(&self, collection: &str) -> Result<u64, IndexError> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections.get(collection).map_or(0, |c| c.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, Metadata};
    use chrono::Utc;

    fn stored(id: &str, embedding: Vec<f32>) -> StoredDocument {
        StoredDocument {
            document: Document {
                id: id.to_string(),
                content: format!("content of {}", id),
                metadata: Metadata::new(),
                source: "test".to_string(),
                created_at: Utc::now(),
            },
            embedding,
        }
    }

    #[tokio::test]
    async fn test_nearest_orders_by_distance() {
        let store = InMemoryStore::new();
        store
            .insert(
                "docs",
                &[
                    stored("far", vec![0.0, 1.0]),
                    stored("near", vec![1.0, 0.1]),
                    stored("opposite", vec![-1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store.nearest("docs", &[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|n| n.document.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let store = InMemoryStore::new();
        store.insert("a", &[stored("x", vec![1.0])]).await.unwrap();

        assert_eq!(store.count("a").await.unwrap(), 1);
        assert_eq!(store.count("b").await.unwrap(), 0);
        assert!(store.nearest("b", &[1.0], 5).await.unwrap().is_empty());
    }
}
