//! SQLite-backed [`Store`] for the embedding index.
//!
//! Each row holds one document with its embedding as a little-endian f32
//! BLOB. Nearest-neighbour queries load a collection's vectors and rank
//! them by cosine distance in Rust.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use rag_retrieval_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use rag_retrieval_core::error::IndexError;
use rag_retrieval_core::models::{Document, Metadata};
use rag_retrieval_core::store::{Neighbor, Store, StoredDocument};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn storage_err(e: sqlx::Error) -> IndexError {
    IndexError::Storage(e.to_string())
}

fn query_err(e: impl std::fmt::Display) -> IndexError {
    IndexError::Query(e.to_string())
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert(&self, collection: &str, docs: &[StoredDocument]) -> Result<usize, IndexError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        for sd in docs {
            let metadata_json = serde_json::to_string(&sd.document.metadata).map_err(query_err)?;
            sqlx::query(
                "INSERT INTO documents (id, collection, content, metadata_json, source, created_at, embedding, dims) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&sd.document.id)
            .bind(collection)
            .bind(&sd.document.content)
            .bind(&metadata_json)
            .bind(&sd.document.source)
            .bind(sd.document.created_at.to_rfc3339())
            .bind(vec_to_blob(&sd.embedding))
            .bind(sd.embedding.len() as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(docs.len())
    }

    async fn nearest(
        &self,
        collection: &str,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, IndexError> {
        let rows = sqlx::query(
            "SELECT id, content, metadata_json, source, created_at, embedding \
             FROM documents WHERE collection = ?",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        let mut neighbors = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let vec = blob_to_vec(&blob);
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json).map_err(query_err)?;
            let created_at: String = row.get("created_at");
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(query_err)?
                .with_timezone(&Utc);

            neighbors.push(Neighbor {
                distance: cosine_distance(query_vec, &vec),
                document: Document {
                    id: row.get("id"),
                    content: row.get("content"),
                    metadata,
                    source: row.get("source"),
                    created_at,
                },
            });
        }

        neighbors.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        neighbors.truncate(k);
        Ok(neighbors)
    }

    async fn count(&self, collection: &str) -> Result<u64, IndexError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(n.max(0) as u64)
    }
}
