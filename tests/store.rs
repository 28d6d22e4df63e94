//! SQLite store and seeding tests against a temporary database.

use async_trait::async_trait;
use chrono::Utc;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use rag_retrieval::config::{parse_config, Config};
use rag_retrieval::ingest::seed_if_empty;
use rag_retrieval::store::SqliteStore;
use rag_retrieval::{db, migrate};
use rag_retrieval_core::embedding::Embedder;
use rag_retrieval_core::error::IndexError;
use rag_retrieval_core::index::EmbeddingIndex;
use rag_retrieval_core::models::{Document, Metadata, MetadataValue};
use rag_retrieval_core::store::{Store, StoredDocument};

/// Maps text length parity onto two orthogonal axes.
struct ParityEmbedder;

#[async_trait]
impl Embedder for ParityEmbedder {
    fn model_name(&self) -> &str {
        "parity"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        Ok(texts
            .iter()
            .map(|t| {
                if t.len() % 2 == 0 {
                    vec![1.0, 0.0]
                } else {
                    vec![0.0, 1.0]
                }
            })
            .collect())
    }
}

fn test_config(tmp: &TempDir, seed_file: Option<&str>) -> Config {
    let seed_line = seed_file
        .map(|s| format!("seed_file = \"{}\"", tmp.path().join(s).display()))
        .unwrap_or_default();
    parse_config(&format!(
        r#"
[db]
path = "{}/data/rag.sqlite"

[index]
{}

[server]
bind = "127.0.0.1:0"
"#,
        tmp.path().display(),
        seed_line
    ))
    .unwrap()
}

async fn open_store(config: &Config) -> SqliteStore {
    let pool = db::connect(config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    SqliteStore::new(pool)
}

fn stored(id: &str, title: &str, embedding: Vec<f32>) -> StoredDocument {
    let mut metadata = Metadata::new();
    metadata.insert("title".to_string(), MetadataValue::from(title));
    metadata.insert("year".to_string(), MetadataValue::Number(2024.into()));
    StoredDocument {
        document: Document {
            id: id.to_string(),
            content: format!("{} body", title),
            metadata,
            source: "Clinical Guidelines".to_string(),
            created_at: Utc::now(),
        },
        embedding,
    }
}

#[tokio::test]
async fn test_sqlite_store_ranks_by_cosine_distance() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, None);
    let store = open_store(&config).await;

    let inserted = store
        .insert(
            "healthcare_docs",
            &[
                stored("a", "Far", vec![0.0, 1.0]),
                stored("b", "Near", vec![1.0, 0.0]),
                stored("c", "Middle", vec![1.0, 1.0]),
            ],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 3);

    let neighbors = store
        .nearest("healthcare_docs", &[1.0, 0.0], 2)
        .await
        .unwrap();
    let ids: Vec<&str> = neighbors.iter().map(|n| n.document.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c"]);
    assert!(neighbors[0].distance.abs() < 1e-6);
    assert!(neighbors[0].distance <= neighbors[1].distance);

    let doc = &neighbors[0].document;
    assert_eq!(doc.title(), Some("Near"));
    assert_eq!(doc.metadata["year"], MetadataValue::Number(2024.into()));
    assert_eq!(doc.source, "Clinical Guidelines");
}

#[tokio::test]
async fn test_sqlite_store_separates_collections() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, None);
    let store = open_store(&config).await;

    store
        .insert("healthcare_docs", &[stored("a", "One", vec![1.0, 0.0])])
        .await
        .unwrap();
    store
        .insert(
            "pediatrics",
            &[
                stored("b", "Two", vec![1.0, 0.0]),
                stored("c", "Three", vec![0.0, 1.0]),
            ],
        )
        .await
        .unwrap();

    assert_eq!(store.count("healthcare_docs").await.unwrap(), 1);
    assert_eq!(store.count("pediatrics").await.unwrap(), 2);
    assert_eq!(store.count("missing").await.unwrap(), 0);
    assert!(store.nearest("missing", &[1.0, 0.0], 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_id_rolls_back_batch() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, None);
    let store = open_store(&config).await;

    let err = store
        .insert(
            "healthcare_docs",
            &[
                stored("dup", "First", vec![1.0, 0.0]),
                stored("dup", "Second", vec![0.0, 1.0]),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Storage(_)));
    assert_eq!(store.count("healthcare_docs").await.unwrap(), 0);
}

#[tokio::test]
async fn test_unreadable_collection_is_query_error() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, None);
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    let store = SqliteStore::new(pool.clone());

    sqlx::query("DROP TABLE documents")
        .execute(&pool)
        .await
        .unwrap();

    let err = store.count("healthcare_docs").await.unwrap_err();
    assert!(matches!(err, IndexError::Query(_)), "{}", err);
    let err = store
        .nearest("healthcare_docs", &[1.0, 0.0], 3)
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Query(_)), "{}", err);
}

#[tokio::test]
async fn test_pool_uses_wal_and_busy_timeout() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, None);
    let pool = db::connect(&config).await.unwrap();

    let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");

    let timeout_ms: i64 = sqlx::query_scalar("PRAGMA busy_timeout")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(timeout_ms, db::BUSY_TIMEOUT.as_millis() as i64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_and_readers_share_pool() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, None);
    let store = Arc::new(open_store(&config).await);

    let mut tasks = Vec::new();
    for writer in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            for batch in 0..5 {
                let docs: Vec<StoredDocument> = (0..4)
                    .map(|i| {
                        let id = format!("w{}-b{}-{}", writer, batch, i);
                        stored(&id, "Concurrent", vec![1.0, i as f32])
                    })
                    .collect();
                store.insert("healthcare_docs", &docs).await.unwrap();
                store
                    .nearest("healthcare_docs", &[1.0, 0.0], 3)
                    .await
                    .unwrap();
            }
        }));
    }

    for task in tasks {
        tokio::time::timeout(Duration::from_secs(30), task)
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(store.count("healthcare_docs").await.unwrap(), 8 * 5 * 4);
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, None);
    migrate::run_migrations(&config).await.unwrap();
    migrate::run_migrations(&config).await.unwrap();
    assert!(config.db.path.exists());
}

#[tokio::test]
async fn test_seed_only_fills_empty_collection() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("seed.json"),
        r#"{"documents": [
            {"content": "Diabetes Overview", "metadata": {"title": "Diabetes Overview", "source": "Medical Textbook"}},
            {"content": "Drug Interactions!", "metadata": {"title": "Drug Interactions"}}
        ]}"#,
    )
    .unwrap();
    let config = test_config(&tmp, Some("seed.json"));
    let store = open_store(&config).await;
    let index = EmbeddingIndex::new(
        Arc::new(ParityEmbedder),
        Arc::new(store),
        config.index.collection.clone(),
    );

    assert_eq!(seed_if_empty(&index, &config).await.unwrap(), 2);
    assert_eq!(seed_if_empty(&index, &config).await.unwrap(), 0);
    assert_eq!(index.count().await.unwrap(), 2);

    // Round trip through SQLite: id and created_at are mirrored into metadata
    let results = index.query("Diabetes Overview", 5, 0.9).await.unwrap();
    assert_eq!(results.len(), 1);
    let doc = &results[0].document;
    assert_eq!(doc.title(), Some("Diabetes Overview"));
    assert_eq!(doc.source, "Medical Textbook");
    assert_eq!(doc.metadata["doc_id"].as_str(), Some(doc.id.as_str()));
    assert!(doc.metadata.contains_key("created_at"));
}

#[tokio::test]
async fn test_seed_without_seed_file_is_noop() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, None);
    let store = open_store(&config).await;
    let index = EmbeddingIndex::new(
        Arc::new(ParityEmbedder),
        Arc::new(store),
        config.index.collection.clone(),
    );
    assert_eq!(seed_if_empty(&index, &config).await.unwrap(), 0);
}
