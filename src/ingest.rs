//! Document ingestion from JSON files.
//!
//! Accepted layouts:
//!
//! ```json
//! [{ "content": "...", "metadata": { "title": "...", "source": "..." } }]
//! { "documents": [ ... ] }
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use rag_retrieval_core::index::EmbeddingIndex;
use rag_retrieval_core::models::NewDocument;

use crate::config::Config;
use crate::services::Services;

#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentFile {
    List(Vec<NewDocument>),
    Wrapped { documents: Vec<NewDocument> },
}

/// Parse a document file body.
pub fn parse_documents(content: &str) -> Result<Vec<NewDocument>> {
    let file: DocumentFile = serde_json::from_str(content)
        .context("Expected a JSON array of documents or an object with a `documents` array")?;
    let documents = match file {
        DocumentFile::List(docs) | DocumentFile::Wrapped { documents: docs } => docs,
    };

    if let Some(pos) = documents.iter().position(|d| d.content.trim().is_empty()) {
        bail!("document {} has empty content", pos);
    }
    Ok(documents)
}

pub fn read_documents(path: &Path) -> Result<Vec<NewDocument>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_documents(&content).with_context(|| format!("Invalid document file {}", path.display()))
}

/// `ingest <file>`: embed and store every document in the file.
pub async fn run_ingest(config: &Config, file: &Path, collection: Option<&str>) -> Result<()> {
    let documents = read_documents(file)?;
    let services = Services::from_config(config).await?;
    let count = services.index.add(&documents, collection).await?;

    println!(
        "Ingested {} documents into '{}'",
        count,
        collection.unwrap_or(services.index.collection())
    );
    Ok(())
}

/// Load `[index].seed_file` into the default collection when it is empty.
/// Returns the number of documents added.
pub async fn seed_if_empty(index: &EmbeddingIndex, config: &Config) -> Result<usize> {
    let Some(seed_file) = &config.index.seed_file else {
        return Ok(0);
    };
    if index.count().await? > 0 {
        return Ok(0);
    }

    let documents = read_documents(seed_file)?;
    let count = index.add(&documents, None).await?;
    info!(
        collection = index.collection(),
        count,
        seed_file = %seed_file.display(),
        "seeded empty collection"
    );
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_array_layout() {
        let docs = parse_documents(
            r#"[{"content": "Diabetes is a chronic condition.", "metadata": {"title": "Diabetes Overview", "tags": ["endocrine", "chronic"]}}]"#,
        )
        .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].metadata["title"], "Diabetes Overview");
    }

    #[test]
    fn test_parse_wrapped_layout_without_metadata() {
        let docs =
            parse_documents(r#"{"documents": [{"content": "a"}, {"content": "b"}]}"#).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs[1].metadata.is_empty());
    }

    #[test]
    fn test_parse_rejects_blank_content() {
        let err = parse_documents(r#"[{"content": "ok"}, {"content": "  "}]"#).unwrap_err();
        assert!(err.to_string().contains("document 1"));
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        assert!(parse_documents(r#"{"docs": []}"#).is_err());
        assert!(parse_documents("not json").is_err());
    }
}
