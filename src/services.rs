//! Service graph built once at startup.
//!
//! Every surface (CLI commands and HTTP handlers) receives a [`Services`]
//! value rather than constructing clients per request.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use rag_retrieval_core::generation::{
    ChatPipeline, ChatSettings, CompletionProvider, DisabledCompletion,
};
use rag_retrieval_core::index::EmbeddingIndex;
use rag_retrieval_core::search::Retriever;
use rag_retrieval_core::web::WebSearchProvider;

use crate::config::Config;
use crate::store::SqliteStore;
use crate::{completion, db, embedding, migrate, web_search};

pub struct Services {
    pub index: Arc<EmbeddingIndex>,
    pub retriever: Arc<Retriever>,
    pub chat: Arc<ChatPipeline>,
    /// Completion endpoint as shown by the connection probe.
    pub completion_endpoint: String,
    pub search_limit: usize,
    pub search_threshold: f64,
}

impl Services {
    /// Open the database, apply the schema and construct every provider
    /// named in `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool)
            .await
            .context("Failed to apply database schema")?;

        let embedder = embedding::create_provider(&config.embedding)?;
        let index = Arc::new(EmbeddingIndex::new(
            embedder,
            Arc::new(SqliteStore::new(pool)),
            config.index.collection.clone(),
        ));
        let web = web_search::create_provider(&config.web_search)?;
        // `serve` checks credentials up front; other commands run without them.
        let completion: Arc<dyn CompletionProvider> =
            completion::create_provider(&config.completion).unwrap_or_else(|e| {
                warn!(error = %e, "completion provider unavailable, generation disabled");
                Arc::new(DisabledCompletion)
            });

        info!(
            collection = %config.index.collection,
            embedding = %config.embedding.provider,
            web_search = %config.web_search.provider,
            completion = %config.completion.provider,
            "services ready"
        );

        let mut services = Self::from_parts(config, index, web, completion);
        services.completion_endpoint = completion::display_endpoint(&config.completion);
        Ok(services)
    }

    /// Assemble services from already-built providers.
    pub fn from_parts(
        config: &Config,
        index: Arc<EmbeddingIndex>,
        web: Arc<dyn WebSearchProvider>,
        completion: Arc<dyn CompletionProvider>,
    ) -> Self {
        let retriever = Arc::new(Retriever::new(index.clone(), web));
        let settings = ChatSettings {
            search_limit: config.retrieval.chat_limit,
            search_threshold: config.retrieval.chat_threshold,
            history_turns: config.retrieval.history_turns,
        };
        let chat = Arc::new(ChatPipeline::new(retriever.clone(), completion, settings));

        Self {
            index,
            retriever,
            chat,
            completion_endpoint: String::new(),
            search_limit: config.retrieval.search_limit,
            search_threshold: config.retrieval.search_threshold,
        }
    }
}
