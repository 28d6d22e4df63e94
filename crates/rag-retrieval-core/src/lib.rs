//! # RAG Retrieval Core
//!
//! Transport-free retrieval logic for RAG Retrieval: data models, the
//! embedding index, the web fallback cascade, the retrieval orchestrator,
//! and the grounded generation pipeline.
//!
//! Everything I/O-bound sits behind a trait so the app crate can plug in
//! concrete backends:
//!
//! | Seam | Trait | App implementations |
//! |------|-------|---------------------|
//! | Vector persistence | [`store::Store`] | SQLite, in-memory |
//! | Embeddings | [`embedding::Embedder`] | OpenAI, Ollama, fastembed |
//! | Web search | [`web::WebSearchProvider`] / [`web::SearchTier`] | DuckDuckGo instant answer + HTML |
//! | Completion | [`generation::CompletionProvider`] | Azure OpenAI, OpenAI |
//!
//! This crate contains no tokio, sqlx, or HTTP client dependencies.

pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
pub mod prompt;
pub mod search;
pub mod store;
pub mod web;
