//! # RAG Retrieval
//!
//! Grounded retrieval service: embedding-index search with a tiered web
//! fallback, and answer generation streamed over server-sent events.
//!
//! The retrieval and generation logic lives in `rag-retrieval-core`; this
//! crate supplies the concrete backends and the CLI and HTTP surfaces.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Embedding  │──▶│  Retriever   │◀──│ DuckDuck │
//! │ index (SQL) │   │ + fallback   │   │ Go tiers │
//! └─────────────┘   └──────┬───────┘   └──────────┘
//!                          ▼
//!                   ┌──────────────┐   ┌──────────┐
//!                   │ ChatPipeline │──▶│  Azure   │
//!                   └──────┬───────┘   │  OpenAI  │
//!                  ┌───────┴──────┐    └──────────┘
//!                  ▼              ▼
//!             ┌──────────┐  ┌──────────┐
//!             │   CLI    │  │ HTTP/SSE │
//!             │  (ragr)  │  │  (axum)  │
//!             └──────────┘  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragr init                          # create database
//! ragr ingest data/healthcare_documents.json
//! ragr search "diabetes treatment"
//! ragr chat "how is hypertension managed?" --stream
//! ragr serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and credential checks |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | SQLite vector store |
//! | [`embedding`] | Embedding providers |
//! | [`web_search`] | DuckDuckGo search tiers |
//! | [`completion`] | Azure OpenAI / OpenAI chat completions |
//! | [`services`] | Startup service graph |
//! | [`ingest`] | JSON document ingestion and seeding |
//! | [`search`] | `search` command |
//! | [`chat`] | `chat` command |
//! | [`stats`] | `status` command |
//! | [`server`] | HTTP API |

pub mod chat;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod migrate;
pub mod search;
pub mod server;
pub mod services;
pub mod stats;
pub mod store;
pub mod web_search;
