//! # RAG Retrieval CLI (`ragr`)
//!
//! ## Usage
//!
//! ```bash
//! ragr --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragr init` | Create the SQLite database and run schema migrations |
//! | `ragr ingest <file>` | Embed and store documents from a JSON file |
//! | `ragr search "<query>"` | Search with web fallback |
//! | `ragr chat "<query>"` | Generate a grounded answer |
//! | `ragr status` | Show collection status |
//! | `ragr serve` | Start the HTTP server |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rag_retrieval::{chat, config, ingest, migrate, search, server, stats};

/// RAG Retrieval CLI: embedding-index search with web fallback and grounded
/// answer generation.
#[derive(Parser)]
#[command(name = "ragr", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest documents from a JSON file.
    ///
    /// The file holds an array of `{content, metadata}` objects, or an
    /// object with a `documents` array.
    Ingest {
        file: PathBuf,

        /// Target collection (defaults to `[index].collection`).
        #[arg(long)]
        collection: Option<String>,
    },

    /// Search indexed documents, topping up from the web when short.
    Search {
        query: String,

        /// Maximum results (defaults to `[retrieval].search_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum similarity (defaults to `[retrieval].search_threshold`).
        #[arg(long)]
        threshold: Option<f64>,

        /// Disable the web fallback.
        #[arg(long)]
        no_web: bool,
    },

    /// Answer a question grounded in retrieved documents.
    Chat {
        query: String,

        /// Print tokens as they arrive.
        #[arg(long)]
        stream: bool,

        /// Disable the web fallback.
        #[arg(long)]
        no_web: bool,
    },

    /// Show collection status and configured providers.
    Status,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { file, collection } => {
            ingest::run_ingest(&cfg, &file, collection.as_deref()).await?;
        }
        Commands::Search {
            query,
            limit,
            threshold,
            no_web,
        } => {
            search::run_search(&cfg, &query, limit, threshold, no_web).await?;
        }
        Commands::Chat {
            query,
            stream,
            no_web,
        } => {
            chat::run_chat(&cfg, &query, stream, no_web).await?;
        }
        Commands::Status => {
            stats::run_status(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
