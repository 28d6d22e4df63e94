//! Error taxonomy for retrieval and generation.
//!
//! Provider and generation errors never reach a caller directly: while
//! topping up, the orchestrator turns provider failures into empty fallback
//! sets, and the generation pipeline turns completion failures into inline
//! payloads. A provider failure after an index failure surfaces inside
//! [`RetrievalError::Exhausted`].
//! Only [`RetrievalError`] is user-visible.

use thiserror::Error;

/// Embedding index failure.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("storage unavailable: {0}")]
    Storage(String),

    #[error("collection query failed: {0}")]
    Query(String),
}

/// External search failure for one tier, or for the whole provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("web search is disabled")]
    Disabled,

    #[error("{tier} request failed: {message}")]
    Transport { tier: &'static str, message: String },

    #[error("{tier} returned unreadable data: {message}")]
    Parse { tier: &'static str, message: String },

    /// Every tier of a cascade failed; errors are in tier order.
    #[error("all web search tiers failed: {}", join_errors(.0))]
    AllTiersFailed(Vec<ProviderError>),
}

fn join_errors(errors: &[ProviderError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Completion provider failure.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("completion provider is disabled")]
    Disabled,

    #[error("completion request failed: {0}")]
    Request(String),

    #[error("completion stream interrupted: {0}")]
    Stream(String),

    #[error("completion response malformed: {0}")]
    Malformed(String),
}

/// Failure of an orchestrated search.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("vector search failed: {0}")]
    Index(#[from] IndexError),

    #[error("both vector search and web search failed: {index}, {web}")]
    Exhausted { index: IndexError, web: ProviderError },
}

/// Missing or invalid deployment settings detected at startup.
#[derive(Debug, Error)]
#[error("missing required environment variables: {}", missing.join(", "))]
pub struct ConfigurationError {
    pub missing: Vec<String>,
}
