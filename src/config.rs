use anyhow::{Context, Result};
use rag_retrieval_core::error::ConfigurationError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_collection")]
    pub collection: String,
    /// JSON seed documents ingested by `serve` when the collection is empty.
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            seed_file: None,
        }
    }
}

fn default_collection() -> String {
    "healthcare_docs".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub search_limit: usize,
    #[serde(default = "default_search_threshold")]
    pub search_threshold: f64,
    #[serde(default = "default_limit")]
    pub chat_limit: usize,
    #[serde(default = "default_chat_threshold")]
    pub chat_threshold: f64,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_limit: default_limit(),
            search_threshold: default_search_threshold(),
            chat_limit: default_limit(),
            chat_threshold: default_chat_threshold(),
            history_turns: default_history_turns(),
        }
    }
}

fn default_limit() -> usize {
    5
}
fn default_search_threshold() -> f64 {
    0.7
}
fn default_chat_threshold() -> f64 {
    0.6
}
fn default_history_turns() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebSearchConfig {
    #[serde(default = "default_web_provider")]
    pub provider: String,
    #[serde(default = "default_instant_answer_url")]
    pub instant_answer_url: String,
    #[serde(default = "default_html_search_url")]
    pub html_search_url: String,
    #[serde(default = "default_relevance_terms")]
    pub relevance_terms: Vec<String>,
    /// Appended to the query for the scraped tier.
    #[serde(default = "default_query_suffix")]
    pub query_suffix: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_web_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            provider: default_web_provider(),
            instant_answer_url: default_instant_answer_url(),
            html_search_url: default_html_search_url(),
            relevance_terms: default_relevance_terms(),
            query_suffix: default_query_suffix(),
            user_agent: default_user_agent(),
            timeout_secs: default_web_timeout_secs(),
        }
    }
}

fn default_web_provider() -> String {
    "duckduckgo".to_string()
}
fn default_instant_answer_url() -> String {
    "https://api.duckduckgo.com/".to_string()
}
fn default_html_search_url() -> String {
    "https://html.duckduckgo.com/html/".to_string()
}
fn default_relevance_terms() -> Vec<String> {
    ["health", "medical", "medicine", "healthcare", "clinical"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_query_suffix() -> String {
    "healthcare medical".to_string()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()
}
fn default_web_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_provider")]
    pub provider: String,
    /// Overrides `AZURE_OPENAI_ENDPOINT` (azure) or the OpenAI base URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_deployment")]
    pub deployment: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            endpoint: None,
            deployment: default_deployment(),
            api_version: default_api_version(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

fn default_completion_provider() -> String {
    "azure".to_string()
}
fn default_deployment() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_version() -> String {
    "2024-04-01-preview".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_completion_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.index.collection.trim().is_empty() {
        anyhow::bail!("index.collection must not be empty");
    }

    // Validate retrieval
    if config.retrieval.search_limit < 1 || config.retrieval.chat_limit < 1 {
        anyhow::bail!("retrieval.search_limit and retrieval.chat_limit must be >= 1");
    }
    for (name, value) in [
        ("search_threshold", config.retrieval.search_threshold),
        ("chat_threshold", config.retrieval.chat_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("retrieval.{} must be in [0.0, 1.0]", name);
        }
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        "disabled" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    match config.web_search.provider.as_str() {
        "duckduckgo" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown web_search provider: '{}'. Must be duckduckgo or disabled.",
            other
        ),
    }

    match config.completion.provider.as_str() {
        "azure" | "openai" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be azure, openai, or disabled.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.completion.temperature) {
        anyhow::bail!("completion.temperature must be in [0.0, 2.0]");
    }

    Ok(config)
}

/// Environment variables the configured providers need at runtime.
pub fn required_env_vars(config: &Config) -> Vec<&'static str> {
    let mut vars = Vec::new();
    match config.completion.provider.as_str() {
        "azure" => {
            vars.push("AZURE_OPENAI_API_KEY");
            if config.completion.endpoint.is_none() {
                vars.push("AZURE_OPENAI_ENDPOINT");
            }
        }
        "openai" => vars.push("OPENAI_API_KEY"),
        _ => {}
    }
    if config.embedding.provider == "openai" && !vars.contains(&"OPENAI_API_KEY") {
        vars.push("OPENAI_API_KEY");
    }
    vars
}

/// Fail with every missing credential named, before anything is served.
pub fn check_credentials(config: &Config) -> std::result::Result<(), ConfigurationError> {
    check_credentials_with(config, |name| std::env::var(name).ok())
}

pub fn check_credentials_with<F>(
    config: &Config,
    lookup: F,
) -> std::result::Result<(), ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    let missing: Vec<String> = required_env_vars(config)
        .into_iter()
        .filter(|name| lookup(name).map_or(true, |v| v.trim().is_empty()))
        .map(str::to_string)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigurationError { missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/rag.sqlite"

[server]
bind = "127.0.0.1:8000"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.index.collection, "healthcare_docs");
        assert_eq!(config.retrieval.search_limit, 5);
        assert!((config.retrieval.search_threshold - 0.7).abs() < 1e-12);
        assert!((config.retrieval.chat_threshold - 0.6).abs() < 1e-12);
        assert_eq!(config.retrieval.history_turns, 10);
        assert_eq!(config.completion.deployment, "gpt-4o-mini");
        assert_eq!(config.completion.api_version, "2024-04-01-preview");
        assert_eq!(config.completion.max_tokens, 1000);
        assert_eq!(config.web_search.relevance_terms.len(), 5);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let toml = format!("{}\n[retrieval]\nsearch_threshold = 1.5\n", MINIMAL);
        let err = parse_config(&toml).unwrap_err();
        assert!(err.to_string().contains("search_threshold"));
    }

    #[test]
    fn test_rejects_unknown_providers() {
        let toml = format!("{}\n[web_search]\nprovider = \"bing\"\n", MINIMAL);
        assert!(parse_config(&toml).is_err());

        let toml = format!("{}\n[embedding]\nprovider = \"openai\"\n", MINIMAL);
        let err = parse_config(&toml).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_missing_azure_credentials_named() {
        let config = parse_config(MINIMAL).unwrap();
        let err = check_credentials_with(&config, |_| None).unwrap_err();
        assert_eq!(
            err.missing,
            vec!["AZURE_OPENAI_API_KEY", "AZURE_OPENAI_ENDPOINT"]
        );

        let ok = check_credentials_with(&config, |name| Some(format!("{}-value", name)));
        assert!(ok.is_ok());
    }

    #[test]
    fn test_endpoint_in_file_satisfies_env() {
        let toml = format!(
            "{}\n[completion]\nendpoint = \"https://example.openai.azure.com\"\n",
            MINIMAL
        );
        let config = parse_config(&toml).unwrap();
        let err = check_credentials_with(&config, |_| None).unwrap_err();
        assert_eq!(err.missing, vec!["AZURE_OPENAI_API_KEY"]);
    }

    #[test]
    fn test_disabled_completion_needs_nothing() {
        let toml = format!("{}\n[completion]\nprovider = \"disabled\"\n", MINIMAL);
        let config = parse_config(&toml).unwrap();
        assert!(check_credentials_with(&config, |_| None).is_ok());
    }
}
