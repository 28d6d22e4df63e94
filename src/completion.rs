//! Chat-completion backends (Azure OpenAI and OpenAI).
//!
//! Both speak the same chat-completions wire format and differ only in URL
//! layout and auth header:
//!
//! | Provider | URL | Auth |
//! |----------|-----|------|
//! | `azure` | `{endpoint}/openai/deployments/{deployment}/chat/completions?api-version=…` | `api-key` |
//! | `openai` | `{endpoint or https://api.openai.com/v1}/chat/completions` | `Authorization: Bearer` |
//!
//! Streaming responses are server-sent events; each `data:` line carries
//! one JSON chunk and `data: [DONE]` ends the stream.

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use rag_retrieval_core::error::GenerationError;
use rag_retrieval_core::generation::{CompletionProvider, DisabledCompletion, TokenStream};
use rag_retrieval_core::prompt::{PromptMessage, PromptRole};

use crate::config::CompletionConfig;

#[derive(Debug, Clone)]
enum Auth {
    ApiKey(String),
    Bearer(String),
}

pub struct ChatCompletionClient {
    client: reqwest::Client,
    url: String,
    auth: Auth,
    /// Sent as `model` in the body (OpenAI only; Azure routes by deployment).
    model: Option<String>,
    deployment: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionClient {
    pub fn azure(config: &CompletionConfig, api_key: String, endpoint: &str) -> Result<Self> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint.trim_end_matches('/'),
            config.deployment,
            config.api_version
        );
        Self::build(config, url, Auth::ApiKey(api_key), None)
    }

    pub fn openai(config: &CompletionConfig, api_key: String) -> Result<Self> {
        let base = config
            .endpoint
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/');
        let url = format!("{}/chat/completions", base);
        Self::build(
            config,
            url,
            Auth::Bearer(api_key),
            Some(config.deployment.clone()),
        )
    }

    fn build(
        config: &CompletionConfig,
        url: String,
        auth: Auth,
        model: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url,
            auth,
            model,
            deployment: config.deployment.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn body(&self, messages: &[PromptMessage], stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if stream {
            body["stream"] = serde_json::Value::Bool(true);
        }
        if let Some(model) = &self.model {
            body["model"] = serde_json::Value::String(model.clone());
        }
        body
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response, GenerationError> {
        let req = self.client.post(&self.url).json(body);
        let req = match &self.auth {
            Auth::ApiKey(key) => req.header("api-key", key),
            Auth::Bearer(key) => req.header("Authorization", format!("Bearer {}", key)),
        };

        let response = req
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Request(format!(
                "HTTP {}: {}",
                status, body_text
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for ChatCompletionClient {
    fn model(&self) -> &str {
        &self.deployment
    }

    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, GenerationError> {
        let response = self.send(&self.body(messages, false)).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        parse_completion(&json)
    }

    async fn stream(&self, messages: &[PromptMessage]) -> Result<TokenStream, GenerationError> {
        let response = self.send(&self.body(messages, true)).await?;
        let mut bytes = response.bytes_stream();

        let tokens = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(GenerationError::Stream(e.to_string()));
                        return;
                    }
                };
                for frame in decoder.push(&chunk) {
                    match frame {
                        SseFrame::Done => return,
                        SseFrame::Data(data) => match parse_delta(&data) {
                            Ok(Some(token)) => yield Ok(token),
                            Ok(None) => {}
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        },
                    }
                }
            }
            debug!("completion stream closed without [DONE]");
        };
        Ok(Box::pin(tokens))
    }
}

/// `choices[0].message.content` from a blocking completion.
fn parse_completion(json: &serde_json::Value) -> Result<String, GenerationError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| GenerationError::Malformed("missing choices[0].message.content".into()))
}

/// `choices[0].delta.content` from one streamed chunk. Chunks without
/// content (role headers, filter results, empty choices) yield `None`.
fn parse_delta(data: &str) -> Result<Option<String>, GenerationError> {
    let json: serde_json::Value =
        serde_json::from_str(data).map_err(|e| GenerationError::Malformed(e.to_string()))?;
    if let Some(err) = json.get("error") {
        return Err(GenerationError::Stream(err.to_string()));
    }
    Ok(json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

#[derive(Debug, PartialEq)]
enum SseFrame {
    Data(String),
    Done,
}

/// Incremental `data:` line splitter. Buffers bytes so that lines (and
/// UTF-8 sequences) split across network chunks are reassembled.
#[derive(Default)]
struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                frames.push(SseFrame::Done);
            } else if !data.is_empty() {
                frames.push(SseFrame::Data(data.to_string()));
            }
        }
        frames
    }
}

/// Build the provider selected by `[completion].provider`, reading
/// credentials from the environment.
pub fn create_provider(config: &CompletionConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        "azure" => {
            let api_key = std::env::var("AZURE_OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("AZURE_OPENAI_API_KEY environment variable not set"))?;
            let endpoint = match &config.endpoint {
                Some(endpoint) => endpoint.clone(),
                None => std::env::var("AZURE_OPENAI_ENDPOINT").map_err(|_| {
                    anyhow::anyhow!("AZURE_OPENAI_ENDPOINT environment variable not set")
                })?,
            };
            Ok(Arc::new(ChatCompletionClient::azure(config, api_key, &endpoint)?))
        }
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
            Ok(Arc::new(ChatCompletionClient::openai(config, api_key)?))
        }
        other => anyhow::bail!("Unknown completion provider: {}", other),
    }
}

/// Endpoint shown in diagnostics; never includes credentials.
pub fn display_endpoint(config: &CompletionConfig) -> String {
    match config.provider.as_str() {
        "azure" => config
            .endpoint
            .clone()
            .or_else(|| std::env::var("AZURE_OPENAI_ENDPOINT").ok())
            .unwrap_or_default(),
        "openai" => config
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        _ => String::new(),
    }
}

pub const PROBE_MESSAGE: &str = "Hello, this is a test message.";

/// Result of a completion connectivity probe.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub status: &'static str,
    pub model: String,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Send a one-line prompt and report whether the provider answered.
pub async fn test_connection(provider: &dyn CompletionProvider, endpoint: &str) -> ConnectionReport {
    let messages = [PromptMessage::text(PromptRole::User, PROBE_MESSAGE)];
    match provider.complete(&messages).await {
        Ok(text) => ConnectionReport {
            status: "success",
            model: provider.model().to_string(),
            endpoint: endpoint.to_string(),
            test_response: Some(text),
            error: None,
        },
        Err(e) => ConnectionReport {
            status: "error",
            model: provider.model().to_string(),
            endpoint: endpoint.to_string(),
            test_response: None,
            error: Some(e.to_string()),
        },
    }
}
