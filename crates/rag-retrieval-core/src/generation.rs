//! Grounded generation: retrieval, prompt, completion, event framing.
//!
//! [`ChatPipeline`] runs one conversational turn strictly in sequence:
//! orchestrated search, prompt construction, then a completion call.
//!
//! # Streaming
//!
//! [`ChatPipeline::stream`] yields typed [`StreamEvent`]s following
//!
//! ```text
//! Init ─metadata─▶ MetadataSent ─start─▶ Started ─content*─▶ Started ─complete─▶ Finished
//!   └──────────────────┴──────────────────────┴──────error──────────────────────▶ Finished
//! ```
//!
//! [`StreamPhase::admit`] enforces the table, so the last event of every
//! stream is exactly one `complete` or `error`. The stream is pull-based:
//! dropping it (client disconnect) drops the in-flight completion stream
//! and its HTTP body with it.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GenerationError, RetrievalError};
use crate::models::{ChatMessage, ContextDocument};
use crate::prompt::{build_messages, extract_image_refs, PromptMessage, HISTORY_TURNS};
use crate::search::Retriever;

/// Incremental tokens from a completion provider.
pub type TokenStream = BoxStream<'static, Result<String, GenerationError>>;

/// A chat-completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Deployment or model name, for logs and diagnostics.
    fn model(&self) -> &str;

    /// Single blocking completion.
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, GenerationError>;

    /// Open a token stream. Errors after opening arrive as stream items.
    async fn stream(&self, messages: &[PromptMessage]) -> Result<TokenStream, GenerationError>;
}

/// Used when no completion backend is configured.
pub struct DisabledCompletion;

#[async_trait]
impl CompletionProvider for DisabledCompletion {
    fn model(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[PromptMessage]) -> Result<String, GenerationError> {
        Err(GenerationError::Disabled)
    }

    async fn stream(&self, _messages: &[PromptMessage]) -> Result<TokenStream, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

// ── Wire types ──

fn default_use_web_fallback() -> bool {
    true
}

/// One chat turn as received from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
    #[serde(default = "default_use_web_fallback")]
    pub use_web_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            chat_history: Vec::new(),
            use_web_fallback: true,
            images: None,
        }
    }
}

/// Result of a non-streaming chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub query: String,
    pub response: String,
    pub context_documents: Vec<ContextDocument>,
    pub used_web_fallback: bool,
    pub images: Vec<String>,
    pub total_context_found: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub context_documents_count: usize,
    pub used_web_fallback: bool,
    pub total_found: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamComplete {
    pub context_documents: Vec<ContextDocument>,
    pub used_web_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFailure {
    pub error: String,
}

/// A typed chat stream event. Serializes as `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamEvent {
    Metadata(StreamMetadata),
    Start(String),
    Content(String),
    Complete(StreamComplete),
    Error(StreamFailure),
}

pub const START_MESSAGE: &str = "Generating response...";

impl StreamEvent {
    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error(StreamFailure {
            error: message.into(),
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete(_) | StreamEvent::Error(_))
    }
}

/// Position in the streaming state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Init,
    MetadataSent,
    Started,
    Finished,
}

impl StreamPhase {
    /// Advance on `event`, returning it if the transition is legal.
    ///
    /// Illegal events (including anything after a terminal event) are
    /// dropped and the phase is unchanged.
    pub fn admit(&mut self, event: StreamEvent) -> Option<StreamEvent> {
        use StreamPhase::*;
        let next = match (*self, &event) {
            (Finished, _) => None,
            (_, StreamEvent::Error(_)) => Some(Finished),
            (Init, StreamEvent::Metadata(_)) => Some(MetadataSent),
            (MetadataSent, StreamEvent::Start(_)) => Some(Started),
            (Started, StreamEvent::Content(_)) => Some(Started),
            (Started, StreamEvent::Complete(_)) => Some(Finished),
            _ => None,
        };
        match next {
            Some(phase) => {
                *self = phase;
                Some(event)
            }
            None => {
                debug!(phase = ?self, "dropping out-of-order stream event");
                None
            }
        }
    }
}

/// Retrieval parameters for chat turns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatSettings {
    pub search_limit: usize,
    pub search_threshold: f64,
    pub history_turns: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            search_limit: 5,
            search_threshold: 0.6,
            history_turns: HISTORY_TURNS,
        }
    }
}

/// Retrieval plus completion for chat turns.
pub struct ChatPipeline {
    retriever: Arc<Retriever>,
    completion: Arc<dyn CompletionProvider>,
    settings: ChatSettings,
}

impl ChatPipeline {
    pub fn new(
        retriever: Arc<Retriever>,
        completion: Arc<dyn CompletionProvider>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            retriever,
            completion,
            settings,
        }
    }

    pub fn completion(&self) -> &dyn CompletionProvider {
        self.completion.as_ref()
    }

    async fn retrieve(
        &self,
        request: &ChatRequest,
    ) -> Result<(Vec<ContextDocument>, bool, usize), RetrievalError> {
        let response = self
            .retriever
            .search(
                &request.query,
                self.settings.search_limit,
                self.settings.search_threshold,
                request.use_web_fallback,
            )
            .await?;
        let context = response.results.iter().map(ContextDocument::from).collect();
        Ok((context, response.used_web_fallback, response.total_found))
    }

    fn messages(&self, request: &ChatRequest, context: &[ContextDocument]) -> Vec<PromptMessage> {
        build_messages(
            &request.query,
            context,
            &request.chat_history,
            request.images.as_deref().unwrap_or_default(),
            self.settings.history_turns,
        )
    }

    /// Non-streaming turn.
    ///
    /// Retrieval failures propagate. Completion failures are absorbed into
    /// the response text.
    pub async fn answer(&self, request: &ChatRequest) -> Result<ChatAnswer, RetrievalError> {
        let (context, used_web_fallback, _) = self.retrieve(request).await?;
        let messages = self.messages(request, &context);

        let response = match self.completion.complete(&messages).await {
            Ok(text) => text,
            Err(e) => {
                warn!(model = self.completion.model(), error = %e, "completion failed");
                format!("Error generating response: {}", e)
            }
        };
        let images = extract_image_refs(&response);

        Ok(ChatAnswer {
            query: request.query.clone(),
            response,
            total_context_found: context.len(),
            context_documents: context,
            used_web_fallback,
            images,
        })
    }

    /// Streaming turn. Never fails: every failure becomes a terminal
    /// `error` event.
    pub fn stream(self: Arc<Self>, request: ChatRequest) -> BoxStream<'static, StreamEvent> {
        let events = async_stream::stream! {
            let mut phase = StreamPhase::Init;

            let (context, used_web_fallback, total_found) = match self.retrieve(&request).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = %e, "chat retrieval failed");
                    if let Some(ev) = phase.admit(StreamEvent::error(e.to_string())) {
                        yield ev;
                    }
                    return;
                }
            };

            let metadata = StreamEvent::Metadata(StreamMetadata {
                context_documents_count: context.len(),
                used_web_fallback,
                total_found,
            });
            if let Some(ev) = phase.admit(metadata) {
                yield ev;
            }
            if let Some(ev) = phase.admit(StreamEvent::Start(START_MESSAGE.to_string())) {
                yield ev;
            }

            let messages = self.messages(&request, &context);
            let mut tokens = match self.completion.stream(&messages).await {
                Ok(tokens) => tokens,
                Err(e) => {
                    warn!(model = self.completion.model(), error = %e, "completion stream failed to open");
                    if let Some(ev) = phase.admit(StreamEvent::error(e.to_string())) {
                        yield ev;
                    }
                    return;
                }
            };

            let mut emitted = 0usize;
            while let Some(item) = tokens.next().await {
                match item {
                    Ok(token) if token.is_empty() => {}
                    Ok(token) => {
                        emitted += 1;
                        if let Some(ev) = phase.admit(StreamEvent::Content(token)) {
                            yield ev;
                        }
                    }
                    Err(e) => {
                        warn!(model = self.completion.model(), error = %e, emitted, "completion stream interrupted");
                        if let Some(ev) = phase.admit(StreamEvent::error(e.to_string())) {
                            yield ev;
                        }
                        return;
                    }
                }
            }

            debug!(emitted, "completion stream finished");
            let complete = StreamEvent::Complete(StreamComplete {
                context_documents: context,
                used_web_fallback,
            });
            if let Some(ev) = phase.admit(complete) {
                yield ev;
            }
        };
        Box::pin(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedder;
    use crate::error::{IndexError, ProviderError};
    use crate::index::EmbeddingIndex;
    use crate::models::{NewDocument, WebResult};
    use crate::prompt::MessageContent;
    use crate::store::memory::InMemoryStore;
    use crate::web::WebSearchProvider;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct UnitEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl Embedder for UnitEmbedder {
        fn model_name(&self) -> &str {
            "unit"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
            if self.fail {
                return Err(IndexError::Embedding("model not loaded".to_string()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct StaticWeb {
        fail: bool,
    }

    #[async_trait]
    impl WebSearchProvider for StaticWeb {
        async fn search(&self, _q: &str, k: usize) -> Result<Vec<WebResult>, ProviderError> {
            if self.fail {
                return Err(ProviderError::Transport {
                    tier: "instant answer",
                    message: "unreachable".to_string(),
                });
            }
            Ok((0..k.min(1))
                .map(|_| WebResult {
                    title: "Web".into(),
                    content: "web text".into(),
                    url: "https://example.org".into(),
                    source: "DuckDuckGo Instant Answer".into(),
                })
                .collect())
        }
    }

    /// Scripted completion: plays back tokens, optionally failing midway.
    struct Scripted {
        tokens: Vec<Result<&'static str, &'static str>>,
        open_fails: bool,
        seen: Mutex<Vec<Vec<PromptMessage>>>,
    }

    impl Scripted {
        fn new(tokens: Vec<Result<&'static str, &'static str>>) -> Arc<Self> {
            Arc::new(Self {
                tokens,
                open_fails: false,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for Scripted {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, messages: &[PromptMessage]) -> Result<String, GenerationError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            if self.open_fails {
                return Err(GenerationError::Request("401 unauthorized".into()));
            }
            let mut out = String::new();
            for t in &self.tokens {
                match t {
                    Ok(s) => out.push_str(s),
                    Err(e) => return Err(GenerationError::Stream(e.to_string())),
                }
            }
            Ok(out)
        }

        async fn stream(&self, messages: &[PromptMessage]) -> Result<TokenStream, GenerationError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            if self.open_fails {
                return Err(GenerationError::Request("401 unauthorized".into()));
            }
            let items: Vec<Result<String, GenerationError>> = self
                .tokens
                .iter()
                .map(|t| match t {
                    Ok(s) => Ok(s.to_string()),
                    Err(e) => Err(GenerationError::Stream(e.to_string())),
                })
                .collect();
            Ok(futures::stream::iter(items).boxed())
        }
    }

    /// Sets its flag when dropped.
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Emits one token, then never finishes. The token stream owns a [`DropFlag`].
    struct Endless {
        dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl CompletionProvider for Endless {
        fn model(&self) -> &str {
            "endless"
        }

        async fn complete(&self, _messages: &[PromptMessage]) -> Result<String, GenerationError> {
            Ok(String::new())
        }

        async fn stream(&self, _messages: &[PromptMessage]) -> Result<TokenStream, GenerationError> {
            let guard = DropFlag(self.dropped.clone());
            let tokens = async_stream::stream! {
                let _guard = guard;
                yield Ok::<_, GenerationError>("Diabetes ".to_string());
                futures::future::pending::<()>().await;
            };
            Ok(Box::pin(tokens))
        }
    }

    async fn pipeline(
        index_fails: bool,
        web_fails: bool,
        completion: Arc<dyn CompletionProvider>,
    ) -> Arc<ChatPipeline> {
        let index = EmbeddingIndex::new(
            Arc::new(UnitEmbedder { fail: index_fails }),
            Arc::new(InMemoryStore::new()),
            "healthcare_docs",
        );
        if !index_fails {
            let mut metadata = serde_json::Map::new();
            metadata.insert("title".into(), "Diabetes Overview".into());
            index
                .add(
                    &[NewDocument {
                        content: "Diabetes is a chronic condition.".into(),
                        metadata,
                    }],
                    None,
                )
                .await
                .unwrap();
        }
        let retriever = Retriever::new(Arc::new(index), Arc::new(StaticWeb { fail: web_fails }));
        Arc::new(ChatPipeline::new(
            Arc::new(retriever),
            completion,
            ChatSettings::default(),
        ))
    }

    fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                StreamEvent::Metadata(_) => "metadata",
                StreamEvent::Start(_) => "start",
                StreamEvent::Content(_) => "content",
                StreamEvent::Complete(_) => "complete",
                StreamEvent::Error(_) => "error",
            })
            .collect()
    }

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(StreamEvent::Content("Hel".into())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "content", "data": "Hel"}));

        let json = serde_json::to_value(StreamEvent::Metadata(StreamMetadata {
            context_documents_count: 2,
            used_web_fallback: true,
            total_found: 2,
        }))
        .unwrap();
        assert_eq!(json["type"], "metadata");
        assert_eq!(json["data"]["context_documents_count"], 2);

        let json = serde_json::to_value(StreamEvent::error("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "error", "data": {"error": "boom"}}));
    }

    #[test]
    fn test_phase_rejects_events_after_terminal() {
        let mut phase = StreamPhase::Init;
        assert!(phase.admit(StreamEvent::Content("early".into())).is_none());
        assert_eq!(phase, StreamPhase::Init);

        assert!(phase
            .admit(StreamEvent::Metadata(StreamMetadata {
                context_documents_count: 0,
                used_web_fallback: false,
                total_found: 0,
            }))
            .is_some());
        assert!(phase.admit(StreamEvent::Start(START_MESSAGE.into())).is_some());
        assert!(phase.admit(StreamEvent::error("x")).is_some());
        assert_eq!(phase, StreamPhase::Finished);
        assert!(phase.admit(StreamEvent::Content("late".into())).is_none());
        assert!(phase.admit(StreamEvent::error("again")).is_none());
    }

    #[tokio::test]
    async fn test_stream_happy_path() {
        let completion = Scripted::new(vec![Ok("Diabetes "), Ok(""), Ok("is chronic.")]);
        let p = pipeline(false, false, completion.clone()).await;

        let events: Vec<StreamEvent> = p.stream(ChatRequest::new("diabetes")).collect().await;
        assert_eq!(
            kinds(&events),
            vec!["metadata", "start", "content", "content", "complete"]
        );
        match &events[0] {
            StreamEvent::Metadata(m) => {
                assert_eq!(m.context_documents_count, 2);
                assert!(m.used_web_fallback);
            }
            other => panic!("unexpected {:?}", other),
        }
        match events.last().unwrap() {
            StreamEvent::Complete(c) => assert_eq!(c.context_documents.len(), 2),
            other => panic!("unexpected {:?}", other),
        }

        let seen = completion.seen.lock().unwrap();
        let MessageContent::Text(system) = &seen[0][0].content else {
            panic!("system prompt should be text");
        };
        assert!(system.contains("--- Document 1: Diabetes Overview ---"));
        assert!(system.contains("--- Document 2: Web ---"));
    }

    #[tokio::test]
    async fn test_stream_midway_failure_ends_with_error() {
        let completion = Scripted::new(vec![Ok("Partial"), Err("connection reset"), Ok("never")]);
        let p = pipeline(false, false, completion).await;

        let events: Vec<StreamEvent> = p.stream(ChatRequest::new("diabetes")).collect().await;
        assert_eq!(kinds(&events), vec!["metadata", "start", "content", "error"]);
        match events.last().unwrap() {
            StreamEvent::Error(f) => assert!(f.error.contains("connection reset")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_open_failure_is_error_event() {
        let completion = Arc::new(Scripted {
            tokens: Vec::new(),
            open_fails: true,
            seen: Mutex::new(Vec::new()),
        });
        let p = pipeline(false, false, completion).await;

        let events: Vec<StreamEvent> = p.stream(ChatRequest::new("diabetes")).collect().await;
        assert_eq!(kinds(&events), vec!["metadata", "start", "error"]);
    }

    #[tokio::test]
    async fn test_stream_retrieval_exhaustion_is_single_error() {
        let p = pipeline(true, true, Scripted::new(vec![Ok("x")])).await;

        let events: Vec<StreamEvent> = p.stream(ChatRequest::new("diabetes")).collect().await;
        assert_eq!(kinds(&events), vec!["error"]);
        match &events[0] {
            StreamEvent::Error(f) => {
                assert!(f.error.contains("model not loaded"));
                assert!(f.error.contains("unreachable"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_completion() {
        let dropped = Arc::new(AtomicBool::new(false));
        let p = pipeline(
            false,
            false,
            Arc::new(Endless {
                dropped: dropped.clone(),
            }),
        )
        .await;

        let mut events = p.stream(ChatRequest::new("diabetes"));
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(events.next().await.unwrap());
        }
        assert_eq!(kinds(&seen), vec!["metadata", "start", "content"]);

        // The completion is still open and has nothing more to say.
        assert!(events.next().now_or_never().is_none());
        assert!(!dropped.load(Ordering::SeqCst));

        drop(events);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_answer_extracts_images() {
        let completion = Scripted::new(vec![Ok("See ![rash](https://x.org/rash.png).")]);
        let p = pipeline(false, false, completion).await;

        let mut request = ChatRequest::new("diabetes");
        request.use_web_fallback = false;
        let answer = p.answer(&request).await.unwrap();
        assert_eq!(answer.total_context_found, 1);
        assert!(!answer.used_web_fallback);
        assert_eq!(answer.images, vec!["https://x.org/rash.png"]);
    }

    #[tokio::test]
    async fn test_answer_absorbs_completion_failure() {
        let completion = Arc::new(Scripted {
            tokens: Vec::new(),
            open_fails: true,
            seen: Mutex::new(Vec::new()),
        });
        let p = pipeline(false, false, completion).await;

        let answer = p.answer(&ChatRequest::new("diabetes")).await.unwrap();
        assert!(answer.response.starts_with("Error generating response:"));
        assert!(answer.images.is_empty());
    }

    #[tokio::test]
    async fn test_answer_propagates_retrieval_failure() {
        let p = pipeline(true, true, Scripted::new(vec![Ok("x")])).await;
        let mut request = ChatRequest::new("diabetes");
        request.use_web_fallback = false;
        assert!(matches!(
            p.answer(&request).await,
            Err(RetrievalError::Index(_))
        ));
    }

    #[test]
    fn test_chat_request_defaults() {
        let req: ChatRequest = serde_json::from_str(r#"{"query":"flu"}"#).unwrap();
        assert!(req.use_web_fallback);
        assert!(req.chat_history.is_empty());
        assert!(req.images.is_none());
    }
}
