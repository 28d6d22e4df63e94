//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service banner |
//! | `GET`  | `/api/health` | Health check (returns version) |
//! | `POST` | `/api/search` | Orchestrated search with web fallback |
//! | `GET`  | `/api/search/suggestions` | Example queries |
//! | `GET`  | `/api/search/analytics?query=` | Timing and score metrics for a query |
//! | `POST` | `/api/ingest` | Embed and store documents |
//! | `GET`  | `/api/ingest/status` | Collection status |
//! | `POST` | `/api/chat` | Grounded answer in one response |
//! | `POST` | `/api/chat/stream` | Grounded answer as server-sent events |
//! | `GET`  | `/api/chat/test` | Completion provider probe |
//! | `GET`  | `/api/chat/health` | Chat feature listing |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `search_failed` (500),
//! `ingest_failed` (500), `chat_failed` (500).
//!
//! # Streaming
//!
//! `/api/chat/stream` emits one `data: <json>` frame per event, each shaped
//! `{"type": ..., "data": ...}` with `type` one of `metadata`, `start`,
//! `content`, `complete`, `error`. `complete` or `error` is always the last
//! frame. Closing the connection cancels the in-flight completion.

use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use rag_retrieval_core::generation::{ChatAnswer, ChatRequest};
use rag_retrieval_core::models::{CollectionStatus, NewDocument, SearchResponse};
use rag_retrieval_core::search::{SearchAnalytics, SearchRequest};

use crate::completion::{self, ConnectionReport};
use crate::config::{check_credentials, Config};
use crate::ingest::seed_if_empty;
use crate::services::Services;

pub const SEARCH_SUGGESTIONS: [&str; 8] = [
    "diabetes treatment guidelines",
    "hypertension management",
    "COVID-19 symptoms",
    "heart disease prevention",
    "mental health resources",
    "pediatric care protocols",
    "emergency medicine procedures",
    "pharmaceutical interactions",
];

const CHAT_FEATURES: [&str; 3] = ["streaming", "rag_integration", "web_fallback"];

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    services: Arc<Services>,
}

impl AppState {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

/// Check credentials, seed the default collection if configured, and serve
/// until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    check_credentials(config)?;

    let services = Services::from_config(config).await?;
    let seeded = seed_if_empty(&services.index, config).await?;
    if seeded > 0 {
        println!("Seeded {} documents", seeded);
    }

    let app = build_router(AppState::new(Arc::new(services)), &config.server.cors_origins);

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "server listening");
    println!("RAG retrieval server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router. An empty `cors_origins` list (or one containing `*`)
/// allows every origin.
pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/api/health", get(handle_health))
        .route("/api/search", post(handle_search))
        .route("/api/search/suggestions", get(handle_suggestions))
        .route("/api/search/analytics", get(handle_analytics))
        .route("/api/ingest", post(handle_ingest))
        .route("/api/ingest/status", get(handle_ingest_status))
        .route("/api/chat", post(handle_chat))
        .route("/api/chat/stream", post(handle_chat_stream))
        .route("/api/chat/test", get(handle_chat_test))
        .route("/api/chat/health", get(handle_chat_health))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(code: &'static str, message: impl Into<String>) -> AppError {
    let message = message.into();
    warn!(code, %message, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code,
        message,
    }
}

fn require_query(query: &str) -> Result<(), AppError> {
    if query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    Ok(())
}

/// Each image is base64, optionally as a data URL (`data:image/png;base64,...`).
fn validate_images(images: Option<&[String]>) -> Result<(), AppError> {
    for (i, image) in images.unwrap_or_default().iter().enumerate() {
        let payload = image.rsplit(',').next().unwrap_or(image);
        if base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .is_err()
        {
            return Err(bad_request(format!("images[{}] is not valid base64", i)));
        }
    }
    Ok(())
}

// ============ Service info ============

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
    version: &'static str,
}

async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "RAG Retrieval System API",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ Search ============

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    require_query(&req.query)?;
    if req.limit == 0 {
        return Err(bad_request("limit must be >= 1"));
    }
    if !(0.0..=1.0).contains(&req.threshold) {
        return Err(bad_request("threshold must be in [0.0, 1.0]"));
    }

    let response = state
        .services
        .retriever
        .run(&req)
        .await
        .map_err(|e| internal("search_failed", format!("Search failed: {}", e)))?;
    Ok(Json(response))
}

#[derive(Serialize)]
struct SuggestionsResponse {
    suggestions: Vec<&'static str>,
}

async fn handle_suggestions() -> Json<SuggestionsResponse> {
    Json(SuggestionsResponse {
        suggestions: SEARCH_SUGGESTIONS.to_vec(),
    })
}

#[derive(Deserialize)]
struct AnalyticsParams {
    query: String,
}

async fn handle_analytics(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsParams>,
) -> Result<Json<SearchAnalytics>, AppError> {
    require_query(&params.query)?;
    Ok(Json(
        state.services.retriever.search_analytics(&params.query).await,
    ))
}

// ============ Ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    documents: Vec<NewDocument>,
    #[serde(default)]
    collection_name: Option<String>,
}

#[derive(Serialize)]
struct IngestResponse {
    success: bool,
    message: String,
    documents_ingested: usize,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    if req.documents.iter().any(|d| d.content.trim().is_empty()) {
        return Err(bad_request("document content must not be empty"));
    }

    let count = state
        .services
        .index
        .add(&req.documents, req.collection_name.as_deref())
        .await
        .map_err(|e| internal("ingest_failed", format!("Ingestion failed: {}", e)))?;

    Ok(Json(IngestResponse {
        success: true,
        message: format!("Successfully ingested {} documents", count),
        documents_ingested: count,
    }))
}

async fn handle_ingest_status(State(state): State<AppState>) -> Json<CollectionStatus> {
    Json(state.services.index.status().await)
}

// ============ Chat ============

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatAnswer>, AppError> {
    require_query(&req.query)?;
    validate_images(req.images.as_deref())?;

    let answer = state
        .services
        .chat
        .answer(&req)
        .await
        .map_err(|e| internal("chat_failed", format!("Chat failed: {}", e)))?;
    Ok(Json(answer))
}

async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    require_query(&req.query)?;
    validate_images(req.images.as_deref())?;

    let events = state
        .services
        .chat
        .clone()
        .stream(req)
        .map(|event| Event::default().json_data(event));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn handle_chat_test(State(state): State<AppState>) -> Json<ConnectionReport> {
    let services = &state.services;
    Json(completion::test_connection(services.chat.completion(), &services.completion_endpoint).await)
}

#[derive(Serialize)]
struct ChatHealthResponse {
    status: &'static str,
    service: &'static str,
    features: Vec<&'static str>,
}

async fn handle_chat_health() -> Json<ChatHealthResponse> {
    Json(ChatHealthResponse {
        status: "healthy",
        service: "chat",
        features: CHAT_FEATURES.to_vec(),
    })
}
