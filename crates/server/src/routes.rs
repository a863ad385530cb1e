//! HTTP surface for the assistant.
//!
//! Endpoints:
//! - `POST /chat`        — run a query to completion, JSON answer
//! - `POST /chat/stream` — same run as server-sent events
//! - `GET  /health`      — liveness probe
//! - `GET  /info`        — service metadata (`/version` is an alias)
//! - `GET  /`            — endpoint listing

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::info;
use uuid::Uuid;

use revpilot_agent::runtime::AgentRuntime;
use revpilot_agent::state::ChatMessage;
use revpilot_core::config::{AppConfig, GraphMode};
use revpilot_core::errors::InterfaceError;

#[derive(Clone)]
pub struct ApiState {
    runtime: Arc<AgentRuntime>,
    info: Arc<ServiceInfo>,
}

impl ApiState {
    pub fn new(runtime: Arc<AgentRuntime>, config: &AppConfig) -> Self {
        Self {
            runtime,
            info: Arc::new(ServiceInfo {
                name: "revpilot".to_string(),
                description: "Revenue-planning assistant with agentic retrieval".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                model: config.llm.model.clone(),
                graph_mode: config.agent.graph_mode,
                started_at: Utc::now(),
            }),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    pub model: String,
    pub graph_mode: GraphMode,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default, alias = "conversation_history")]
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub correlation_id: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub correlation_id: String,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/info", get(service_info))
        .route("/version", get(service_info))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .with_state(state)
}

async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "revpilot",
        "message": "Revenue-planning assistant. POST a query to /chat or /chat/stream.",
        "endpoints": ["/chat", "/chat/stream", "/health", "/info"],
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "detail": "agent runtime ready",
        "checked_at": Utc::now(),
    }))
}

async fn service_info(State(state): State<ApiState>) -> Json<ServiceInfo> {
    Json(state.info.as_ref().clone())
}

async fn chat(
    State(state): State<ApiState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ApiError>)> {
    let correlation_id = new_correlation_id();
    let query = validate_query(&body.query, &correlation_id)?;

    info!(
        event_name = "api.chat.received",
        correlation_id = %correlation_id,
        history_turns = body.history.len(),
        "chat request received"
    );

    let response = state.runtime.answer(query, body.history).await;

    info!(
        event_name = "api.chat.answered",
        correlation_id = %correlation_id,
        answer_chars = response.len(),
        "chat request answered"
    );

    Ok(Json(ChatResponse { response, correlation_id }))
}

async fn chat_stream(
    State(state): State<ApiState>,
    Json(body): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<ApiError>)> {
    let correlation_id = new_correlation_id();
    let query = validate_query(&body.query, &correlation_id)?;

    info!(
        event_name = "api.chat_stream.started",
        correlation_id = %correlation_id,
        "streaming chat request started"
    );

    let receiver = state.runtime.stream(query.to_string(), body.history);
    let stream = ReceiverStream::new(receiver).map(|event| {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| {
            r#"{"type":"error","value":"event serialization failed"}"#.to_string()
        });
        Ok(Event::default().data(payload))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn validate_query<'a>(
    raw: &'a str,
    correlation_id: &str,
) -> Result<&'a str, (StatusCode, Json<ApiError>)> {
    let query = raw.trim();
    if query.is_empty() {
        return Err(error_response(InterfaceError::BadRequest {
            message: "query must not be empty".to_string(),
            correlation_id: correlation_id.to_string(),
        }));
    }
    Ok(query)
}

fn error_response(error: InterfaceError) -> (StatusCode, Json<ApiError>) {
    let (status, correlation_id) = match &error {
        InterfaceError::BadRequest { correlation_id, .. } => {
            (StatusCode::BAD_REQUEST, correlation_id.clone())
        }
        InterfaceError::ServiceUnavailable { correlation_id, .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, correlation_id.clone())
        }
        InterfaceError::Internal { correlation_id, .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, correlation_id.clone())
        }
    };
    // Bad requests carry their reason; everything else stays opaque.
    let message = match &error {
        InterfaceError::BadRequest { message, .. } => message.clone(),
        _ => error.user_message().to_string(),
    };

    (status, Json(ApiError { error: message, correlation_id }))
}

fn new_correlation_id() -> String {
    Uuid::new_v4().simple().to_string()
}
