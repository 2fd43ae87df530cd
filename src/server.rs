//! HTTP server.
//!
//! Exposes the chat engine over JSON and Server-Sent Events.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat/{chat_id}/message` | Ask a question, wait for the answer |
//! | `POST` | `/chat/{chat_id}/message/stream` | Ask a question, stream status and chunks over SSE |
//! | `GET`  | `/chat/{chat_id}/messages` | List the caller's turns in a chat |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Identity
//!
//! The caller is identified by the `x-user-id` header (required) and the
//! comma-separated `x-user-groups` header. Authentication is expected to
//! happen in front of this server.
//!
//! # Streaming Protocol
//!
//! The stream endpoint emits `status` events shaped as
//!
//! ```json
//! { "chatId": "c1", "messageId": "m1", "updatedAt": 1700000000000,
//!   "operation": "QA", "status": "STARTING", "payload": { "message": "..." } }
//! ```
//!
//! and `chunks` events carrying `{ "chatId", "messageId", "chunks": [..] }`.
//! The first event is always `HandleSendMessage` `STARTING` and the last is
//! always `HandleSendMessage` `SUCCESS` (payload: the message result) or
//! `FAILED` (payload: `{ "errorMessage" }`).
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `forbidden` (403).
//! A query that fails after it started returns 503 with `{ "errorMessage" }`.

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chat_engine_core::status::{ChunkSink, StatusSink};
use chat_engine_core::{Reporter, StatusEvent};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::context::ChatContext;
use crate::engine_config::PrivilegeError;
use crate::history::ChatTurn;
use crate::message::{create_message, CreateMessageResponse, Identity, MessageRequest};

/// Operation name of the envelope events around a streamed message.
pub const HANDLE_SEND_MESSAGE: &str = "HandleSendMessage";

/// Starts the HTTP server on `[server].bind`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    run_server_with_context(ChatContext::from_config(config)?).await
}

/// Starts the HTTP server with a prepared context (custom history store,
/// pre-registered models).
pub async fn run_server_with_context(ctx: ChatContext) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let app = router(ctx);

    tracing::info!("chat server listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(ctx: ChatContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat/{chat_id}/message", post(handle_send_message))
        .route("/chat/{chat_id}/message/stream", post(handle_stream_message))
        .route("/chat/{chat_id}/messages", get(handle_list_messages))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(ctx)
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
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: message.into(),
    }
}

fn forbidden(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::FORBIDDEN,
        code: "forbidden".to_string(),
        message: message.into(),
    }
}

/// Map a pre-query failure from [`create_message`] to a response.
fn classify_message_error(err: anyhow::Error) -> AppError {
    if let Some(privilege) = err.downcast_ref::<PrivilegeError>() {
        return forbidden(privilege.to_string());
    }
    bad_request(format!("{:#}", err))
}

// ============ Identity ============

fn identity_from_headers(headers: &HeaderMap) -> Result<Identity, AppError> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| unauthorized("missing x-user-id header"))?;

    let groups = headers
        .get("x-user-groups")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Ok(Identity::new(user_id, groups))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /chat/{chat_id}/message ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody {
    question: String,
    #[serde(default)]
    options: Option<Value>,
    /// Client-side id echoed in streamed events.
    #[serde(default)]
    tmp_message_id: Option<String>,
}

/// Handler for `POST /chat/{chat_id}/message`.
///
/// Returns 200 with the message result, or 503 with `{ "errorMessage" }`
/// when the query itself fails so clients can retry.
async fn handle_send_message(
    State(ctx): State<ChatContext>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SendMessageBody>,
) -> Result<Response, AppError> {
    let identity = identity_from_headers(&headers)?;
    let request = MessageRequest {
        chat_id,
        question: body.question,
        options: body.options,
    };

    let response = create_message(&ctx, &identity, request, &Reporter::noop(), false)
        .await
        .map_err(classify_message_error)?;

    let status = if response.is_success() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(response)).into_response())
}

// ============ POST /chat/{chat_id}/message/stream ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InferenceStatus<'a> {
    chat_id: &'a str,
    message_id: &'a str,
    updated_at: i64,
    operation: &'a str,
    status: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    payload: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChunkMessage<'a> {
    chat_id: &'a str,
    message_id: &'a str,
    chunks: &'a [String],
}

/// Forwards chain events and chunks into an SSE channel.
struct SseSink {
    chat_id: String,
    message_id: String,
    tx: mpsc::Sender<Event>,
}

impl SseSink {
    async fn send(&self, event: Event) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| anyhow!("stream client disconnected"))
    }

    async fn send_status(&self, operation: &str, status: &str, payload: Value) -> anyhow::Result<()> {
        let event = Event::default().event("status").json_data(InferenceStatus {
            chat_id: &self.chat_id,
            message_id: &self.message_id,
            updated_at: chrono::Utc::now().timestamp_millis(),
            operation,
            status,
            payload,
        })?;
        self.send(event).await
    }
}

#[async_trait]
impl StatusSink for SseSink {
    async fn update_status(&self, event: &StatusEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_value(&event.payload)?;
        self.send_status(event.operation.as_str(), event.status.as_str(), payload)
            .await
    }
}

#[async_trait]
impl ChunkSink for SseSink {
    async fn stream_chunks(&self, chunks: &[String]) -> anyhow::Result<()> {
        let event = Event::default().event("chunks").json_data(ChunkMessage {
            chat_id: &self.chat_id,
            message_id: &self.message_id,
            chunks,
        })?;
        self.send(event).await
    }
}

/// Handler for `POST /chat/{chat_id}/message/stream`.
///
/// Identity is checked before the stream opens; every later failure is
/// delivered in-band as a terminal `FAILED` event.
///
/// If the client disconnects, chunk forwarding stops at the first failed
/// send. The query still completes and its turn is saved, so the answer
/// can be fetched from `GET /chat/{chat_id}/messages`.
async fn handle_stream_message(
    State(ctx): State<ChatContext>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SendMessageBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send>, AppError> {
    let identity = identity_from_headers(&headers)?;
    let message_id = body
        .tmp_message_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let (tx, rx) = mpsc::channel::<Event>(100);
    let sink = Arc::new(SseSink {
        chat_id: chat_id.clone(),
        message_id,
        tx,
    });

    tokio::spawn(async move {
        let question = body.question;
        if let Err(e) = sink
            .send_status(HANDLE_SEND_MESSAGE, "STARTING", Value::String(question.clone()))
            .await
        {
            tracing::debug!(error = %e, "stream closed before start");
            return;
        }

        let status: Arc<dyn StatusSink> = sink.clone();
        let chunks: Arc<dyn ChunkSink> = sink.clone();
        let reporter = Reporter::new(Some(status), Some(chunks));
        let request = MessageRequest {
            chat_id,
            question,
            options: body.options,
        };

        let (status, payload) = match create_message(&ctx, &identity, request, &reporter, true).await
        {
            Ok(response @ CreateMessageResponse::Success(_)) => {
                ("SUCCESS", serde_json::to_value(&response))
            }
            Ok(response) => ("FAILED", serde_json::to_value(&response)),
            Err(e) => ("FAILED", Ok(json!({ "errorMessage": format!("{:#}", e) }))),
        };
        let payload = payload.unwrap_or_else(|e| json!({ "errorMessage": e.to_string() }));

        if let Err(e) = sink.send_status(HANDLE_SEND_MESSAGE, status, payload).await {
            tracing::warn!(error = %e, "failed to deliver final stream event");
        }
    });

    let stream = ReceiverStream::new(rx).map(Ok::<Event, Infallible>);
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

// ============ GET /chat/{chat_id}/messages ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListMessagesResponse {
    chat_id: String,
    turns: Vec<ChatTurn>,
}

async fn handle_list_messages(
    State(ctx): State<ChatContext>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ListMessagesResponse>, AppError> {
    let identity = identity_from_headers(&headers)?;
    let turns = ctx
        .history
        .list_turns(&identity.user_id, &chat_id)
        .await
        .map_err(|e| AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal".to_string(),
            message: e.to_string(),
        })?;
    Ok(Json(ListMessagesResponse { chat_id, turns }))
}
