//! Chat HTTP server.
//!
//! Serves the browser chat page and a small JSON API:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Chat page |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/session` | Create a session, returns its id |
//! | `GET`  | `/api/history/{session_id}` | Full message history |
//! | `POST` | `/api/chat` | Run one turn, streams fragments via SSE |
//!
//! The chat endpoint responds with `text/event-stream`: one `message` event
//! per fragment, then a single `done` event once the full answer has been
//! committed to the session history. The server task drains the model stream
//! to completion even if the browser disconnects, so the history invariant
//! (one completed turn appends exactly two messages) holds regardless.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::error::ChatError;
use crate::llm::{CompletionClient, OpenAiChatClient};
use crate::models::{ChatMessage, Role};
use crate::rag;
use crate::session::SessionStore;

const CHAT_PAGE: &str = include_str!("../assets/chat.html");

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    llm: Arc<dyn CompletionClient>,
    sessions: SessionStore,
}

/// Starts the chat server on the configured bind address.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let llm: Arc<dyn CompletionClient> = Arc::new(OpenAiChatClient::new(&config.llm)?);
    run_server_with_client(config, llm).await
}

/// Like [`run_server`], but with an injected completion client.
pub async fn run_server_with_client(
    config: &Config,
    llm: Arc<dyn CompletionClient>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState {
        config: Arc::new(config.clone()),
        llm,
        sessions: SessionStore::new(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/api/session", post(handle_create_session))
        .route("/api/history/{session_id}", get(handle_history))
        .route("/api/chat", post(handle_chat))
        .layer(cors)
        .with_state(state);

    info!(bind = %bind_addr, "chat server listening");
    println!("Chat server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
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

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

// ============ GET / ============

async fn handle_index() -> Html<&'static str> {
    Html(CHAT_PAGE)
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

// ============ POST /api/session ============

#[derive(Serialize)]
struct SessionResponse {
    session_id: String,
}

async fn handle_create_session(State(state): State<AppState>) -> Json<SessionResponse> {
    let session_id = state.sessions.create();
    info!(session_id = %session_id, "session created");
    Json(SessionResponse { session_id })
}

// ============ GET /api/history/{session_id} ============

#[derive(Serialize)]
struct HistoryResponse {
    messages: Vec<ChatMessage>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let session = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| not_found(format!("unknown session: {}", session_id)))?;

    let session = session.lock().await;
    Ok(Json(HistoryResponse {
        messages: session.history().to_vec(),
    }))
}

// ============ POST /api/chat ============

async fn handle_chat(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let session_id = body
        .get("session_id")
        .and_then(|s| s.as_str())
        .ok_or_else(|| bad_request("missing 'session_id'"))?
        .to_string();

    let message_value = body
        .get("message")
        .ok_or_else(|| bad_request("missing 'message'"))?;

    // Boundary validation happens before any network call.
    let message = ChatMessage::from_value(message_value).map_err(|e| bad_request(e.to_string()))?;
    if message.role != Role::User {
        return Err(bad_request("chat input must have role 'user'"));
    }

    let session = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| not_found(format!("unknown session: {}", session_id)))?;

    {
        let guard = session.lock().await;
        rag::validate_turn(guard.history(), &message.content)
            .map_err(|e| bad_request(e.to_string()))?;
    }

    let (tx, rx) = mpsc::channel::<Event>(32);
    let config = state.config.clone();
    let llm = state.llm.clone();

    tokio::spawn(async move {
        if let Err(e) = run_turn(config, llm, session, message, &tx).await {
            error!(error = %e, "chat turn failed");
            let data = serde_json::json!(e.to_string()).to_string();
            let _ = tx.send(Event::default().event("error").data(data)).await;
        }
    });

    let stream = ReceiverStream::new(rx).map(Ok);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// One chat turn: append the user message, rewrite the query, retrieve
/// context, stream the answer, and commit it to history once fully drained.
async fn run_turn(
    config: Arc<Config>,
    llm: Arc<dyn CompletionClient>,
    session: Arc<tokio::sync::Mutex<crate::session::ChatSession>>,
    message: ChatMessage,
    tx: &mpsc::Sender<Event>,
) -> anyhow::Result<()> {
    let mut session = session.lock().await;

    let prior_history = session.history().to_vec();
    let input = message.content.clone();
    session.push(message);

    let query = rag::rewrite_query(llm.as_ref(), &prior_history, &input)
        .await
        .map_err(|e| ChatError::UpstreamProviderFailure(e.to_string()))?;

    let pool = session.index(&config.db.path).await?.clone();
    let chunks = rag::retrieve(&pool, &config.embedding, &config.retrieval, &query)
        .await
        .map_err(|e| ChatError::UpstreamProviderFailure(e.to_string()))?;

    let mut stream = rag::stream_answer(llm, prior_history, input, chunks);

    while let Some(fragment) = stream.next_fragment().await {
        // Fragments are JSON-encoded so newlines survive the SSE framing.
        // A gone client must not abort the turn; the stream is still
        // drained so the answer lands in history.
        let data = serde_json::json!(fragment).to_string();
        let _ = tx.send(Event::default().event("message").data(data)).await;
    }

    let answer = stream.finalize().await?;
    session.push(ChatMessage::assistant(answer));

    let _ = tx.send(Event::default().event("done").data("")).await;
    Ok(())
}
