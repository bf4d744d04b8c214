//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    ChatRequest, CompletionResponse, ErrorResponse, IngestRequest, IngestResponse,
    StatusResponse,
};
use super::AppState;
use crate::runtime::TurnError;
use crate::services::{split_text, Passage, CHUNK_OVERLAP, CHUNK_SIZE};
use crate::translator::{LoopEvent, StreamTranslator};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/knowledge/ingest", post(ingest_knowledge))
        .with_state(state)
}

async fn root() -> Json<StatusResponse> {
    Json(StatusResponse {
        message: "Legal AI Agent Service is running",
    })
}

// ============================================================
// Chat
// ============================================================

async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let stream = request.stream;
    let history = match request.history() {
        Ok(history) => history,
        Err(violation) => {
            let error = TurnError::from(violation);
            tracing::warn!(error = %error, stream, "Rejected conversation");
            if !stream {
                return Err(AppError::from(error));
            }
            // Same terminal frames a failed turn produces
            let events = StreamTranslator::new().push(LoopEvent::Failed {
                message: error.to_string(),
            });
            return Ok(
                sse_stream(futures::stream::iter(events), CancellationToken::new())
                    .into_response(),
            );
        }
    };

    if stream {
        let cancel = CancellationToken::new();
        let events = Arc::clone(&state.controller).spawn_turn(history, cancel.clone());
        return Ok(sse_stream(events, cancel).into_response());
    }

    let report = state
        .controller
        .run_detached(history, CancellationToken::new())
        .await;
    tracing::debug!(
        state = report.state.name(),
        model_calls = report.model_calls,
        messages = report.messages.len(),
        "Completion ready"
    );
    if let Some(error) = report.error {
        return Err(AppError::from(error));
    }
    let answer = report.answer.unwrap_or_default();
    Ok(Json(CompletionResponse::new(answer)).into_response())
}

// ============================================================
// Knowledge ingest
// ============================================================

async fn ingest_knowledge(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    let knowledge = state
        .knowledge
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("Knowledge base is not configured".to_string()))?;

    let source = request.source.trim();
    if source.is_empty() {
        return Err(AppError::BadRequest("source must not be empty".to_string()));
    }
    let passages: Vec<Passage> = split_text(&request.text, CHUNK_SIZE, CHUNK_OVERLAP)
        .into_iter()
        .map(|text| Passage {
            text,
            source: source.to_string(),
        })
        .collect();
    if passages.is_empty() {
        return Err(AppError::BadRequest("text must not be empty".to_string()));
    }

    let chunks = knowledge
        .index(passages)
        .await
        .map_err(|e| AppError::BadGateway(e.to_string()))?;
    tracing::info!(source = %source, chunks, "Ingested knowledge");
    Ok(Json(IngestResponse { chunks }))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    BadGateway(String),
    Unavailable(String),
}

impl From<TurnError> for AppError {
    fn from(error: TurnError) -> Self {
        match error {
            TurnError::Protocol(_) => AppError::BadRequest(error.to_string()),
            TurnError::Dispatch(_) | TurnError::Model(_) | TurnError::Internal(_) => {
                AppError::BadGateway(error.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
