use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use parley_core::error::ParleyError;
use parley_core::types::ConversationId;
use parley_engine::TurnRequest;

use crate::protocol::{ChatCompletion, ChatCompletionRequest, ChunkTranslator};
use crate::state::AppState;

type ApiError = (StatusCode, Json<Value>);

fn api_error(e: ParleyError) -> ApiError {
    let (status, kind) = match e {
        ParleyError::FlowNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        ParleyError::InvalidFlow(_) | ParleyError::Validation(_) => {
            (StatusCode::BAD_REQUEST, "invalid_request")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
    };
    if status.is_server_error() {
        error!(error = %e, "Request failed");
    }
    (
        status,
        Json(json!({ "error": { "message": e.to_string(), "type": kind } })),
    )
}

// GET /api/health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// GET /api/conversations/{id}
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = ConversationId::from_string(&id);
    match state.runner.store().load(&id).await {
        Ok(Some(execution)) => Ok(Json(json!({
            "conversation_id": id.as_str(),
            "state": execution,
        }))),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": { "message": format!("conversation '{}' not found", id), "type": "not_found" } })),
        )),
        Err(e) => Err(api_error(e)),
    }
}

// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    let model = body.model.clone().unwrap_or_else(|| "parley".to_string());
    let mut turn = TurnRequest::new(&body.flow_id);
    turn.messages = body.messages;
    if let Some(ref id) = body.conversation_id {
        turn = turn.with_conversation(ConversationId::from_string(id));
    }
    info!(flow_id = %body.flow_id, stream = body.stream, "Chat completion request");

    if !body.stream {
        let response = state.runner.turn(turn).await.map_err(api_error)?;
        let completion = ChatCompletion::new(
            &model,
            response.conversation_id.as_str(),
            response.result.display_text().to_string(),
            response.result.status,
        );
        return Ok(Json(completion).into_response());
    }

    let (conversation_id, mut rx) = state.runner.turn_stream(turn).await.map_err(api_error)?;
    let mut translator = ChunkTranslator::new(&model, conversation_id.as_str());

    let stream = async_stream::stream! {
        while let Some(batch) = rx.recv().await {
            for event in &batch {
                for chunk in translator.translate(event) {
                    match serde_json::to_string(&chunk) {
                        Ok(data) => yield Ok::<Event, Infallible>(Event::default().data(data)),
                        Err(e) => warn!(error = %e, "Failed to encode chunk"),
                    }
                }
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}
