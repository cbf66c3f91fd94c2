use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use pdfrag_core::chat::{ChatAnswer, ChatSource};
use pdfrag_core::synthesis::Usage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const MAX_QUESTION_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub user_id: i32,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    pub document_id: Option<i32>,
    pub top_k: Option<usize>,
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<ChatSource>,
    pub chunks_found: usize,
    pub model: String,
    pub usage: Usage,
}

impl From<ChatAnswer> for ChatResponse {
    fn from(answer: ChatAnswer) -> Self {
        Self {
            answer: answer.answer,
            sources: answer.sources,
            chunks_found: answer.chunks_found,
            model: answer.model,
            usage: answer.usage,
        }
    }
}

/// POST /chat?user_id=<int>
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChatQuery>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".to_string()));
    }
    if question.chars().count() > MAX_QUESTION_CHARS {
        return Err(ApiError::BadRequest(format!(
            "question exceeds {} characters",
            MAX_QUESTION_CHARS
        )));
    }

    let top_k = state.retriever.clamp_top_k(request.top_k);

    info!(
        "Chat request from user {} (top_k={}, document_id={:?})",
        query.user_id, top_k, request.document_id
    );

    let answer = state
        .chat
        .answer(
            query.user_id,
            question,
            top_k,
            request.document_id,
            request.model.as_deref(),
        )
        .await?;

    Ok(Json(answer.into()))
}
