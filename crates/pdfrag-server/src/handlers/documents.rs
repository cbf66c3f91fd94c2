use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use pdfrag_core::catalog::{Document, DocumentStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: i32,
    pub user_id: i32,
    pub filename: String,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_time_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            user_id: doc.user_id,
            filename: doc.filename,
            status: doc.status,
            page_count: doc.page_count,
            extraction_time_seconds: doc.extraction_time_seconds,
            error_message: doc.error_message,
            created_at: doc.created_at,
            started_at: doc.started_at,
            completed_at: doc.completed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListDocumentsQuery {
    pub user_id: i32,
    pub status_filter: Option<String>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct ListDocumentsResponse {
    pub documents: Vec<DocumentResponse>,
    pub total: i64,
}

/// GET /documents?user_id=<int>&status_filter=<enum>?&offset&limit
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListDocumentsQuery>,
) -> Result<Json<ListDocumentsResponse>, ApiError> {
    let status_filter = match &query.status_filter {
        Some(raw) => Some(DocumentStatus::parse(raw).ok_or_else(|| {
            ApiError::BadRequest(format!("invalid status_filter: {}", raw))
        })?),
        None => None,
    };

    let limit = query.limit.clamp(1, 100);
    let offset = query.offset.max(0);

    let documents = state
        .repository
        .list_documents(query.user_id, status_filter, offset, limit)
        .await?;
    let total = state
        .repository
        .count_documents(query.user_id, status_filter)
        .await?;

    Ok(Json(ListDocumentsResponse {
        documents: documents.into_iter().map(DocumentResponse::from).collect(),
        total,
    }))
}

#[derive(Debug, Deserialize)]
pub struct GetDocumentQuery {
    pub user_id: i32,
}

/// GET /documents/{id}?user_id=<int> — 404 when not owned.
pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<i32>,
    Query(query): Query<GetDocumentQuery>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let document = state
        .repository
        .get_document_owned(document_id, query.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("document {}", document_id)))?;

    Ok(Json(document.into()))
}
