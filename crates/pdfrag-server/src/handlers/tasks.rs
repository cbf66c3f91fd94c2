use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use pdfrag_core::cache::{CachedResult, TaskRecord};
use pdfrag_core::catalog::{Document, DocumentStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: DocumentStatus,
    pub progress: u8,
    pub filename: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<TaskRecord> for TaskStatusResponse {
    fn from(record: TaskRecord) -> Self {
        Self {
            task_id: record.task_id,
            status: record.status,
            progress: record.progress,
            filename: record.filename,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            error: record.error,
        }
    }
}

/// Progress synthesized from the document row when the cache record is gone.
fn progress_for(status: DocumentStatus) -> u8 {
    match status {
        DocumentStatus::Pending => 0,
        DocumentStatus::Processing => 50,
        DocumentStatus::Completed | DocumentStatus::Failed => 100,
    }
}

fn parse_task_id(task_id: &str) -> Result<i32, ApiError> {
    task_id
        .parse::<i32>()
        .map_err(|_| ApiError::NotFound(format!("task {}", task_id)))
}

/// GET /status/{task_id} — cache first, catalog fallback.
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    if let Some(record) = state.cache.get_task(&task_id).await {
        return Ok(Json(record.into()));
    }

    let document_id = parse_task_id(&task_id)?;
    let document = state
        .repository
        .get_document(document_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {}", task_id)))?;

    let record = TaskRecord::from_document(&document, progress_for(document.status));
    Ok(Json(record.into()))
}

#[derive(Debug, Serialize)]
pub struct TaskResultResponse {
    pub task_id: String,
    pub filename: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_time_seconds: Option<f64>,
}

/// GET /result/{task_id} — short-TTL cache, then the document row. 404 only
/// when both miss.
pub async fn result_handler(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskResultResponse>, ApiError> {
    if let Some(cached) = state.cache.get_result(&task_id).await {
        return Ok(Json(TaskResultResponse {
            task_id,
            filename: cached.filename,
            text: cached.result_text,
            page_count: cached.page_count,
            extraction_time_seconds: cached.extraction_time_seconds,
        }));
    }

    let document_id = parse_task_id(&task_id)?;
    let document = state
        .repository
        .get_document(document_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {}", task_id)))?;

    let result = result_from_document(&document)
        .ok_or_else(|| ApiError::NotFound(format!("no result for task {}", task_id)))?;

    // Refill the cache for the next poll.
    state.cache.put_result(&task_id, &result).await;

    Ok(Json(TaskResultResponse {
        task_id,
        filename: result.filename,
        text: result.result_text,
        page_count: result.page_count,
        extraction_time_seconds: result.extraction_time_seconds,
    }))
}

fn result_from_document(document: &Document) -> Option<CachedResult> {
    if document.status != DocumentStatus::Completed {
        return None;
    }

    document.result_text.as_ref().map(|text| CachedResult {
        filename: document.filename.clone(),
        page_count: document.page_count,
        result_text: text.clone(),
        extraction_time_seconds: document.extraction_time_seconds,
    })
}

#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub items: Vec<TaskStatusResponse>,
    pub total: usize,
}

/// GET /tasks — recent tasks from the cache's advisory list.
pub async fn list_tasks_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let limit = query.limit.clamp(1, 100);

    let ids = state
        .cache
        .recent_task_ids(query.offset as isize, limit as isize)
        .await
        .unwrap_or_default();

    let mut items = Vec::with_capacity(ids.len());
    let mut seen = std::collections::HashSet::new();
    for id in ids {
        // The advisory list may repeat an id after progress rewrites.
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(record) = state.cache.get_task(&id).await {
            items.push(TaskStatusResponse::from(record));
        }
    }

    let total = items.len();
    Ok(Json(TaskListResponse { items, total }))
}

/// DELETE /task/{task_id} — removes the document (chunks cascade), the cache
/// entries, and best-effort the blob.
pub async fn delete_task_handler(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let document_id = parse_task_id(&task_id)?;

    let blob_handle = state
        .repository
        .delete_document(document_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {}", task_id)))?;

    state.cache.forget_task(&task_id).await;

    if let Err(e) = state.blob_store.delete(&blob_handle).await {
        warn!("Failed to delete blob {} for task {}: {}", blob_handle, task_id, e);
    }

    Ok(StatusCode::NO_CONTENT)
}
