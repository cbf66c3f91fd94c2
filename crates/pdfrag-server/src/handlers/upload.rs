use crate::admission::SubmittedFile;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub user_id: i32,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub task_ids: Vec<String>,
    pub total_files: usize,
}

/// POST /upload?user_id=<int>, multipart `files=@...`
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    info!("Upload request from user {}", query.user_id);

    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read field: {}", e)))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        if field_name != "files" && field_name != "file" {
            continue;
        }

        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| ApiError::BadRequest("file field is missing a filename".to_string()))?;

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read file: {}", e)))?;

        files.push(SubmittedFile { filename, data });
    }

    let task_ids = state.admission.submit(query.user_id, files).await?;
    let total_files = task_ids.len();

    info!(
        "Accepted {} files from user {}: {:?}",
        total_files, query.user_id, task_ids
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            task_ids,
            total_files,
        }),
    ))
}
