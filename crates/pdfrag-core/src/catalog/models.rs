use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Document lifecycle. Transitions are monotone: Pending -> Processing ->
/// {Completed | Failed}; only the worker mutates status after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "document_status", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Completed => "COMPLETED",
            DocumentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Some(DocumentStatus::Pending),
            "PROCESSING" => Some(DocumentStatus::Processing),
            "COMPLETED" => Some(DocumentStatus::Completed),
            "FAILED" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub api_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Document {
    pub id: i32,
    pub user_id: i32,
    pub filename: String,
    pub blob_handle: String,
    pub status: DocumentStatus,
    pub result_text: Option<String>,
    pub summary: Option<String>,
    pub error_message: Option<String>,
    pub page_count: Option<i32>,
    pub extraction_time_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Chunk payload for the ingestion completion transaction.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i32,
    pub text_content: String,
    pub embedding: Vector,
    pub token_count: Option<i32>,
}

/// A chunk returned by tenant-scoped vector search, with provenance.
#[derive(Debug, Clone, FromRow)]
pub struct ChunkHit {
    pub chunk_id: i64,
    pub document_id: i32,
    pub filename: String,
    pub chunk_index: i32,
    pub text_content: String,
    pub distance: f64,
}
