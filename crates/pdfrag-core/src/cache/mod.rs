use crate::catalog::{Document, DocumentStatus};
use crate::config::RedisConfig;
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

const ALL_TASKS_KEY: &str = "all_tasks";
const ALL_TASKS_CAP: isize = 1000;

/// Advisory task state mirrored into the cache for cheap `/status` polling.
/// The document row stays authoritative; these records may vanish at TTL
/// without affecting correctness.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub task_id: String,
    pub status: DocumentStatus,
    pub progress: u8,
    pub filename: String,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn from_document(doc: &Document, progress: u8) -> Self {
        Self {
            task_id: doc.id.to_string(),
            status: doc.status,
            progress,
            filename: doc.filename.clone(),
            created_at: Some(doc.created_at),
            started_at: doc.started_at,
            completed_at: doc.completed_at,
            error: doc.error_message.clone(),
        }
    }

    fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("status".to_string(), self.status.as_str().to_string()),
            ("progress".to_string(), self.progress.to_string()),
            ("filename".to_string(), self.filename.clone()),
        ];
        if let Some(t) = self.created_at {
            pairs.push(("created_at".to_string(), t.to_rfc3339()));
        }
        if let Some(t) = self.started_at {
            pairs.push(("started_at".to_string(), t.to_rfc3339()));
        }
        if let Some(t) = self.completed_at {
            pairs.push(("completed_at".to_string(), t.to_rfc3339()));
        }
        if let Some(e) = &self.error {
            pairs.push(("error".to_string(), e.clone()));
        }
        pairs
    }

    fn from_map(task_id: &str, map: &HashMap<String, String>) -> Option<Self> {
        let status = DocumentStatus::parse(map.get("status")?)?;
        let parse_ts = |key: &str| {
            map.get(key)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
        };

        Some(Self {
            task_id: task_id.to_string(),
            status,
            progress: map.get("progress").and_then(|p| p.parse().ok()).unwrap_or(0),
            filename: map.get("filename").cloned().unwrap_or_default(),
            created_at: parse_ts("created_at"),
            started_at: parse_ts("started_at"),
            completed_at: parse_ts("completed_at"),
            error: map.get("error").cloned(),
        })
    }
}

/// Snapshot of a completed extraction, cached for the short window where
/// clients poll `/result` right after completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    pub filename: String,
    pub page_count: Option<i32>,
    pub result_text: String,
    pub extraction_time_seconds: Option<f64>,
}

/// Redis-backed progress cache. Every write is best-effort: a dead cache
/// degrades `/status` and `/result` latency, never correctness, so failures
/// are logged and swallowed.
#[derive(Clone)]
pub struct ProgressCache {
    conn: ConnectionManager,
    task_ttl_seconds: i64,
    result_ttl_seconds: u64,
}

fn task_key(task_id: &str) -> String {
    format!("task:{}", task_id)
}

fn result_key(task_id: &str) -> String {
    format!("result:{}", task_id)
}

impl ProgressCache {
    pub async fn connect(config: &RedisConfig) -> CoreResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| CoreError::CacheUnavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CoreError::CacheUnavailable(e.to_string()))?;

        Ok(Self {
            conn,
            task_ttl_seconds: config.task_ttl_seconds as i64,
            result_ttl_seconds: config.result_ttl_seconds,
        })
    }

    pub async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    /// Write (or refresh) a task record. TTL is re-applied on every write.
    pub async fn put_task(&self, record: &TaskRecord) {
        let mut conn = self.conn.clone();
        let key = task_key(&record.task_id);
        let pairs = record.to_pairs();

        let outcome: redis::RedisResult<()> = async {
            let _: () = conn.hset_multiple(&key, &pairs).await?;
            let _: () = conn.expire(&key, self.task_ttl_seconds).await?;
            let _: () = conn.lpush(ALL_TASKS_KEY, &record.task_id).await?;
            let _: () = conn.ltrim(ALL_TASKS_KEY, 0, ALL_TASKS_CAP - 1).await?;
            Ok(())
        }
        .await;

        if let Err(e) = outcome {
            warn!("Failed to write task record {}: {}", record.task_id, e);
        }
    }

    /// Update only the live-progress fields of an existing record.
    pub async fn put_progress(
        &self,
        task_id: &str,
        status: DocumentStatus,
        progress: u8,
        error: Option<&str>,
    ) {
        let mut conn = self.conn.clone();
        let key = task_key(task_id);
        let mut pairs = vec![
            ("status".to_string(), status.as_str().to_string()),
            ("progress".to_string(), progress.to_string()),
        ];
        if let Some(e) = error {
            pairs.push(("error".to_string(), e.to_string()));
        }

        let outcome: redis::RedisResult<()> = async {
            let _: () = conn.hset_multiple(&key, &pairs).await?;
            let _: () = conn.expire(&key, self.task_ttl_seconds).await?;
            Ok(())
        }
        .await;

        if let Err(e) = outcome {
            warn!("Failed to write progress for task {}: {}", task_id, e);
        }
    }

    /// Read a task record; cache errors collapse to a miss.
    pub async fn get_task(&self, task_id: &str) -> Option<TaskRecord> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = match conn.hgetall(task_key(task_id)).await {
            Ok(map) => map,
            Err(e) => {
                warn!("Failed to read task record {}: {}", task_id, e);
                return None;
            }
        };

        if map.is_empty() {
            return None;
        }

        TaskRecord::from_map(task_id, &map)
    }

    /// Most-recent task ids, newest first (advisory).
    pub async fn recent_task_ids(&self, offset: isize, limit: isize) -> Option<Vec<String>> {
        let mut conn = self.conn.clone();
        match conn
            .lrange(ALL_TASKS_KEY, offset, offset + limit - 1)
            .await
        {
            Ok(ids) => Some(ids),
            Err(e) => {
                warn!("Failed to read recent task ids: {}", e);
                None
            }
        }
    }

    pub async fn put_result(&self, task_id: &str, result: &CachedResult) {
        let payload = match serde_json::to_string(result) {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to serialize cached result {}: {}", task_id, e);
                return;
            }
        };

        let mut conn = self.conn.clone();
        let outcome: redis::RedisResult<()> = conn
            .set_ex(result_key(task_id), payload, self.result_ttl_seconds)
            .await;

        if let Err(e) = outcome {
            warn!("Failed to write cached result {}: {}", task_id, e);
        }
    }

    /// Read a cached result; absence means "read from the catalog".
    pub async fn get_result(&self, task_id: &str) -> Option<CachedResult> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = match conn.get(result_key(task_id)).await {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to read cached result {}: {}", task_id, e);
                return None;
            }
        };

        payload.and_then(|p| serde_json::from_str(&p).ok())
    }

    /// Remove per-task keys after a delete. The `all_tasks` list entry is
    /// left to age out; it is advisory.
    pub async fn forget_task(&self, task_id: &str) {
        let mut conn = self.conn.clone();
        let outcome: redis::RedisResult<()> = conn
            .del(&[task_key(task_id), result_key(task_id)])
            .await;

        if let Err(e) = outcome {
            warn!("Failed to delete cache entries for task {}: {}", task_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> TaskRecord {
        TaskRecord {
            task_id: "42".to_string(),
            status: DocumentStatus::Processing,
            progress: 40,
            filename: "report.pdf".to_string(),
            created_at: Some(Utc::now()),
            started_at: Some(Utc::now()),
            completed_at: None,
            error: None,
        }
    }

    #[test]
    fn task_record_round_trips_through_hash_pairs() {
        let record = sample_record();
        let map: HashMap<String, String> = record.to_pairs().into_iter().collect();
        let restored = TaskRecord::from_map("42", &map).expect("parse record");

        assert_eq!(restored.status, record.status);
        assert_eq!(restored.progress, record.progress);
        assert_eq!(restored.filename, record.filename);
        assert_eq!(restored.completed_at, None);
        assert_eq!(restored.error, None);
        // RFC3339 round-trip keeps ordering even if sub-second precision shifts
        assert_eq!(
            restored.created_at.map(|t| t.timestamp()),
            record.created_at.map(|t| t.timestamp())
        );
    }

    #[test]
    fn record_with_error_keeps_it() {
        let mut record = sample_record();
        record.status = DocumentStatus::Failed;
        record.error = Some("no extractable text".to_string());

        let map: HashMap<String, String> = record.to_pairs().into_iter().collect();
        let restored = TaskRecord::from_map("42", &map).expect("parse record");

        assert_eq!(restored.status, DocumentStatus::Failed);
        assert_eq!(restored.error.as_deref(), Some("no extractable text"));
    }

    #[test]
    fn malformed_hash_is_a_miss() {
        let mut map = HashMap::new();
        map.insert("status".to_string(), "SOMETHING_ELSE".to_string());
        assert!(TaskRecord::from_map("1", &map).is_none());
        assert!(TaskRecord::from_map("1", &HashMap::new()).is_none());
    }

    #[test]
    fn cached_result_serializes_round_trip() {
        let result = CachedResult {
            filename: "report.pdf".to_string(),
            page_count: Some(3),
            result_text: "# Title\n\nBody".to_string(),
            extraction_time_seconds: Some(1.25),
        };

        let json = serde_json::to_string(&result).unwrap();
        let restored: CachedResult = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, result);
    }
}
