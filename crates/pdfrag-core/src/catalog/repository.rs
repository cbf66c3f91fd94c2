use super::{ChunkHit, DbPool, Document, DocumentStatus, NewChunk, User};
use crate::error::{CoreError, CoreResult};
use chrono::{Duration as ChronoDuration, Utc};
use pgvector::Vector;
use sqlx::Row;
use tracing::{debug, warn};

pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    // ==================== Users ====================

    pub async fn create_user(&self, email: &str, api_key: &str) -> CoreResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"INSERT INTO users (email, api_key)
               VALUES ($1, $2)
               RETURNING id, email, api_key, created_at"#,
        )
        .bind(email)
        .bind(api_key)
        .fetch_one(self.pool.get_pool())
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return CoreError::ClientInput(format!(
                        "email already registered: {}",
                        email
                    ));
                }
            }
            CoreError::Database(e)
        })?;

        Ok(user)
    }

    pub async fn get_user(&self, user_id: i32) -> CoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, api_key, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(user)
    }

    pub async fn user_exists(&self, user_id: i32) -> CoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(self.pool.get_pool())
            .await?;

        Ok(exists)
    }

    // ==================== Documents ====================

    pub async fn create_document(
        &self,
        user_id: i32,
        filename: &str,
        blob_handle: &str,
    ) -> CoreResult<Document> {
        let doc = sqlx::query_as::<_, Document>(
            r#"INSERT INTO documents (user_id, filename, blob_handle, status)
               VALUES ($1, $2, $3, 'pending')
               RETURNING *"#,
        )
        .bind(user_id)
        .bind(filename)
        .bind(blob_handle)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(doc)
    }

    pub async fn get_document(&self, document_id: i32) -> CoreResult<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = $1")
            .bind(document_id)
            .fetch_optional(self.pool.get_pool())
            .await?;

        Ok(doc)
    }

    /// Tenant-scoped fetch. A document owned by another user is
    /// indistinguishable from a missing one.
    pub async fn get_document_owned(
        &self,
        document_id: i32,
        user_id: i32,
    ) -> CoreResult<Option<Document>> {
        let doc =
            sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = $1 AND user_id = $2")
                .bind(document_id)
                .bind(user_id)
                .fetch_optional(self.pool.get_pool())
                .await?;

        Ok(doc)
    }

    pub async fn list_documents(
        &self,
        user_id: i32,
        status_filter: Option<DocumentStatus>,
        offset: i64,
        limit: i64,
    ) -> CoreResult<Vec<Document>> {
        let docs = sqlx::query_as::<_, Document>(
            r#"SELECT * FROM documents
               WHERE user_id = $1 AND ($2::document_status IS NULL OR status = $2)
               ORDER BY created_at DESC
               OFFSET $3 LIMIT $4"#,
        )
        .bind(user_id)
        .bind(status_filter)
        .bind(offset)
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(docs)
    }

    pub async fn count_documents(
        &self,
        user_id: i32,
        status_filter: Option<DocumentStatus>,
    ) -> CoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM documents
               WHERE user_id = $1 AND ($2::document_status IS NULL OR status = $2)"#,
        )
        .bind(user_id)
        .bind(status_filter)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(count)
    }

    /// Transition to Processing. Idempotent: only Pending and Failed
    /// documents move; returns false when the document was already claimed,
    /// completed, or deleted.
    pub async fn mark_processing(&self, document_id: i32) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"UPDATE documents
               SET status = 'processing', started_at = now(), error_message = NULL
               WHERE id = $1 AND status IN ('pending', 'failed')"#,
        )
        .bind(document_id)
        .execute(self.pool.get_pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_failed(&self, document_id: i32, error_message: &str) -> CoreResult<()> {
        sqlx::query(
            r#"UPDATE documents
               SET status = 'failed', error_message = $2, completed_at = now()
               WHERE id = $1"#,
        )
        .bind(document_id)
        .bind(error_message)
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    /// Single-commit completion: replace any existing chunks, then flip the
    /// document to Completed. Readers see either the old chunk set or the new
    /// one, never a partial state; re-runs after redelivery converge on one
    /// chunk set.
    pub async fn complete_ingestion(
        &self,
        document_id: i32,
        result_text: &str,
        page_count: i32,
        extraction_time_seconds: f64,
        chunks: Vec<NewChunk>,
    ) -> CoreResult<()> {
        let chunk_count = chunks.len();
        let mut transaction = self.pool.get_pool().begin().await?;

        let user_id = sqlx::query_scalar::<_, i32>(
            "SELECT user_id FROM documents WHERE id = $1 FOR UPDATE",
        )
        .bind(document_id)
        .fetch_optional(&mut *transaction)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("document {}", document_id)))?;

        sqlx::query("DELETE FROM document_chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *transaction)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"INSERT INTO document_chunks
                   (document_id, user_id, chunk_index, text_content, embedding, token_count)
                   VALUES ($1, $2, $3, $4, $5, $6)"#,
            )
            .bind(document_id)
            .bind(user_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text_content)
            .bind(chunk.embedding)
            .bind(chunk.token_count)
            .execute(&mut *transaction)
            .await?;
        }

        sqlx::query(
            r#"UPDATE documents
               SET status = 'completed',
                   result_text = $2,
                   page_count = $3,
                   extraction_time_seconds = $4,
                   error_message = NULL,
                   completed_at = now()
               WHERE id = $1"#,
        )
        .bind(document_id)
        .bind(result_text)
        .bind(page_count)
        .bind(extraction_time_seconds)
        .execute(&mut *transaction)
        .await?;

        transaction.commit().await?;
        debug!(
            "Committed ingestion for document {}: {} chunks",
            document_id, chunk_count
        );

        Ok(())
    }

    /// Delete a document; chunks cascade. Returns the blob handle for
    /// best-effort blob cleanup, or None when the document did not exist.
    pub async fn delete_document(&self, document_id: i32) -> CoreResult<Option<String>> {
        let handle = sqlx::query_scalar::<_, String>(
            "DELETE FROM documents WHERE id = $1 RETURNING blob_handle",
        )
        .bind(document_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(handle)
    }

    /// Documents stuck in Pending (admission enqueued nothing). Candidates
    /// for the worker's reconciliation sweep.
    pub async fn stale_pending_documents(
        &self,
        older_than_seconds: u64,
        limit: i64,
    ) -> CoreResult<Vec<Document>> {
        let cutoff = Utc::now() - ChronoDuration::seconds(older_than_seconds as i64);
        let docs = sqlx::query_as::<_, Document>(
            r#"SELECT * FROM documents
               WHERE status = 'pending' AND created_at < $1
               ORDER BY created_at ASC
               LIMIT $2"#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(docs)
    }

    // ==================== Chunks & vector search ====================

    pub async fn count_chunks(&self, document_id: i32) -> CoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM document_chunks WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(count)
    }

    pub async fn chunk_indexes(&self, document_id: i32) -> CoreResult<Vec<i32>> {
        let indexes = sqlx::query_scalar::<_, i32>(
            "SELECT chunk_index FROM document_chunks WHERE document_id = $1 ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(indexes)
    }

    /// Tenant-scoped nearest-neighbor search, ordered by cosine distance with
    /// chunk id as the deterministic tie-breaker.
    pub async fn search_chunks(
        &self,
        user_id: i32,
        query_vector: Vector,
        top_k: i64,
        document_id: Option<i32>,
        ef_search: u32,
    ) -> CoreResult<Vec<ChunkHit>> {
        let mut transaction = self.pool.get_pool().begin().await?;

        // SET LOCAL takes no bind parameters; ef_search is a validated u32.
        sqlx::query(&format!("SET LOCAL hnsw.ef_search = {}", ef_search))
            .execute(&mut *transaction)
            .await?;

        let hits = sqlx::query_as::<_, ChunkHit>(
            r#"SELECT c.id AS chunk_id,
                      c.document_id,
                      d.filename,
                      c.chunk_index,
                      c.text_content,
                      (c.embedding <=> $1)::float8 AS distance
               FROM document_chunks c
               JOIN documents d ON d.id = c.document_id
               WHERE c.user_id = $2
                 AND ($3::int IS NULL OR c.document_id = $3)
               ORDER BY c.embedding <=> $1, c.id ASC
               LIMIT $4"#,
        )
        .bind(&query_vector)
        .bind(user_id)
        .bind(document_id)
        .bind(top_k)
        .fetch_all(&mut *transaction)
        .await?;

        transaction.commit().await?;

        debug!("Found {} chunks for user {}", hits.len(), user_id);

        Ok(hits)
    }

    /// True when the HNSW index over chunk embeddings exists. Queries still
    /// answer without it (sequential scan), but latency targets will not hold.
    pub async fn ann_index_present(&self) -> CoreResult<bool> {
        let present = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(
                   SELECT 1 FROM pg_indexes
                   WHERE tablename = 'document_chunks'
                     AND indexdef ILIKE '%USING hnsw%'
               )"#,
        )
        .fetch_one(self.pool.get_pool())
        .await?;

        if !present {
            warn!("HNSW index on document_chunks is missing; vector search will degrade to a sequential scan");
        }

        Ok(present)
    }

    /// Query plan for the tenant-scoped search. The startup index check logs
    /// this so index-usage regressions are visible before they cost latency.
    pub async fn explain_chunk_search(
        &self,
        user_id: i32,
        query_vector: Vector,
        top_k: i64,
    ) -> CoreResult<String> {
        let rows = sqlx::query(
            r#"EXPLAIN
               SELECT c.id FROM document_chunks c
               WHERE c.user_id = $2
               ORDER BY c.embedding <=> $1, c.id ASC
               LIMIT $3"#,
        )
        .bind(&query_vector)
        .bind(user_id)
        .bind(top_k)
        .fetch_all(self.pool.get_pool())
        .await?;

        let plan = rows
            .iter()
            .map(|row| row.get::<String, _>(0))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(plan)
    }
}
