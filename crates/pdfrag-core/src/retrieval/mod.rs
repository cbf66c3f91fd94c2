use crate::catalog::Repository;
use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::{CoreError, CoreResult};
use crate::util::vectors::cosine_similarity_from_distance;
use pgvector::Vector;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A ranked chunk with provenance, as surfaced to search and chat callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: i64,
    pub document_id: i32,
    pub filename: String,
    pub chunk_index: i32,
    pub text_content: String,
    pub similarity: f32,
}

/// Seam between retrieval and its consumers (chat, search handler), so the
/// orchestrator can be exercised without a database.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ChunkRetriever: Send + Sync {
    async fn retrieve(
        &self,
        user_id: i32,
        query: &str,
        top_k: usize,
        document_id: Option<i32>,
    ) -> CoreResult<Vec<RetrievedChunk>>;
}

/// Embeds a query and runs tenant-scoped nearest-neighbor search.
pub struct Retriever {
    repository: Arc<Repository>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        repository: Arc<Repository>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            repository,
            embedder,
            config,
        }
    }

    /// Clamp a caller-supplied top_k into the configured bounds.
    pub fn clamp_top_k(&self, top_k: Option<usize>) -> usize {
        top_k
            .unwrap_or(self.config.top_k_default)
            .clamp(1, self.config.top_k_max)
    }

    /// Startup check: search answers without the ANN index (sequential scan),
    /// but the latency targets assume HNSW, so a missing index is loud.
    /// When the index exists, the probe plan is logged so a planner that
    /// stopped using it shows up at startup rather than in latency graphs.
    pub async fn verify_index(&self) -> CoreResult<bool> {
        let present = self.repository.ann_index_present().await?;
        if !present {
            warn!("Vector search is running in degraded mode (no ANN index)");
            return Ok(false);
        }

        let mut probe = vec![0.0f32; self.embedder.dimension()];
        probe[0] = 1.0;
        match self
            .repository
            .explain_chunk_search(0, Vector::from(probe), 1)
            .await
        {
            Ok(plan) => debug!("ANN probe plan:\n{}", plan),
            Err(e) => warn!("Failed to explain ANN probe query: {}", e),
        }

        Ok(true)
    }

    async fn retrieve_inner(
        &self,
        user_id: i32,
        query: &str,
        top_k: usize,
        document_id: Option<i32>,
    ) -> CoreResult<Vec<RetrievedChunk>> {
        info!("Retrieving context for user {} (top_k={})", user_id, top_k);

        // Cross-tenant document ids collapse into NotFound; a 403 would leak
        // which ids exist.
        if let Some(doc_id) = document_id {
            self.repository
                .get_document_owned(doc_id, user_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("document {}", doc_id)))?;
        }

        let top_k = top_k.clamp(1, self.config.top_k_max);
        let query_input = [query.to_string()];
        let query_vector = self
            .embedder
            .embed_batch(&query_input)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                CoreError::InvariantViolation("embedder returned no vector for query".to_string())
            })?;

        let hits = self
            .repository
            .search_chunks(
                user_id,
                Vector::from(query_vector),
                top_k as i64,
                document_id,
                self.config.ef_search,
            )
            .await?;

        debug!("Retrieved {} chunks for user {}", hits.len(), user_id);

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                chunk_id: hit.chunk_id,
                document_id: hit.document_id,
                filename: hit.filename,
                chunk_index: hit.chunk_index,
                text_content: hit.text_content,
                similarity: cosine_similarity_from_distance(hit.distance),
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl ChunkRetriever for Retriever {
    async fn retrieve(
        &self,
        user_id: i32,
        query: &str,
        top_k: usize,
        document_id: Option<i32>,
    ) -> CoreResult<Vec<RetrievedChunk>> {
        self.retrieve_inner(user_id, query, top_k, document_id).await
    }
}
