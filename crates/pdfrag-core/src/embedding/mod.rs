use crate::config::EmbeddingConfig;
use crate::error::{CoreError, CoreResult};
use crate::util::backoff::{classify_http_status, retry_transient, BackoffPolicy};
use crate::util::vectors::validate_and_normalize;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Text -> unit vector boundary. Batch output is aligned 1:1 with input
/// order; every returned vector has the configured dimension and is
/// normalized for cosine semantics.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-style `/v1/embeddings` client.
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    batch_size: usize,
    backoff: BackoffPolicy,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> CoreResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| CoreError::Config(format!("embedding client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
            backoff: BackoffPolicy::default(),
        })
    }

    async fn request_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let request = EmbeddingRequest {
            input: texts,
            model: &self.model,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CoreError::TransientUpstream(format!("embedding request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_status(status, &body));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CoreError::TransientUpstream(format!("embedding response: {}", e)))?;

        if body.data.len() != texts.len() {
            return Err(CoreError::InvariantViolation(format!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                body.data.len()
            )));
        }

        // Providers may reorder; the index field restores alignment.
        let mut data = body.data;
        data.sort_by_key(|d| d.index);

        data.into_iter()
            .map(|d| validate_and_normalize(d.embedding, self.dimension))
            .collect()
    }
}

#[async_trait::async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Embedding {} texts with model {} (batch_size={})",
            texts.len(),
            self.model,
            self.batch_size
        );

        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors =
                retry_transient(&self.backoff, "embed_batch", || self.request_batch(batch)).await?;
            all.extend(vectors);
        }

        Ok(all)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
