use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Top-level settings shared by the server and the worker.
///
/// Loaded from `config/settings.toml` with `APP__SECTION__KEY` environment
/// overrides. Unknown keys are rejected at load time.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub embedding: EmbeddingConfig,
    pub synthesizer: SynthesizerConfig,
    pub retrieval: RetrievalConfig,
    pub chunking: ChunkingConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_max_files_per_upload")]
    pub max_files_per_upload: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_pool_overflow")]
    pub pool_overflow: u32,
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_task_ttl")]
    pub task_ttl_seconds: u64,
    #[serde(default = "default_result_ttl")]
    pub result_ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    #[serde(default = "default_queue_key")]
    pub key: String,
    /// Claimed messages become visible again after this many seconds.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_seconds: u64,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SynthesizerConfig {
    #[serde(default = "default_synthesizer_model")]
    pub model: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_context_budget")]
    pub context_budget_tokens: usize,
    #[serde(default = "default_synth_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k_default: usize,
    #[serde(default = "default_top_k_max")]
    pub top_k_max: usize,
    #[serde(default = "default_ef_search")]
    pub ef_search: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size_tokens: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap_tokens: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_pool")]
    pub pool_size: usize,
    #[serde(default = "default_message_deadline")]
    pub per_message_deadline_seconds: u64,
    #[serde(default = "default_parse_timeout")]
    pub parse_timeout_seconds: u64,
    /// Documents stuck in Pending longer than this get re-enqueued.
    #[serde(default = "default_pending_requeue")]
    pub pending_requeue_after_seconds: u64,
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_max_files_per_upload() -> usize {
    10
}
fn default_pool_size() -> u32 {
    10
}
fn default_pool_overflow() -> u32 {
    20
}
fn default_pool_timeout() -> u64 {
    30
}
fn default_task_ttl() -> u64 {
    24 * 60 * 60
}
fn default_result_ttl() -> u64 {
    60 * 60
}
fn default_storage_backend() -> StorageBackend {
    StorageBackend::Local
}
fn default_data_dir() -> String {
    "data/blobs".to_string()
}
fn default_queue_key() -> String {
    "ingest:jobs".to_string()
}
fn default_visibility_timeout() -> u64 {
    // At least 2x the longest stage wall clock.
    300
}
fn default_poll_timeout() -> u64 {
    5
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dimension() -> usize {
    1536
}
fn default_batch_size() -> usize {
    100
}
fn default_embed_timeout() -> u64 {
    60
}
fn default_synthesizer_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> usize {
    500
}
fn default_context_budget() -> usize {
    12_000
}
fn default_synth_timeout() -> u64 {
    60
}
fn default_top_k() -> usize {
    5
}
fn default_top_k_max() -> usize {
    20
}
fn default_ef_search() -> u32 {
    40
}
fn default_chunk_size() -> usize {
    1024
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_worker_pool() -> usize {
    4
}
fn default_message_deadline() -> u64 {
    600
}
fn default_parse_timeout() -> u64 {
    120
}
fn default_pending_requeue() -> u64 {
    15 * 60
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            // Override with environment variables (prefix: APP)
            // Example: APP_DATABASE__URL=postgres://...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            anyhow::bail!("embedding.dimension must be positive");
        }
        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be positive");
        }
        if self.chunking.overlap_tokens >= self.chunking.size_tokens {
            anyhow::bail!(
                "chunking.overlap_tokens ({}) must be smaller than chunking.size_tokens ({})",
                self.chunking.overlap_tokens,
                self.chunking.size_tokens
            );
        }
        if self.retrieval.top_k_default > self.retrieval.top_k_max {
            anyhow::bail!("retrieval.top_k_default must not exceed retrieval.top_k_max");
        }
        if self.worker.pool_size == 0 {
            anyhow::bail!("worker.pool_size must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
            [server]
            host = "127.0.0.1"
            port = 8000

            [database]
            url = "postgres://localhost/pdfrag"

            [redis]
            url = "redis://127.0.0.1/"

            [storage]

            [queue]

            [embedding]
            base_url = "http://localhost:8081"

            [synthesizer]
            base_url = "http://localhost:8082"

            [retrieval]

            [chunking]

            [worker]
        "#
    }

    fn load_from_str(toml: &str) -> Result<Settings> {
        let config = Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = load_from_str(minimal_toml()).expect("load settings");
        assert_eq!(settings.embedding.model, "text-embedding-3-small");
        assert_eq!(settings.embedding.dimension, 1536);
        assert_eq!(settings.embedding.batch_size, 100);
        assert_eq!(settings.chunking.size_tokens, 1024);
        assert_eq!(settings.chunking.overlap_tokens, 200);
        assert_eq!(settings.retrieval.top_k_default, 5);
        assert_eq!(settings.retrieval.top_k_max, 20);
        assert_eq!(settings.retrieval.ef_search, 40);
        assert_eq!(settings.redis.task_ttl_seconds, 24 * 60 * 60);
        assert_eq!(settings.redis.result_ttl_seconds, 60 * 60);
        assert_eq!(settings.database.pool_size, 10);
        assert_eq!(settings.database.pool_overflow, 20);
        assert_eq!(settings.worker.per_message_deadline_seconds, 600);
    }

    #[test]
    fn unknown_options_are_rejected() {
        let toml = minimal_toml().replace("[worker]", "[worker]\nfrobnicate = true");
        assert!(load_from_str(&toml).is_err());
    }

    #[test]
    fn oversized_overlap_is_rejected() {
        let toml = minimal_toml().replace(
            "[chunking]",
            "[chunking]\nsize_tokens = 100\noverlap_tokens = 100",
        );
        assert!(load_from_str(&toml).is_err());
    }
}
