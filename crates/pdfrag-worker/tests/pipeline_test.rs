//! End-to-end pipeline tests against live backing services.
//!
//! Requires postgres with the pgvector extension and redis:
//!   DATABASE_URL=postgres://localhost/pdfrag_test \
//!   REDIS_URL=redis://127.0.0.1/ \
//!   cargo test -p pdfrag-worker -- --ignored
//!
//! The parser is stubbed (blob bytes are treated as UTF-8 text) and the
//! embedder is a deterministic bag-of-words hash, so runs are reproducible
//! without any model endpoints.

use bytes::Bytes;
use pdfrag_core::cache::ProgressCache;
use pdfrag_core::catalog::{DbPool, DocumentStatus, Repository};
use pdfrag_core::config::{ChunkingConfig, DatabaseConfig, RedisConfig};
use pdfrag_core::embedding::Embedder;
use pdfrag_core::error::CoreResult;
use pdfrag_core::ingest::ChunkPlanner;
use pdfrag_core::parse::{ParsedPdf, Parser};
use pdfrag_core::queue::IngestJob;
use pdfrag_core::storage::BlobStore;
use pdfrag_core::util::vectors::validate_and_normalize;
use pgvector::Vector;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pdfrag_worker::{IngestProcessor, ProcessOutcome};

const DIMENSION: usize = 1536;

/// Treats the blob bytes as the parsed markdown; three pages flat.
struct Utf8StubParser;

#[async_trait::async_trait]
impl Parser for Utf8StubParser {
    async fn parse(&self, path: &Path) -> CoreResult<ParsedPdf> {
        let bytes = std::fs::read(path)?;
        Ok(ParsedPdf {
            markdown: String::from_utf8_lossy(&bytes).into_owned(),
            page_count: 3,
        })
    }
}

/// Deterministic bag-of-words embedder: each word hashes to a pseudo-random
/// direction, a text embeds to the normalized sum. Overlapping vocabulary
/// produces high cosine similarity, which is what retrieval tests need.
struct WordHashEmbedder;

fn word_direction(word: &str) -> Vec<f32> {
    let mut seed: u64 = 0xcbf29ce484222325;
    for b in word.as_bytes() {
        seed ^= *b as u64;
        seed = seed.wrapping_mul(0x100000001b3);
    }

    let mut v = Vec::with_capacity(DIMENSION);
    let mut state = seed;
    for _ in 0..DIMENSION {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        v.push(((state >> 33) as f32 / (1u64 << 31) as f32) - 0.5);
    }
    v
}

fn embed_text(text: &str) -> Vec<f32> {
    let mut sum = vec![0.0f32; DIMENSION];
    let mut words = 0usize;
    for word in text.split_whitespace() {
        for (acc, x) in sum.iter_mut().zip(word_direction(word)) {
            *acc += x;
        }
        words += 1;
    }
    if words == 0 {
        sum[0] = 1.0;
    }
    validate_and_normalize(sum, DIMENSION).expect("stub embedding is finite")
}

#[async_trait::async_trait]
impl Embedder for WordHashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

struct Harness {
    repository: Arc<Repository>,
    cache: ProgressCache,
    blob_store: BlobStore,
    processor: IngestProcessor,
}

async fn harness(result_ttl_seconds: u64) -> Harness {
    let database = DatabaseConfig {
        url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/pdfrag_test".to_string()),
        pool_size: 5,
        pool_overflow: 5,
        pool_timeout_seconds: 10,
    };
    let redis = RedisConfig {
        url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string()),
        task_ttl_seconds: 24 * 60 * 60,
        result_ttl_seconds,
    };

    let pool = DbPool::new(&database).await.expect("connect postgres");
    pool.migrate().await.expect("run migrations");

    let repository = Arc::new(Repository::new(pool));
    let cache = ProgressCache::connect(&redis).await.expect("connect redis");
    let blob_store = BlobStore::memory();

    let planner = ChunkPlanner::new(&ChunkingConfig {
        size_tokens: 1024,
        overlap_tokens: 200,
    })
    .expect("planner");

    let processor = IngestProcessor::new(
        repository.clone(),
        cache.clone(),
        blob_store.clone(),
        Arc::new(Utf8StubParser),
        Arc::new(WordHashEmbedder),
        planner,
        Duration::from_secs(120),
    );

    Harness {
        repository,
        cache,
        blob_store,
        processor,
    }
}

async fn new_user(h: &Harness) -> i32 {
    let email = format!("{}@test.local", uuid::Uuid::new_v4());
    h.repository
        .create_user(&email, &uuid::Uuid::new_v4().to_string())
        .await
        .expect("create user")
        .id
}

/// Admission condensed for tests: blob + document row + job message.
async fn admit(h: &Harness, user_id: i32, filename: &str, text: &str) -> IngestJob {
    let handle = BlobStore::new_handle(user_id);
    h.blob_store
        .put(&handle, Bytes::from(text.as_bytes().to_vec()))
        .await
        .expect("put blob");

    let doc = h
        .repository
        .create_document(user_id, filename, &handle)
        .await
        .expect("create document");

    IngestJob {
        task_id: doc.id.to_string(),
        blob_handle: handle,
        filename: filename.to_string(),
        user_id,
    }
}

fn doc_id(job: &IngestJob) -> i32 {
    job.task_id.parse().unwrap()
}

#[tokio::test]
#[ignore = "requires postgres+pgvector and redis (DATABASE_URL, REDIS_URL)"]
async fn happy_path_ingests_chunks_and_answers_search() {
    let h = harness(3600).await;
    let user_id = new_user(&h).await;

    // ~2500 tokens of repeated text forces multiple chunks at size 1024.
    let text = "alpha beta gamma ".repeat(625);
    let job = admit(&h, user_id, "happy.pdf", &text).await;

    let outcome = h.processor.process(&job).await;
    assert_eq!(outcome, ProcessOutcome::Completed);

    let doc = h
        .repository
        .get_document(doc_id(&job))
        .await
        .unwrap()
        .expect("document exists");
    assert_eq!(doc.status, DocumentStatus::Completed);
    assert_eq!(doc.page_count, Some(3));
    assert!(doc.result_text.as_deref().unwrap_or("").contains("alpha"));
    assert!(doc.completed_at.is_some());

    let count = h.repository.count_chunks(doc.id).await.unwrap();
    assert!(count >= 2, "expected >= 2 chunks, got {}", count);

    // chunk_index forms {0..N-1}
    let indexes = h.repository.chunk_indexes(doc.id).await.unwrap();
    assert_eq!(indexes, (0..count as i32).collect::<Vec<_>>());

    // Vector search over the same vocabulary finds this document.
    let query = Vector::from(embed_text("alpha beta"));
    let hits = h
        .repository
        .search_chunks(user_id, query, 5, None, 40)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().any(|hit| hit.document_id == doc.id));
    let best = 1.0 - hits[0].distance;
    assert!(best >= 0.5, "similarity {} below 0.5", best);

    // Completion also left a cached result and a terminal task record.
    let cached = h.cache.get_result(&job.task_id).await.expect("cached result");
    assert_eq!(cached.page_count, Some(3));
    let record = h.cache.get_task(&job.task_id).await.expect("task record");
    assert_eq!(record.status, DocumentStatus::Completed);
    assert_eq!(record.progress, 100);
}

#[tokio::test]
#[ignore = "requires postgres+pgvector and redis (DATABASE_URL, REDIS_URL)"]
async fn search_is_tenant_scoped() {
    let h = harness(3600).await;
    let user_one = new_user(&h).await;
    let user_two = new_user(&h).await;

    let job_one = admit(
        &h,
        user_one,
        "one.pdf",
        &"confidential user one data ".repeat(50),
    )
    .await;
    let job_two = admit(
        &h,
        user_two,
        "two.pdf",
        &"confidential user two data ".repeat(50),
    )
    .await;

    assert_eq!(h.processor.process(&job_one).await, ProcessOutcome::Completed);
    assert_eq!(h.processor.process(&job_two).await, ProcessOutcome::Completed);

    let query = Vector::from(embed_text("confidential"));
    let hits = h
        .repository
        .search_chunks(user_one, query, 5, None, 40)
        .await
        .unwrap();

    assert!(!hits.is_empty());
    for hit in &hits {
        assert_eq!(hit.document_id, doc_id(&job_one), "cross-tenant chunk leaked");
    }

    // Another user's document id behaves as if it does not exist.
    let foreign = h
        .repository
        .get_document_owned(doc_id(&job_one), user_two)
        .await
        .unwrap();
    assert!(foreign.is_none());
}

#[tokio::test]
#[ignore = "requires postgres+pgvector and redis (DATABASE_URL, REDIS_URL)"]
async fn redelivery_converges_on_one_chunk_set() {
    let h = harness(3600).await;
    let user_id = new_user(&h).await;

    let text = "delta epsilon zeta ".repeat(400);
    let job = admit(&h, user_id, "redelivered.pdf", &text).await;

    assert_eq!(h.processor.process(&job).await, ProcessOutcome::Completed);
    let first_count = h.repository.count_chunks(doc_id(&job)).await.unwrap();
    let first_indexes = h.repository.chunk_indexes(doc_id(&job)).await.unwrap();

    // Redelivery of a completed document is a pure ack.
    assert_eq!(h.processor.process(&job).await, ProcessOutcome::Skipped);
    assert_eq!(
        h.repository.count_chunks(doc_id(&job)).await.unwrap(),
        first_count
    );

    // A re-run (document knocked back, as after a worker death) replaces the
    // chunk set wholesale and lands on the same deterministic output.
    h.repository
        .mark_failed(doc_id(&job), "simulated interrupted run")
        .await
        .unwrap();
    assert_eq!(h.processor.process(&job).await, ProcessOutcome::Completed);

    let second_indexes = h.repository.chunk_indexes(doc_id(&job)).await.unwrap();
    assert_eq!(second_indexes, first_indexes);
    assert_eq!(
        h.repository.count_chunks(doc_id(&job)).await.unwrap(),
        first_count
    );
}

#[tokio::test]
#[ignore = "requires postgres+pgvector and redis (DATABASE_URL, REDIS_URL)"]
async fn result_survives_cache_expiry() {
    // 1s TTL so the test can outlive the cached copy.
    let h = harness(1).await;
    let user_id = new_user(&h).await;

    let text = "eta theta iota ".repeat(100);
    let job = admit(&h, user_id, "expiring.pdf", &text).await;
    assert_eq!(h.processor.process(&job).await, ProcessOutcome::Completed);

    assert!(h.cache.get_result(&job.task_id).await.is_some());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(h.cache.get_result(&job.task_id).await.is_none());

    // The catalog still has the full result.
    let doc = h
        .repository
        .get_document(doc_id(&job))
        .await
        .unwrap()
        .expect("document");
    assert_eq!(doc.status, DocumentStatus::Completed);
    assert!(doc.result_text.as_deref().unwrap_or("").contains("theta"));
    assert_eq!(doc.page_count, Some(3));
}

#[tokio::test]
#[ignore = "requires postgres+pgvector and redis (DATABASE_URL, REDIS_URL)"]
async fn empty_parse_fails_terminally_with_no_chunks() {
    let h = harness(3600).await;
    let user_id = new_user(&h).await;

    let job = admit(&h, user_id, "blank.pdf", "   \n\t ").await;
    assert_eq!(h.processor.process(&job).await, ProcessOutcome::FailedTerminal);

    let doc = h
        .repository
        .get_document(doc_id(&job))
        .await
        .unwrap()
        .expect("document");
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert_eq!(doc.error_message.as_deref(), Some("no extractable text"));
    assert!(doc.result_text.is_none());
    assert_eq!(h.repository.count_chunks(doc.id).await.unwrap(), 0);

    // No cached result for a failed task.
    assert!(h.cache.get_result(&job.task_id).await.is_none());
}

#[tokio::test]
#[ignore = "requires postgres+pgvector and redis (DATABASE_URL, REDIS_URL)"]
async fn delete_cascades_to_chunks_and_search() {
    let h = harness(3600).await;
    let user_id = new_user(&h).await;

    let text = "kappa lambda mu ".repeat(200);
    let job = admit(&h, user_id, "deleted.pdf", &text).await;
    assert_eq!(h.processor.process(&job).await, ProcessOutcome::Completed);
    assert!(h.repository.count_chunks(doc_id(&job)).await.unwrap() > 0);

    let handle = h
        .repository
        .delete_document(doc_id(&job))
        .await
        .unwrap()
        .expect("blob handle returned");
    assert_eq!(handle, job.blob_handle);

    assert_eq!(h.repository.count_chunks(doc_id(&job)).await.unwrap(), 0);

    let query = Vector::from(embed_text("kappa lambda"));
    let hits = h
        .repository
        .search_chunks(user_id, query, 5, None, 40)
        .await
        .unwrap();
    assert!(hits.iter().all(|hit| hit.document_id != doc_id(&job)));
}

#[tokio::test]
#[ignore = "requires postgres+pgvector and redis (DATABASE_URL, REDIS_URL)"]
async fn ann_index_exists_after_migration() {
    let h = harness(3600).await;
    assert!(h.repository.ann_index_present().await.unwrap());

    let plan = h
        .repository
        .explain_chunk_search(1, Vector::from(embed_text("anything")), 5)
        .await
        .unwrap();
    assert!(!plan.is_empty());
}
