use pdfrag_core::cache::{CachedResult, ProgressCache};
use pdfrag_core::catalog::{DocumentStatus, NewChunk, Repository};
use pdfrag_core::embedding::Embedder;
use pdfrag_core::error::{CoreError, CoreResult};
use pdfrag_core::ingest::ChunkPlanner;
use pdfrag_core::parse::Parser;
use pdfrag_core::queue::IngestJob;
use pdfrag_core::storage::BlobStore;
use pgvector::Vector;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// What the worker loop should do with the queue message afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Ingestion committed; ack.
    Completed,
    /// Document failed terminally (recorded in the catalog); ack.
    FailedTerminal,
    /// Transient failure; leave unacked so the visibility timeout redelivers.
    FailedTransient,
    /// Nothing to do (already completed, or document deleted mid-flight); ack.
    Skipped,
}

impl ProcessOutcome {
    pub fn should_ack(&self) -> bool {
        !matches!(self, ProcessOutcome::FailedTransient)
    }
}

/// Stage boundaries and the advisory progress emitted at each one.
const PROGRESS_CLAIMED: u8 = 0;
const PROGRESS_FETCHED: u8 = 10;
const PROGRESS_PARSED: u8 = 40;
const PROGRESS_CHUNKED: u8 = 60;
const PROGRESS_EMBEDDED: u8 = 80;
const PROGRESS_PERSISTED: u8 = 100;

/// Drives one queue message through fetch -> parse -> chunk -> embed ->
/// persist. Redelivery-safe: a completed document is a no-op, and the
/// completion transaction replaces any chunks a dead worker left behind.
pub struct IngestProcessor {
    repository: Arc<Repository>,
    cache: ProgressCache,
    blob_store: BlobStore,
    parser: Arc<dyn Parser>,
    embedder: Arc<dyn Embedder>,
    planner: ChunkPlanner,
    parse_timeout: Duration,
}

impl IngestProcessor {
    pub fn new(
        repository: Arc<Repository>,
        cache: ProgressCache,
        blob_store: BlobStore,
        parser: Arc<dyn Parser>,
        embedder: Arc<dyn Embedder>,
        planner: ChunkPlanner,
        parse_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            cache,
            blob_store,
            parser,
            embedder,
            planner,
            parse_timeout,
        }
    }

    pub async fn process(&self, job: &IngestJob) -> ProcessOutcome {
        info!("📄 Processing task {} ({})", job.task_id, job.filename);

        let document_id = match job.task_id.parse::<i32>() {
            Ok(id) => id,
            Err(_) => {
                error!("Malformed task id in queue message: {}", job.task_id);
                return ProcessOutcome::Skipped;
            }
        };

        // Idempotence gate: redelivered messages for finished documents ack
        // without touching anything.
        let document = match self.repository.get_document(document_id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                info!("Document {} is gone; dropping message", document_id);
                return ProcessOutcome::Skipped;
            }
            Err(e) => {
                warn!("Failed to load document {}: {}", document_id, e);
                return ProcessOutcome::FailedTransient;
            }
        };

        match document.status {
            DocumentStatus::Completed => {
                info!("Document {} already completed; ack only", document_id);
                return ProcessOutcome::Skipped;
            }
            DocumentStatus::Processing => {
                // A previous worker died mid-run; re-run every stage.
                warn!("Document {} was left in Processing; re-running", document_id);
            }
            DocumentStatus::Pending | DocumentStatus::Failed => {
                match self.repository.mark_processing(document_id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        // Raced with another worker or a delete; both are
                        // handled by the re-check before persist.
                        warn!("Document {} changed state under us", document_id);
                    }
                    Err(e) => {
                        warn!("Failed to claim document {}: {}", document_id, e);
                        return ProcessOutcome::FailedTransient;
                    }
                }
            }
        }

        self.report(job, DocumentStatus::Processing, PROGRESS_CLAIMED, None)
            .await;

        match self.run_stages(document_id, job).await {
            Ok(()) => {
                info!("✅ Task {} completed", job.task_id);
                ProcessOutcome::Completed
            }
            Err(CoreError::NotFound(what)) => {
                // Deleted while we were working; abort quietly.
                info!("Aborting task {}: {} disappeared", job.task_id, what);
                ProcessOutcome::Skipped
            }
            Err(e) if e.terminal() => {
                error!("❌ Task {} failed terminally: {}", job.task_id, e);
                self.fail_document(document_id, job, &e.to_string()).await;
                ProcessOutcome::FailedTerminal
            }
            Err(e) => {
                warn!("Task {} failed transiently, awaiting redelivery: {}", job.task_id, e);
                self.report(
                    job,
                    DocumentStatus::Processing,
                    PROGRESS_CLAIMED,
                    Some(&e.to_string()),
                )
                .await;
                ProcessOutcome::FailedTransient
            }
        }
    }

    /// Mark the document Failed because the per-message deadline elapsed.
    /// Called by the worker loop, which owns the outer timeout.
    pub async fn fail_deadline(&self, job: &IngestJob) {
        if let Ok(document_id) = job.task_id.parse::<i32>() {
            self.fail_document(document_id, job, "processing deadline exceeded")
                .await;
        }
    }

    async fn run_stages(&self, document_id: i32, job: &IngestJob) -> CoreResult<()> {
        // FETCHED: blob bytes land in a scratch file that is removed on every
        // exit path, including panics, when the handle drops.
        let pdf_bytes = self.blob_store.get(&job.blob_handle).await.map_err(|e| {
            match e {
                // A document without its blob can never ingest.
                CoreError::NotFound(what) => {
                    CoreError::PermanentUpstream(format!("missing {}", what))
                }
                other => other,
            }
        })?;

        let mut scratch = tempfile::Builder::new()
            .prefix("ingest-")
            .suffix(".pdf")
            .tempfile()?;
        scratch.write_all(&pdf_bytes)?;
        scratch.flush()?;
        drop(pdf_bytes);

        self.report(job, DocumentStatus::Processing, PROGRESS_FETCHED, None)
            .await;

        // PARSED
        let parse_started = Instant::now();
        let parsed = tokio::time::timeout(self.parse_timeout, self.parser.parse(scratch.path()))
            .await
            .map_err(|_| {
                CoreError::TransientUpstream(format!(
                    "parse exceeded {}s",
                    self.parse_timeout.as_secs()
                ))
            })??;
        let extraction_time = parse_started.elapsed().as_secs_f64();

        drop(scratch);

        if parsed.markdown.trim().is_empty() {
            return Err(CoreError::EmptyContent);
        }

        self.report(job, DocumentStatus::Processing, PROGRESS_PARSED, None)
            .await;

        // CHUNKED
        let chunks = self.planner.plan(&parsed.markdown);
        if chunks.is_empty() {
            return Err(CoreError::EmptyContent);
        }
        info!("Planned {} chunks for document {}", chunks.len(), document_id);

        self.report(job, DocumentStatus::Processing, PROGRESS_CHUNKED, None)
            .await;

        // Cheap liveness check before the expensive stage.
        if self.repository.get_document(document_id).await?.is_none() {
            return Err(CoreError::NotFound(format!("document {}", document_id)));
        }

        // EMBEDDED
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        if embeddings.len() != chunks.len() {
            return Err(CoreError::InvariantViolation(format!(
                "embedding alignment: {} chunks, {} vectors",
                chunks.len(),
                embeddings.len()
            )));
        }

        // Nothing with the wrong shape reaches the chunk table.
        let dimension = self.embedder.dimension();
        if let Some(bad) = embeddings.iter().find(|v| v.len() != dimension) {
            return Err(CoreError::InvariantViolation(format!(
                "embedding dimension mismatch: expected {}, got {}",
                dimension,
                bad.len()
            )));
        }

        self.report(job, DocumentStatus::Processing, PROGRESS_EMBEDDED, None)
            .await;

        // PERSISTED: one transaction, delete-then-insert.
        let db_chunks: Vec<NewChunk> = chunks
            .into_iter()
            .zip(embeddings.into_iter())
            .map(|(chunk, embedding)| NewChunk {
                chunk_index: chunk.chunk_index,
                text_content: chunk.text,
                embedding: Vector::from(embedding),
                token_count: Some(chunk.token_count as i32),
            })
            .collect();

        self.repository
            .complete_ingestion(
                document_id,
                &parsed.markdown,
                parsed.page_count as i32,
                extraction_time,
                db_chunks,
            )
            .await?;

        self.report(job, DocumentStatus::Completed, PROGRESS_PERSISTED, None)
            .await;
        self.cache
            .put_result(
                &job.task_id,
                &CachedResult {
                    filename: job.filename.clone(),
                    page_count: Some(parsed.page_count as i32),
                    result_text: parsed.markdown,
                    extraction_time_seconds: Some(extraction_time),
                },
            )
            .await;

        Ok(())
    }

    async fn fail_document(&self, document_id: i32, job: &IngestJob, reason: &str) {
        if let Err(e) = self.repository.mark_failed(document_id, reason).await {
            error!("Failed to record failure for document {}: {}", document_id, e);
        }
        self.report(job, DocumentStatus::Failed, PROGRESS_PERSISTED, Some(reason))
            .await;
    }

    async fn report(
        &self,
        job: &IngestJob,
        status: DocumentStatus,
        progress: u8,
        error: Option<&str>,
    ) {
        self.cache
            .put_progress(&job.task_id, status, progress, error)
            .await;
    }
}
