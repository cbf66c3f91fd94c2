use crate::error::ApiError;
use bytes::Bytes;
use pdfrag_core::cache::{ProgressCache, TaskRecord};
use pdfrag_core::catalog::Repository;
use pdfrag_core::queue::{IngestJob, WorkQueue};
use pdfrag_core::storage::BlobStore;
use std::sync::Arc;
use tracing::{info, warn};

pub struct SubmittedFile {
    pub filename: String,
    pub data: Bytes,
}

/// Validates submissions, persists the blob and the Pending document row,
/// seeds the task record, and hands the job to the queue.
pub struct AdmissionService {
    repository: Arc<Repository>,
    blob_store: BlobStore,
    cache: ProgressCache,
    queue: Arc<dyn WorkQueue>,
    max_files_per_upload: usize,
    max_file_bytes: usize,
}

impl AdmissionService {
    pub fn new(
        repository: Arc<Repository>,
        blob_store: BlobStore,
        cache: ProgressCache,
        queue: Arc<dyn WorkQueue>,
        max_files_per_upload: usize,
        max_file_bytes: usize,
    ) -> Self {
        Self {
            repository,
            blob_store,
            cache,
            queue,
            max_files_per_upload,
            max_file_bytes,
        }
    }

    /// Admit a batch of files for a user, returning one task id per file.
    ///
    /// All bounds are checked before any file is admitted, so a rejection
    /// never leaves half a batch behind. An infrastructure failure mid-batch
    /// rolls back the file being admitted; earlier files stay enqueued.
    pub async fn submit(
        &self,
        user_id: i32,
        files: Vec<SubmittedFile>,
    ) -> Result<Vec<String>, ApiError> {
        if files.is_empty() {
            return Err(ApiError::BadRequest("no files supplied".to_string()));
        }
        if files.len() > self.max_files_per_upload {
            return Err(ApiError::BadRequest(format!(
                "too many files: {} (max {})",
                files.len(),
                self.max_files_per_upload
            )));
        }

        if !self.repository.user_exists(user_id).await.map_err(ApiError::from)? {
            return Err(ApiError::BadRequest(format!("unknown user {}", user_id)));
        }

        for file in &files {
            self.validate_file(file)?;
        }

        let mut task_ids = Vec::with_capacity(files.len());
        for file in files {
            let task_id = self.admit_one(user_id, file).await?;
            task_ids.push(task_id);
        }

        Ok(task_ids)
    }

    fn validate_file(&self, file: &SubmittedFile) -> Result<(), ApiError> {
        if file.data.len() > self.max_file_bytes {
            return Err(ApiError::PayloadTooLarge(format!(
                "{} is {} bytes (max {})",
                file.filename,
                file.data.len(),
                self.max_file_bytes
            )));
        }

        // Magic-number check; the declared filename is not trusted.
        let is_pdf = infer::get(&file.data)
            .map(|kind| kind.mime_type() == "application/pdf")
            .unwrap_or(false);

        if !is_pdf {
            return Err(ApiError::UnsupportedMediaType(format!(
                "{} is not a PDF",
                file.filename
            )));
        }

        Ok(())
    }

    async fn admit_one(&self, user_id: i32, file: SubmittedFile) -> Result<String, ApiError> {
        let handle = BlobStore::new_handle(user_id);

        self.blob_store
            .put(&handle, file.data)
            .await
            .map_err(|e| ApiError::ServiceUnavailable(format!("blob store: {}", e)))?;

        let document = match self
            .repository
            .create_document(user_id, &file.filename, &handle)
            .await
        {
            Ok(doc) => doc,
            Err(e) => {
                // No document row exists; only the blob needs cleanup.
                if let Err(cleanup) = self.blob_store.delete(&handle).await {
                    warn!("Failed to clean up blob {} after rollback: {}", handle, cleanup);
                }
                return Err(e.into());
            }
        };

        let task_id = document.id.to_string();
        self.cache
            .put_task(&TaskRecord::from_document(&document, 0))
            .await;

        let job = IngestJob {
            task_id: task_id.clone(),
            blob_handle: handle.clone(),
            filename: file.filename.clone(),
            user_id,
        };

        if let Err(e) = self.queue.enqueue(job).await {
            warn!(
                "Enqueue failed for document {}; rolling back admission: {}",
                document.id, e
            );
            if let Err(cleanup) = self.repository.delete_document(document.id).await {
                warn!("Rollback of document {} failed: {}", document.id, cleanup);
            }
            if let Err(cleanup) = self.blob_store.delete(&handle).await {
                warn!("Failed to clean up blob {} after rollback: {}", handle, cleanup);
            }
            self.cache.forget_task(&task_id).await;
            return Err(ApiError::ServiceUnavailable(format!("work queue: {}", e)));
        }

        info!(
            "Admitted document {} for user {}: {}",
            document.id, user_id, file.filename
        );

        Ok(task_id)
    }
}
