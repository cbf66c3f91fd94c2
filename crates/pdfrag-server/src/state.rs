use crate::admission::AdmissionService;
use pdfrag_core::cache::ProgressCache;
use pdfrag_core::catalog::{DbPool, Repository};
use pdfrag_core::chat::ChatOrchestrator;
use pdfrag_core::retrieval::Retriever;
use pdfrag_core::storage::BlobStore;
use std::sync::Arc;

/// Process-wide shared state: pools, clients, and the composed services.
pub struct AppState {
    pub db_pool: DbPool,
    pub repository: Arc<Repository>,
    pub cache: ProgressCache,
    pub blob_store: BlobStore,
    pub admission: AdmissionService,
    pub retriever: Arc<Retriever>,
    pub chat: Arc<ChatOrchestrator>,
}
