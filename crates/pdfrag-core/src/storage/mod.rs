use crate::config::{StorageBackend, StorageConfig};
use crate::error::{CoreError, CoreResult};
use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

pub type DynStore = Arc<dyn ObjectStore>;

/// Raw PDF bytes, keyed by opaque handle.
///
/// Nothing here interprets the content; the worker fetches bytes once per
/// ingestion and deletion is best-effort cleanup after a document delete.
#[derive(Clone)]
pub struct BlobStore {
    store: DynStore,
}

impl BlobStore {
    pub async fn new(config: &StorageConfig) -> CoreResult<Self> {
        let store: DynStore = match config.backend {
            StorageBackend::Local => {
                let base = resolve_base_dir(&config.data_dir);
                if !base.exists() {
                    tokio::fs::create_dir_all(&base).await?;
                }
                Arc::new(LocalFileSystem::new_with_prefix(base)?)
            }
            StorageBackend::Memory => Arc::new(InMemory::new()),
        };

        Ok(Self { store })
    }

    /// Inject a custom backend (tests).
    pub fn with_backend(store: DynStore) -> Self {
        Self { store }
    }

    /// In-memory store for tests and local development.
    pub fn memory() -> Self {
        Self::with_backend(Arc::new(InMemory::new()))
    }

    /// Fresh opaque handle for a new upload.
    pub fn new_handle(user_id: i32) -> String {
        format!("uploads/{}/{}.pdf", user_id, Uuid::new_v4())
    }

    pub async fn put(&self, handle: &str, data: Bytes) -> CoreResult<()> {
        let path = ObjPath::from(handle);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await?;
        Ok(())
    }

    pub async fn get(&self, handle: &str) -> CoreResult<Bytes> {
        let path = ObjPath::from(handle);
        let result = self.store.get(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => {
                CoreError::NotFound(format!("blob {}", handle))
            }
            other => CoreError::BlobStore(other),
        })?;

        Ok(result.bytes().await?)
    }

    pub async fn delete(&self, handle: &str) -> CoreResult<()> {
        let path = ObjPath::from(handle);
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(CoreError::BlobStore(e)),
        }
    }

    pub async fn exists(&self, handle: &str) -> CoreResult<bool> {
        let path = ObjPath::from(handle);
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(CoreError::BlobStore(e)),
        }
    }
}

/// Relative data dirs resolve against the working directory.
fn resolve_base_dir(data_dir: &str) -> PathBuf {
    let path = PathBuf::from(data_dir);
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let store = BlobStore::memory();
        let handle = BlobStore::new_handle(1);
        let data = Bytes::from_static(b"%PDF-1.4 test bytes");

        store.put(&handle, data.clone()).await.expect("put");
        assert!(store.exists(&handle).await.expect("exists"));
        assert_eq!(store.get(&handle).await.expect("get"), data);

        store.delete(&handle).await.expect("delete");
        assert!(!store.exists(&handle).await.expect("exists after delete"));
    }

    #[tokio::test]
    async fn get_missing_blob_is_not_found() {
        let store = BlobStore::memory();
        let result = store.get("uploads/1/missing.pdf").await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = BlobStore::memory();
        store
            .delete("uploads/9/already-gone.pdf")
            .await
            .expect("deleting a missing blob is fine");
    }

    #[test]
    fn handles_are_tenant_prefixed_and_unique() {
        let a = BlobStore::new_handle(7);
        let b = BlobStore::new_handle(7);
        assert!(a.starts_with("uploads/7/"));
        assert!(a.ends_with(".pdf"));
        assert_ne!(a, b);
    }
}
