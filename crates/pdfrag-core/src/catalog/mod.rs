pub mod models;
pub mod pool;
pub mod repository;

pub use models::{ChunkHit, Document, DocumentStatus, NewChunk, User};
pub use pool::DbPool;
pub use repository::Repository;
