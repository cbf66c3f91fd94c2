mod memory;
mod redis_queue;

pub use memory::MemoryWorkQueue;
pub use redis_queue::RedisWorkQueue;

use crate::error::CoreResult;
use serde::{Deserialize, Serialize};

/// One ingestion job, exactly the wire shape admission enqueues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestJob {
    pub task_id: String,
    pub blob_handle: String,
    pub filename: String,
    pub user_id: i32,
}

/// A claimed message. The receipt identifies this delivery for `ack`;
/// until acked (or the visibility timeout lapses) no other worker sees it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: String,
    pub job: IngestJob,
}

/// At-least-once job queue with visibility-timeout semantics.
///
/// Claimed-but-unacked messages become deliverable again once their claim
/// deadline passes; consumers must tolerate duplicate delivery.
#[async_trait::async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, job: IngestJob) -> CoreResult<()>;

    /// Claim the next message, waiting up to the configured poll timeout.
    async fn receive(&self) -> CoreResult<Option<Delivery>>;

    /// Remove a claimed message permanently.
    async fn ack(&self, delivery: &Delivery) -> CoreResult<()>;

    /// Return expired claims to the ready queue; returns how many moved.
    async fn reclaim_expired(&self) -> CoreResult<usize>;
}

/// Internal wire envelope: jobs are not unique (redelivery, re-uploads), so
/// each enqueue gets its own delivery id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub delivery_id: String,
    pub job: IngestJob,
}

impl Envelope {
    pub fn new(job: IngestJob) -> Self {
        Self {
            delivery_id: uuid::Uuid::new_v4().to_string(),
            job,
        }
    }
}
