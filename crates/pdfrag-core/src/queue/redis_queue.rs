use super::{Delivery, Envelope, IngestJob, WorkQueue};
use crate::config::QueueConfig;
use crate::error::{CoreError, CoreResult};
use chrono::Utc;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Direction};
use tracing::{debug, warn};

/// Redis-backed work queue.
///
/// Layout (all under the configured key prefix):
/// - `<key>`             ready list, LPUSH producer / BLMOVE consumer
/// - `<key>:processing`  claimed messages, removed on ack
/// - `<key>:claims`      zset of claimed payloads scored by claim deadline
///
/// A message claimed by a worker that dies is re-queued by
/// `reclaim_expired` once its deadline passes, which gives the at-least-once
/// visibility-timeout behavior.
#[derive(Clone)]
pub struct RedisWorkQueue {
    conn: ConnectionManager,
    key: String,
    visibility_timeout_seconds: u64,
    poll_timeout_seconds: u64,
}

impl RedisWorkQueue {
    pub async fn connect(url: &str, config: &QueueConfig) -> CoreResult<Self> {
        let client = Client::open(url).map_err(|e| CoreError::Queue(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CoreError::Queue(e.to_string()))?;

        Ok(Self {
            conn,
            key: config.key.clone(),
            visibility_timeout_seconds: config.visibility_timeout_seconds,
            poll_timeout_seconds: config.poll_timeout_seconds,
        })
    }

    fn processing_key(&self) -> String {
        format!("{}:processing", self.key)
    }

    fn claims_key(&self) -> String {
        format!("{}:claims", self.key)
    }
}

#[async_trait::async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn enqueue(&self, job: IngestJob) -> CoreResult<()> {
        let envelope = Envelope::new(job);
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| CoreError::Queue(format!("serialize job: {}", e)))?;

        let mut conn = self.conn.clone();
        let _: () = conn
            .lpush(&self.key, payload)
            .await
            .map_err(|e| CoreError::Queue(e.to_string()))?;

        debug!("Enqueued ingestion job for task {}", envelope.job.task_id);
        Ok(())
    }

    async fn receive(&self) -> CoreResult<Option<Delivery>> {
        let mut conn = self.conn.clone();

        let payload: Option<String> = conn
            .blmove(
                &self.key,
                self.processing_key(),
                Direction::Right,
                Direction::Left,
                self.poll_timeout_seconds as f64,
            )
            .await
            .map_err(|e| CoreError::Queue(e.to_string()))?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let deadline = Utc::now().timestamp() + self.visibility_timeout_seconds as i64;
        let _: () = conn
            .zadd(self.claims_key(), &payload, deadline)
            .await
            .map_err(|e| CoreError::Queue(e.to_string()))?;

        let envelope: Envelope = match serde_json::from_str(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Poison message: drop it outright so the reaper cannot
                // cycle it back forever.
                warn!("Dropping undecodable queue payload: {}", e);
                let _: () = conn
                    .lrem(self.processing_key(), 1, &payload)
                    .await
                    .map_err(|e| CoreError::Queue(e.to_string()))?;
                let _: () = conn
                    .zrem(self.claims_key(), &payload)
                    .await
                    .map_err(|e| CoreError::Queue(e.to_string()))?;
                return Ok(None);
            }
        };

        Ok(Some(Delivery {
            receipt: payload,
            job: envelope.job,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .lrem(self.processing_key(), 1, &delivery.receipt)
            .await
            .map_err(|e| CoreError::Queue(e.to_string()))?;
        let _: () = conn
            .zrem(self.claims_key(), &delivery.receipt)
            .await
            .map_err(|e| CoreError::Queue(e.to_string()))?;

        Ok(())
    }

    async fn reclaim_expired(&self) -> CoreResult<usize> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp();

        let expired: Vec<String> = conn
            .zrangebyscore(self.claims_key(), "-inf", now)
            .await
            .map_err(|e| CoreError::Queue(e.to_string()))?;

        let mut moved = 0usize;
        for payload in expired {
            let removed: i64 = conn
                .lrem(self.processing_key(), 1, &payload)
                .await
                .map_err(|e| CoreError::Queue(e.to_string()))?;
            let _: () = conn
                .zrem(self.claims_key(), &payload)
                .await
                .map_err(|e| CoreError::Queue(e.to_string()))?;

            // Only re-queue payloads we actually owned; a racing ack may have
            // removed the processing entry already.
            if removed > 0 {
                let _: () = conn
                    .lpush(&self.key, &payload)
                    .await
                    .map_err(|e| CoreError::Queue(e.to_string()))?;
                moved += 1;
            }
        }

        if moved > 0 {
            warn!("Re-queued {} expired claims on {}", moved, self.key);
        }

        Ok(moved)
    }
}
