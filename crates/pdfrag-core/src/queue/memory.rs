use super::{Delivery, Envelope, IngestJob, WorkQueue};
use crate::error::CoreResult;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct MemoryState {
    ready: VecDeque<Envelope>,
    in_flight: HashMap<String, (Instant, Envelope)>,
}

/// In-process queue with the same claim/ack/redelivery contract as the Redis
/// queue. Used by tests; a zero visibility timeout makes every unacked
/// message instantly redeliverable, which is how worker-death scenarios are
/// simulated.
pub struct MemoryWorkQueue {
    state: Mutex<MemoryState>,
    visibility_timeout: Duration,
}

impl MemoryWorkQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                ready: VecDeque::new(),
                in_flight: HashMap::new(),
            }),
            visibility_timeout,
        }
    }

    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

#[async_trait::async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn enqueue(&self, job: IngestJob) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        state.ready.push_back(Envelope::new(job));
        Ok(())
    }

    async fn receive(&self) -> CoreResult<Option<Delivery>> {
        let mut state = self.state.lock().await;
        let Some(envelope) = state.ready.pop_front() else {
            return Ok(None);
        };

        let receipt = envelope.delivery_id.clone();
        let job = envelope.job.clone();
        state.in_flight.insert(receipt.clone(), (Instant::now(), envelope));

        Ok(Some(Delivery { receipt, job }))
    }

    async fn ack(&self, delivery: &Delivery) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        state.in_flight.remove(&delivery.receipt);
        Ok(())
    }

    async fn reclaim_expired(&self) -> CoreResult<usize> {
        let mut state = self.state.lock().await;
        let visibility = self.visibility_timeout;
        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, (claimed_at, _))| claimed_at.elapsed() >= visibility)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in &expired {
            if let Some((_, envelope)) = state.in_flight.remove(receipt) {
                state.ready.push_back(envelope);
            }
        }

        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(task_id: &str) -> IngestJob {
        IngestJob {
            task_id: task_id.to_string(),
            blob_handle: format!("uploads/1/{}.pdf", task_id),
            filename: "report.pdf".to_string(),
            user_id: 1,
        }
    }

    #[tokio::test]
    async fn fifo_claim_and_ack() {
        let queue = MemoryWorkQueue::new(Duration::from_secs(300));
        queue.enqueue(job("1")).await.unwrap();
        queue.enqueue(job("2")).await.unwrap();

        let first = queue.receive().await.unwrap().expect("first delivery");
        assert_eq!(first.job.task_id, "1");
        assert_eq!(queue.in_flight_len().await, 1);

        queue.ack(&first).await.unwrap();
        assert_eq!(queue.in_flight_len().await, 0);

        let second = queue.receive().await.unwrap().expect("second delivery");
        assert_eq!(second.job.task_id, "2");
    }

    #[tokio::test]
    async fn empty_queue_returns_none() {
        let queue = MemoryWorkQueue::new(Duration::from_secs(300));
        assert!(queue.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unacked_claims_are_redelivered_after_visibility_timeout() {
        let queue = MemoryWorkQueue::new(Duration::ZERO);
        queue.enqueue(job("7")).await.unwrap();

        // Claim without acking: simulated worker death mid-pipeline.
        let delivery = queue.receive().await.unwrap().expect("delivery");
        assert!(queue.receive().await.unwrap().is_none());

        let moved = queue.reclaim_expired().await.unwrap();
        assert_eq!(moved, 1);

        let redelivered = queue.receive().await.unwrap().expect("redelivery");
        assert_eq!(redelivered.job, delivery.job);
        assert_eq!(redelivered.receipt, delivery.receipt);
    }

    #[tokio::test]
    async fn acked_claims_are_not_reclaimed() {
        let queue = MemoryWorkQueue::new(Duration::ZERO);
        queue.enqueue(job("9")).await.unwrap();

        let delivery = queue.receive().await.unwrap().expect("delivery");
        queue.ack(&delivery).await.unwrap();

        assert_eq!(queue.reclaim_expired().await.unwrap(), 0);
        assert!(queue.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fresh_claims_survive_the_reaper() {
        let queue = MemoryWorkQueue::new(Duration::from_secs(300));
        queue.enqueue(job("11")).await.unwrap();

        let _delivery = queue.receive().await.unwrap().expect("delivery");
        assert_eq!(queue.reclaim_expired().await.unwrap(), 0);
        assert_eq!(queue.in_flight_len().await, 1);
    }
}
