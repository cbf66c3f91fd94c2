use crate::processor::IngestProcessor;
use anyhow::Result;
use pdfrag_core::catalog::Repository;
use pdfrag_core::config::Settings;
use pdfrag_core::queue::{IngestJob, WorkQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Worker pool: W independent consumers, a claim reaper, and a reconciliation
/// sweep for documents whose admission died between insert and enqueue.
pub struct Worker {
    settings: Settings,
    repository: Arc<Repository>,
    queue: Arc<dyn WorkQueue>,
    processor: Arc<IngestProcessor>,
}

impl Worker {
    pub fn new(
        settings: Settings,
        repository: Arc<Repository>,
        queue: Arc<dyn WorkQueue>,
        processor: Arc<IngestProcessor>,
    ) -> Self {
        Self {
            settings,
            repository,
            queue,
            processor,
        }
    }

    pub async fn run(self) -> Result<()> {
        info!("🎯 Worker started (pool_size={})", self.settings.worker.pool_size);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Reaper: expired claims go back to the ready queue.
        let reaper_handle = {
            let queue = self.queue.clone();
            let mut shutdown = shutdown_rx.clone();
            let period = Duration::from_secs(
                (self.settings.queue.visibility_timeout_seconds / 2).max(1),
            );

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = queue.reclaim_expired().await {
                                warn!("Claim reaper failed: {}", e);
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };

        // Reconciliation sweep: re-enqueue documents stuck in Pending.
        let sweep_handle = {
            let repository = self.repository.clone();
            let queue = self.queue.clone();
            let mut shutdown = shutdown_rx.clone();
            let threshold = self.settings.worker.pending_requeue_after_seconds;

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(threshold.max(60)));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = sweep_stale_pending(&repository, queue.as_ref(), threshold).await {
                                warn!("Pending sweep failed: {}", e);
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };

        // Consumer pool.
        let mut consumers = Vec::with_capacity(self.settings.worker.pool_size);
        for worker_id in 0..self.settings.worker.pool_size {
            let queue = self.queue.clone();
            let processor = self.processor.clone();
            let mut shutdown = shutdown_rx.clone();
            let deadline =
                Duration::from_secs(self.settings.worker.per_message_deadline_seconds);

            consumers.push(tokio::spawn(async move {
                info!("👂 Worker {} polling", worker_id);
                loop {
                    if *shutdown.borrow() {
                        break;
                    }

                    tokio::select! {
                        received = queue.receive() => {
                            match received {
                                Ok(Some(delivery)) => {
                                    consume_one(&*processor, queue.as_ref(), delivery, deadline).await;
                                }
                                Ok(None) => {
                                    // Long poll expired; loop around.
                                }
                                Err(e) => {
                                    error!("Worker {} receive failed: {}", worker_id, e);
                                    tokio::time::sleep(Duration::from_secs(1)).await;
                                }
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                info!("Worker {} stopped", worker_id);
            }));
        }

        tokio::signal::ctrl_c().await?;
        info!("Received shutdown signal; draining workers");
        let _ = shutdown_tx.send(true);

        for consumer in consumers {
            let _ = consumer.await;
        }
        reaper_handle.abort();
        sweep_handle.abort();

        info!("Worker stopped");
        Ok(())
    }
}

/// Process one delivery to completion or abandonment, then settle the
/// message. Transient failures are left unacked for redelivery.
async fn consume_one(
    processor: &IngestProcessor,
    queue: &dyn WorkQueue,
    delivery: pdfrag_core::queue::Delivery,
    deadline: Duration,
) {
    let task_id = delivery.job.task_id.clone();

    let outcome = match tokio::time::timeout(deadline, processor.process(&delivery.job)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            error!(
                "Task {} exceeded the {}s per-message deadline",
                task_id,
                deadline.as_secs()
            );
            processor.fail_deadline(&delivery.job).await;
            crate::processor::ProcessOutcome::FailedTerminal
        }
    };

    if outcome.should_ack() {
        if let Err(e) = queue.ack(&delivery).await {
            // The visibility timeout will redeliver; idempotence absorbs it.
            warn!("Failed to ack task {}: {}", task_id, e);
        }
    }
}

async fn sweep_stale_pending(
    repository: &Repository,
    queue: &dyn WorkQueue,
    older_than_seconds: u64,
) -> Result<()> {
    let stale = repository
        .stale_pending_documents(older_than_seconds, 50)
        .await?;

    if stale.is_empty() {
        return Ok(());
    }

    warn!("Re-enqueueing {} documents stuck in Pending", stale.len());
    for doc in stale {
        let job = IngestJob {
            task_id: doc.id.to_string(),
            blob_handle: doc.blob_handle.clone(),
            filename: doc.filename.clone(),
            user_id: doc.user_id,
        };
        if let Err(e) = queue.enqueue(job).await {
            warn!("Failed to re-enqueue document {}: {}", doc.id, e);
        }
    }

    Ok(())
}
