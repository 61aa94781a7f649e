use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::Classify;
use crate::models::job::{Job, ReceivedMessage};
use crate::services::queue::{JobSource, QueueError};
use crate::worker::processor::{JobOutcome, JobProcessor, ProcessingError};

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),
}

/// Pulls jobs one at a time and deletes each only after its pipeline succeeded.
///
/// Failed jobs are left in flight; the queue redelivers them once their
/// visibility timeout lapses. Only configuration errors end the loop.
pub struct QueueConsumer {
    source: Arc<dyn JobSource>,
    processor: Arc<JobProcessor>,
    receive_wait: Duration,
    error_backoff: Duration,
}

impl QueueConsumer {
    pub fn new(
        source: Arc<dyn JobSource>,
        processor: Arc<JobProcessor>,
        receive_wait: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            source,
            processor,
            receive_wait,
            error_backoff,
        }
    }

    /// Consume until `shutdown` fires. A job already started runs to completion.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        tracing::info!("Waiting for jobs");

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.source.receive(self.receive_wait) => received,
            };

            match received {
                Ok(Some(message)) => self.handle(message).await?,
                Ok(None) => tracing::trace!("No jobs available"),
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "Queue misconfigured, stopping consumer");
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Receive failed, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(self.error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!("Consumer stopped");
        Ok(())
    }

    /// Process one received message and acknowledge it on success.
    pub async fn handle(&self, message: ReceivedMessage) -> Result<(), ConsumerError> {
        let job = Job::from_message(message);
        metrics::counter!("worker_jobs_received_total").increment(1);
        tracing::info!(
            job_id = %job.id,
            receive_count = job.receive_count,
            image_path = %job.payload.image_path,
            chat_id = %job.payload.chat_id,
            "Start processing"
        );

        let start = Instant::now();
        let result = self.processor.process(&job).await;
        metrics::histogram!("worker_job_processing_seconds").record(start.elapsed().as_secs_f64());

        match result {
            Ok(outcome) => {
                self.acknowledge(&job).await?;
                match outcome {
                    JobOutcome::Recorded { labels, notified } => {
                        metrics::counter!("worker_jobs_completed_total").increment(1);
                        tracing::info!(job_id = %job.id, labels, notified, "Job done");
                    }
                    JobOutcome::NoDetections => {
                        metrics::counter!("worker_jobs_no_detections_total").increment(1);
                        tracing::info!(job_id = %job.id, "Job done, no detections");
                    }
                }
                Ok(())
            }
            Err(e) => {
                let class = e.class();
                metrics::counter!("worker_jobs_failed_total", "class" => class.to_string())
                    .increment(1);
                if class.is_fatal() {
                    tracing::error!(
                        job_id = %job.id,
                        stage = %e.stage,
                        error = %e,
                        "Configuration error, stopping consumer"
                    );
                    return Err(e.into());
                }
                tracing::error!(
                    job_id = %job.id,
                    stage = %e.stage,
                    class = %class,
                    error = %e,
                    "Job failed, leaving it for redelivery"
                );
                Ok(())
            }
        }
    }

    async fn acknowledge(&self, job: &Job) -> Result<(), ConsumerError> {
        match self.source.delete(&job.receipt).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    error = %e,
                    "Failed to delete finished job, it may be redelivered"
                );
                Ok(())
            }
        }
    }
}
