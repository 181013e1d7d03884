//! Worker dispatch loop
//!
//! Design principles:
//! - One message at a time, stage handlers run sequentially
//! - A message is acked only after the job's final state is persisted
//! - Handler failures mark the job failed; nothing is retried automatically
//! - Store or queue failures leave the message unacked and back off
//! - Graceful shutdown via shutdown channel, checked between messages

use std::sync::Arc;
use std::time::Duration;
use tally_db::DbError;
use tally_pipeline::{transition, Actor, Delivery, JobQueue, QueueError, TransitionError};
use tally_protocol::{defaults, Job, JobMessage, JobStatus};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::stages::{run_stage, StageContext};

/// Failures of the loop itself, as opposed to a job's handler.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// What became of one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// The job id does not exist.
    Dropped,
    /// The job was already complete, failed or waiting on a human.
    Discarded(JobStatus),
    /// The handler succeeded and the job reached `status`.
    Succeeded { status: JobStatus, successor: Option<Job> },
    /// The handler failed and the job is marked failed.
    Failed { error: String },
}

/// Dispatch loop timing.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub poll_wait: Duration,
    pub error_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_wait: Duration::from_millis(defaults::DEFAULT_POLL_WAIT_MS),
            error_backoff: Duration::from_secs(defaults::DEFAULT_ERROR_BACKOFF_SECS),
        }
    }
}

/// Handle for controlling a running worker
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join_handle: JoinHandle<anyhow::Result<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the current message to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown_tx.send(()).await;
        self.join_handle.await?
    }
}

pub struct Worker {
    ctx: StageContext,
    queue: Arc<dyn JobQueue>,
    config: DispatchConfig,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Worker {
    /// Create a worker. Returns (Worker, shutdown sender): call `run()` on the
    /// worker, send on the channel to stop it.
    pub fn new(
        ctx: StageContext,
        queue: Arc<dyn JobQueue>,
        config: DispatchConfig,
    ) -> (Self, mpsc::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            Self {
                ctx,
                queue,
                config,
                shutdown_rx,
            },
            shutdown_tx,
        )
    }

    /// Run the loop on a background task.
    pub fn spawn(
        ctx: StageContext,
        queue: Arc<dyn JobQueue>,
        config: DispatchConfig,
    ) -> WorkerHandle {
        let (worker, shutdown_tx) = Self::new(ctx, queue, config);
        WorkerHandle {
            shutdown_tx,
            join_handle: tokio::spawn(worker.run()),
        }
    }

    /// Main loop - consumes self (can only be called once)
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("Worker loop started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }

                received = self.queue.receive(self.config.poll_wait) => {
                    let outcome = match received {
                        Ok(Some(delivery)) => self.handle(delivery).await.map(|_| ()),
                        Ok(None) => continue,
                        Err(e) => Err(e.into()),
                    };
                    if let Err(e) = outcome {
                        error!(error = %e, backoff_secs = self.config.error_backoff.as_secs(), "Worker loop error, backing off");
                        tokio::select! {
                            biased;
                            _ = self.shutdown_rx.recv() => {
                                info!("Shutdown signal received during backoff");
                                break;
                            }
                            _ = tokio::time::sleep(self.config.error_backoff) => {}
                        }
                    }
                }
            }
        }

        info!("Worker stopped");
        Ok(())
    }

    /// Receive and process at most one message.
    pub async fn process_next(&self) -> Result<Option<Disposition>, DispatchError> {
        match self.queue.receive(self.config.poll_wait).await? {
            Some(delivery) => self.handle(delivery).await.map(Some),
            None => Ok(None),
        }
    }

    async fn handle(&self, delivery: Delivery) -> Result<Disposition, DispatchError> {
        let disposition = process_message(&self.ctx, self.queue.as_ref(), &delivery.message).await?;
        self.queue.ack(&delivery.receipt).await?;
        debug!(job_id = %delivery.message.job_id, attempt = delivery.attempt, ?disposition, "Message acked");
        Ok(disposition)
    }
}

/// Process one message up to, but not including, the ack.
///
/// An `Err` means the outcome was not persisted and the message must not be
/// acked.
pub async fn process_message(
    ctx: &StageContext,
    queue: &dyn JobQueue,
    message: &JobMessage,
) -> Result<Disposition, DispatchError> {
    let Some(job) = ctx.db.job_get(&message.job_id).await? else {
        warn!(job_id = %message.job_id, "Dropping message for unknown job");
        return Ok(Disposition::Dropped);
    };

    if job.status.is_settled() {
        debug!(job_id = %job.id, status = %job.status, "Discarding message for settled job");
        return Ok(Disposition::Discarded(job.status));
    }

    let job = match transition(&ctx.db, &job, JobStatus::Running, Actor::Worker, None).await {
        Ok(job) => job,
        Err(TransitionError::Invalid(e)) => {
            // Settled between our read and the claim.
            debug!(job_id = %job.id, error = %e, "Discarding message after lost claim");
            return Ok(Disposition::Discarded(e.from));
        }
        Err(e) => return Err(e.into()),
    };

    info!(job_id = %job.id, stage = %job.stage, project_id = %job.project_id, "Running stage");

    match run_stage(ctx, &job).await {
        Ok(()) => {
            let successor = match job.stage.automatic_successor() {
                Some(next) => {
                    let successor = ctx
                        .db
                        .job_create_successor(&Job::successor_of(&job, next))
                        .await?;
                    queue.enqueue(&JobMessage::new(successor.id.clone())).await?;
                    info!(job_id = %job.id, successor_id = %successor.id, stage = %next, "Successor enqueued");
                    Some(successor)
                }
                None => None,
            };
            let done =
                transition(&ctx.db, &job, job.stage.success_status(), Actor::Worker, None).await?;
            Ok(Disposition::Succeeded {
                status: done.status,
                successor,
            })
        }
        Err(handler_error) => {
            let message = handler_error.to_string();
            error!(job_id = %job.id, stage = %job.stage, error = %message, "Stage failed");
            transition(&ctx.db, &job, JobStatus::Failed, Actor::Worker, Some(&message)).await?;
            Ok(Disposition::Failed { error: message })
        }
    }
}
