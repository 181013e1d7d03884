//! Explicit re-run of a failed job.
//!
//! The worker never retries on its own. A retry is a new job of the same stage
//! and dataset whose parent is the failed job, so each failure can be retried
//! at most once and the lineage back to the proposal round stays walkable.

use tally_db::{DbError, TallyDb};
use tally_ids::JobId;
use tally_protocol::{Job, JobMessage, JobStatus};
use thiserror::Error;
use tracing::info;

use crate::queue::{JobQueue, QueueError};

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {job_id} is {status}; only failed jobs can be retried")]
    NotFailed { job_id: JobId, status: JobStatus },

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Create and enqueue a fresh job replacing a failed one.
///
/// Retrying the same failed job twice returns the retry created the first time.
pub async fn retry_job(
    db: &TallyDb,
    queue: &dyn JobQueue,
    job_id: &JobId,
) -> Result<Job, RetryError> {
    let failed = db
        .job_get(job_id)
        .await?
        .ok_or_else(|| RetryError::NotFound(job_id.clone()))?;
    if failed.status != JobStatus::Failed {
        return Err(RetryError::NotFailed {
            job_id: failed.id,
            status: failed.status,
        });
    }

    let retry = db
        .job_create_successor(&Job::successor_of(&failed, failed.stage))
        .await?;
    queue.enqueue(&JobMessage::new(retry.id.clone())).await?;

    info!(job_id = %retry.id, retry_of = %failed.id, stage = %retry.stage, "Job retry enqueued");
    Ok(retry)
}
