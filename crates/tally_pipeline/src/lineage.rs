//! Walking a job's parent chain.

use tally_db::{DbError, TallyDb};
use tally_protocol::{Job, JobStage};

/// Parent links followed before giving up; a chain longer than this is corrupt.
const MAX_DEPTH: usize = 64;

/// Nearest ancestor of `job` (or `job` itself) at `stage`.
///
/// A `compute_kpis` job, or a retry of one, finds the `generate_kpis` job
/// that proposed the KPIs it should compute.
pub async fn nearest_of_stage(
    db: &TallyDb,
    job: &Job,
    stage: JobStage,
) -> Result<Option<Job>, DbError> {
    let mut current = job.clone();
    for _ in 0..MAX_DEPTH {
        if current.stage == stage {
            return Ok(Some(current));
        }
        let Some(parent_id) = current.parent_job_id.as_ref() else {
            return Ok(None);
        };
        match db.job_get(parent_id).await? {
            Some(parent) => current = parent,
            None => return Ok(None),
        }
    }
    Err(DbError::corrupt(format!(
        "job {} has a parent chain deeper than {}",
        job.id, MAX_DEPTH
    )))
}
