//! Job state machine.
//!
//! ```text
//! queued -> running -> complete
//!                   -> failed
//!                   -> awaiting_kpi_approval            (generate_kpis only)
//!                   -> awaiting_recommendation_approval (generate_report only)
//! awaiting_* -> complete                                (approval gate only)
//! ```
//!
//! `running -> running` is accepted as a no-op so a duplicate delivery that
//! races the first claim does not error. Everything else is rejected and the
//! stored job is left untouched.

use tally_db::{DbError, TallyDb};
use tally_protocol::{Job, JobStage, JobStatus};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Who is asking for the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Worker,
    ApprovalGate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid transition for job {job_id} ({stage}): {from} -> {to}")]
pub struct InvalidTransition {
    pub job_id: String,
    pub stage: JobStage,
    pub from: JobStatus,
    pub to: JobStatus,
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error(transparent)]
    Invalid(#[from] InvalidTransition),

    #[error("Job {0} disappeared during transition")]
    Missing(String),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Outcome of a legal transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Apply,
    NoOp,
}

fn table(stage: JobStage, from: JobStatus, to: JobStatus, actor: Actor) -> Option<Step> {
    use JobStatus::*;

    let worker = actor == Actor::Worker;
    match from {
        Queued => (worker && to == Running).then_some(Step::Apply),
        Running => match to {
            Running => worker.then_some(Step::NoOp),
            Failed => worker.then_some(Step::Apply),
            Complete | AwaitingKpiApproval | AwaitingRecommendationApproval => {
                (worker && to == stage.success_status()).then_some(Step::Apply)
            }
            Queued => None,
        },
        // A gate only closes the stage that opened it.
        AwaitingKpiApproval | AwaitingRecommendationApproval => {
            let gate = actor == Actor::ApprovalGate;
            (gate && to == Complete && from == stage.success_status()).then_some(Step::Apply)
        }
        Complete | Failed => None,
    }
}

/// Check a transition against the table without touching storage.
pub fn check_transition(job: &Job, to: JobStatus, actor: Actor) -> Result<(), InvalidTransition> {
    table(job.stage, job.status, to, actor)
        .map(|_| ())
        .ok_or_else(|| invalid(job, job.status, to))
}

fn invalid(job: &Job, from: JobStatus, to: JobStatus) -> InvalidTransition {
    InvalidTransition {
        job_id: job.id.to_string(),
        stage: job.stage,
        from,
        to,
    }
}

/// Move `job` to `to` and return the stored job.
///
/// `error` is recorded with the new status (only meaningful for `failed`).
/// The write is a compare-and-set on `job.status`; if the stored status has
/// moved on, the transition is re-checked against what is actually stored.
pub async fn transition(
    db: &TallyDb,
    job: &Job,
    to: JobStatus,
    actor: Actor,
    error: Option<&str>,
) -> Result<Job, TransitionError> {
    let step = match table(job.stage, job.status, to, actor) {
        Some(step) => step,
        None => {
            let err = invalid(job, job.status, to);
            warn!(
                job_id = %job.id,
                stage = %job.stage,
                from = %job.status,
                to = %to,
                "Rejected job transition"
            );
            return Err(err.into());
        }
    };

    if step == Step::NoOp {
        debug!(job_id = %job.id, status = %to, "Transition is a no-op");
        return Ok(job.clone());
    }

    let applied = db.job_compare_and_set(&job.id, job.status, to, error).await?;
    let stored = db
        .job_get(&job.id)
        .await?
        .ok_or_else(|| TransitionError::Missing(job.id.to_string()))?;

    if applied {
        info!(
            job_id = %job.id,
            stage = %job.stage,
            from = %job.status,
            to = %to,
            "Job transitioned"
        );
        return Ok(stored);
    }

    // Someone else moved the job first. Accept only if that leaves us where we
    // wanted to be via a no-op step.
    match table(stored.stage, stored.status, to, actor) {
        Some(Step::NoOp) => Ok(stored),
        _ => {
            warn!(
                job_id = %job.id,
                expected = %job.status,
                actual = %stored.status,
                to = %to,
                "Lost job transition race"
            );
            Err(invalid(&stored, stored.status, to).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_ids::{DatasetId, ProjectId};

    fn job(stage: JobStage, status: JobStatus) -> Job {
        Job {
            status,
            ..Job::new(ProjectId::new(), DatasetId::new(), stage)
        }
    }

    const ALL_STATUSES: [JobStatus; 6] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::AwaitingKpiApproval,
        JobStatus::AwaitingRecommendationApproval,
        JobStatus::Complete,
        JobStatus::Failed,
    ];

    #[test]
    fn test_worker_transitions_per_stage() {
        for stage in JobStage::ALL {
            let queued = job(stage, JobStatus::Queued);
            let running = job(stage, JobStatus::Running);
            assert!(check_transition(&queued, JobStatus::Running, Actor::Worker).is_ok());
            assert!(check_transition(&running, JobStatus::Failed, Actor::Worker).is_ok());
            assert!(check_transition(&running, stage.success_status(), Actor::Worker).is_ok());
        }

        let kpis = job(JobStage::GenerateKpis, JobStatus::Running);
        assert!(
            check_transition(&kpis, JobStatus::AwaitingRecommendationApproval, Actor::Worker)
                .is_err()
        );
        assert!(check_transition(&kpis, JobStatus::Complete, Actor::Worker).is_err());

        let profile = job(JobStage::Profile, JobStatus::Running);
        assert!(check_transition(&profile, JobStatus::AwaitingKpiApproval, Actor::Worker).is_err());
    }

    #[test]
    fn test_terminal_states_never_move() {
        for stage in JobStage::ALL {
            for from in [JobStatus::Complete, JobStatus::Failed] {
                for to in ALL_STATUSES {
                    for actor in [Actor::Worker, Actor::ApprovalGate] {
                        assert!(
                            check_transition(&job(stage, from), to, actor).is_err(),
                            "{stage} {from} -> {to} by {actor:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_only_gate_resolves_awaiting() {
        let awaiting = job(JobStage::GenerateKpis, JobStatus::AwaitingKpiApproval);
        assert!(check_transition(&awaiting, JobStatus::Complete, Actor::Worker).is_err());
        assert!(check_transition(&awaiting, JobStatus::Running, Actor::Worker).is_err());
        assert!(check_transition(&awaiting, JobStatus::Complete, Actor::ApprovalGate).is_ok());

        let report = job(JobStage::GenerateReport, JobStatus::AwaitingRecommendationApproval);
        assert!(check_transition(&report, JobStatus::Complete, Actor::ApprovalGate).is_ok());
        assert!(check_transition(&report, JobStatus::Failed, Actor::ApprovalGate).is_err());
    }

    #[test]
    fn test_gate_only_closes_its_own_stage() {
        let awaiting = [
            JobStatus::AwaitingKpiApproval,
            JobStatus::AwaitingRecommendationApproval,
        ];
        for stage in JobStage::ALL {
            for from in awaiting {
                let result =
                    check_transition(&job(stage, from), JobStatus::Complete, Actor::ApprovalGate);
                assert_eq!(result.is_ok(), stage.success_status() == from, "{stage} {from}");
            }
        }
    }

    #[test]
    fn test_running_is_a_noop_for_the_worker_only() {
        let running = job(JobStage::ComputeKpis, JobStatus::Running);
        assert_eq!(
            table(running.stage, running.status, JobStatus::Running, Actor::Worker),
            Some(Step::NoOp)
        );
        assert!(check_transition(&running, JobStatus::Running, Actor::ApprovalGate).is_err());
        assert!(check_transition(&running, JobStatus::Queued, Actor::Worker).is_err());
    }

    #[test]
    fn test_queued_cannot_skip_running() {
        let queued = job(JobStage::Profile, JobStatus::Queued);
        for to in [JobStatus::Complete, JobStatus::Failed, JobStatus::AwaitingKpiApproval] {
            let err = check_transition(&queued, to, Actor::Worker).unwrap_err();
            assert_eq!(err.from, JobStatus::Queued);
            assert_eq!(err.to, to);
        }
    }
}
