//! Canonical enums (use these everywhere).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pipeline stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    /// Parse the uploaded file and infer column metadata
    Profile,
    /// Ask the model for KPI proposals, then wait for sign-off
    GenerateKpis,
    /// Execute every approved KPI plan
    ComputeKpis,
    /// Draft the advisory report, then wait for sign-off
    GenerateReport,
}

impl JobStage {
    pub const ALL: [JobStage; 4] = [
        JobStage::Profile,
        JobStage::GenerateKpis,
        JobStage::ComputeKpis,
        JobStage::GenerateReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Profile => "profile",
            JobStage::GenerateKpis => "generate_kpis",
            JobStage::ComputeKpis => "compute_kpis",
            JobStage::GenerateReport => "generate_report",
        }
    }

    /// Stage the worker enqueues itself after this one succeeds.
    ///
    /// `generate_kpis` has none: its successor is created by KPI approval.
    pub fn automatic_successor(&self) -> Option<JobStage> {
        match self {
            JobStage::Profile => Some(JobStage::GenerateKpis),
            JobStage::GenerateKpis => None,
            JobStage::ComputeKpis => Some(JobStage::GenerateReport),
            JobStage::GenerateReport => None,
        }
    }

    /// Status a running job of this stage moves to when its handler succeeds.
    pub fn success_status(&self) -> JobStatus {
        match self {
            JobStage::GenerateKpis => JobStatus::AwaitingKpiApproval,
            JobStage::GenerateReport => JobStatus::AwaitingRecommendationApproval,
            JobStage::Profile | JobStage::ComputeKpis => JobStatus::Complete,
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "profile" => Ok(JobStage::Profile),
            "generate_kpis" => Ok(JobStage::GenerateKpis),
            "compute_kpis" => Ok(JobStage::ComputeKpis),
            "generate_report" => Ok(JobStage::GenerateReport),
            _ => Err(format!("Invalid job stage: '{}'", s)),
        }
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created and enqueued, not yet picked up
    #[default]
    Queued,
    /// A worker is executing the stage handler
    Running,
    /// KPI proposals persisted, waiting on human review
    AwaitingKpiApproval,
    /// Report drafted, waiting on recommendation review
    AwaitingRecommendationApproval,
    /// Finished successfully
    Complete,
    /// Handler failed; `error` holds the cause
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::AwaitingKpiApproval => "awaiting_kpi_approval",
            JobStatus::AwaitingRecommendationApproval => "awaiting_recommendation_approval",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(
            self,
            JobStatus::AwaitingKpiApproval | JobStatus::AwaitingRecommendationApproval
        )
    }

    /// Settled jobs are never touched by the worker again.
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || self.is_awaiting()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "awaiting_kpi_approval" => Ok(JobStatus::AwaitingKpiApproval),
            "awaiting_recommendation_approval" => Ok(JobStatus::AwaitingRecommendationApproval),
            "complete" | "completed" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Invalid job status: '{}'", s)),
        }
    }
}

/// Review status of a proposed KPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KpiStatus {
    #[default]
    Proposed,
    Approved,
    Rejected,
}

impl KpiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KpiStatus::Proposed => "proposed",
            KpiStatus::Approved => "approved",
            KpiStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for KpiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for KpiStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "proposed" => Ok(KpiStatus::Proposed),
            "approved" => Ok(KpiStatus::Approved),
            "rejected" => Ok(KpiStatus::Rejected),
            _ => Err(format!("Invalid KPI status: '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_str_roundtrip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::AwaitingKpiApproval,
            JobStatus::AwaitingRecommendationApproval,
            JobStatus::Complete,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        for stage in JobStage::ALL {
            assert_eq!(stage.as_str().parse::<JobStage>().unwrap(), stage);
        }
    }

    #[test]
    fn test_settled_states() {
        assert!(!JobStatus::Queued.is_settled());
        assert!(!JobStatus::Running.is_settled());
        assert!(JobStatus::AwaitingKpiApproval.is_settled());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::AwaitingRecommendationApproval.is_terminal());
    }

    #[test]
    fn test_stage_progression() {
        assert_eq!(
            JobStage::Profile.automatic_successor(),
            Some(JobStage::GenerateKpis)
        );
        assert_eq!(JobStage::GenerateKpis.automatic_successor(), None);
        assert_eq!(
            JobStage::GenerateReport.success_status(),
            JobStatus::AwaitingRecommendationApproval
        );
        assert_eq!(JobStage::ComputeKpis.success_status(), JobStatus::Complete);
    }

    #[test]
    fn test_serde_uses_db_strings() {
        let json = serde_json::to_string(&JobStatus::AwaitingKpiApproval).unwrap();
        assert_eq!(json, "\"awaiting_kpi_approval\"");
    }
}
