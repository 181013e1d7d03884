//! Persisted records.

use crate::types::{JobStage, JobStatus, KpiStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_ids::{DatasetId, JobId, KpiId, ProjectId, ReportId};
use tally_plan::{BreakdownEntry, KpiPlan, MetricValue};

use crate::profile::DatasetProfile;

/// Ownership root for datasets, KPIs, jobs and reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub business_description: String,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, business_description: impl Into<String>) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            business_description: business_description.into(),
            created_at: Utc::now(),
        }
    }
}

/// Uploaded dataset. The file content is stored separately and never copied
/// into other records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub project_id: ProjectId,
    pub filename: String,
    pub size_bytes: u64,
    pub profile: Option<DatasetProfile>,
    pub created_at: DateTime<Utc>,
}

impl Dataset {
    pub fn new(project_id: ProjectId, filename: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            id: DatasetId::new(),
            project_id,
            filename: filename.into(),
            size_bytes,
            profile: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_profiled(&self) -> bool {
        self.profile.is_some()
    }
}

/// One unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub project_id: ProjectId,
    pub dataset_id: DatasetId,
    pub stage: JobStage,
    pub status: JobStatus,
    pub error: Option<String>,
    /// The job whose success created this one. At most one job has a given parent.
    pub parent_job_id: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(project_id: ProjectId, dataset_id: DatasetId, stage: JobStage) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            project_id,
            dataset_id,
            stage,
            status: JobStatus::Queued,
            error: None,
            parent_job_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Successor of `parent` at `stage`, in the same project and dataset.
    pub fn successor_of(parent: &Job, stage: JobStage) -> Self {
        Self {
            parent_job_id: Some(parent.id.clone()),
            ..Self::new(parent.project_id.clone(), parent.dataset_id.clone(), stage)
        }
    }
}

/// Queue payload. Only the id travels; the job record is always re-read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: JobId,
}

impl JobMessage {
    pub fn new(job_id: JobId) -> Self {
        Self { job_id }
    }
}

/// A KPI as proposed by the model, before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiProposal {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub formula: String,
    pub plan: KpiPlan,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    pub id: KpiId,
    pub project_id: ProjectId,
    /// The `generate_kpis` job that proposed this KPI.
    pub round_job_id: JobId,
    pub name: String,
    pub description: String,
    pub rationale: String,
    pub formula: String,
    pub plan: KpiPlan,
    pub target: Option<String>,
    pub unit: Option<String>,
    pub status: KpiStatus,
    /// `None` until computed. A computed KPI with nothing to measure holds
    /// `Some(MetricValue::NoData)`.
    pub value: Option<MetricValue>,
    pub value_label: Option<String>,
    pub value_breakdown: Option<Vec<BreakdownEntry>>,
    pub computed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Kpi {
    pub fn from_proposal(
        project_id: ProjectId,
        round_job_id: JobId,
        proposal: KpiProposal,
    ) -> Self {
        Self {
            id: KpiId::new(),
            project_id,
            round_job_id,
            name: proposal.name,
            description: proposal.description,
            rationale: proposal.rationale,
            formula: proposal.formula,
            plan: proposal.plan,
            target: proposal.target,
            unit: proposal.unit,
            status: KpiStatus::Proposed,
            value: None,
            value_label: None,
            value_breakdown: None,
            computed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_computed(&self) -> bool {
        self.value.is_some()
    }

    pub fn summary(&self) -> KpiSummary {
        KpiSummary {
            name: self.name.clone(),
            formula: self.formula.clone(),
            value: self.value,
            value_label: self.value_label.clone(),
            unit: self.unit.clone(),
            target: self.target.clone(),
        }
    }
}

/// Computed KPI as handed to the report writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSummary {
    pub name: String,
    pub formula: String,
    pub value: Option<MetricValue>,
    pub value_label: Option<String>,
    pub unit: Option<String>,
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSignal {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// low, medium or high
    #[serde(default)]
    pub severity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceNote {
    pub regulation: String,
    #[serde(default)]
    pub observation: String,
    #[serde(default)]
    pub action_required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub kpi_name: String,
    #[serde(default)]
    pub horizon_days: u32,
    /// up, down or flat
    #[serde(default)]
    pub trend: String,
    #[serde(default)]
    pub narrative: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requires_approval: bool,
    /// `None` until a human decides.
    #[serde(default)]
    pub approved: Option<bool>,
}

impl Recommendation {
    pub fn is_actionable(&self) -> bool {
        !self.requires_approval || self.approved == Some(true)
    }

    pub fn is_pending(&self) -> bool {
        self.requires_approval && self.approved.is_none()
    }
}

/// Report content as drafted by the model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReportDraft {
    #[serde(default)]
    pub business_model_summary: String,
    #[serde(default)]
    pub risks: Vec<RiskSignal>,
    #[serde(default)]
    pub compliance_notes: Vec<ComplianceNote>,
    #[serde(default)]
    pub forecasts: Vec<Forecast>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryReport {
    pub id: ReportId,
    pub project_id: ProjectId,
    pub job_id: JobId,
    pub business_model_summary: String,
    pub risks: Vec<RiskSignal>,
    pub compliance_notes: Vec<ComplianceNote>,
    pub forecasts: Vec<Forecast>,
    pub recommendations: Vec<Recommendation>,
    pub created_at: DateTime<Utc>,
}

impl AdvisoryReport {
    /// Build a report from a draft. Any decision the draft carries is
    /// discarded: only a human sets `approved`.
    pub fn from_draft(project_id: ProjectId, job_id: JobId, draft: ReportDraft) -> Self {
        let recommendations = draft
            .recommendations
            .into_iter()
            .map(|rec| Recommendation {
                approved: None,
                ..rec
            })
            .collect();
        Self {
            id: ReportId::new(),
            project_id,
            job_id,
            business_model_summary: draft.business_model_summary,
            risks: draft.risks,
            compliance_notes: draft.compliance_notes,
            forecasts: draft.forecasts,
            recommendations,
            created_at: Utc::now(),
        }
    }

    pub fn actionable_recommendations(&self) -> Vec<&Recommendation> {
        self.recommendations
            .iter()
            .filter(|rec| rec.is_actionable())
            .collect()
    }

    /// True once every recommendation that needs sign-off has a decision.
    pub fn all_decided(&self) -> bool {
        !self.recommendations.iter().any(Recommendation::is_pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(title: &str, requires_approval: bool, approved: Option<bool>) -> Recommendation {
        Recommendation {
            title: title.to_string(),
            description: String::new(),
            requires_approval,
            approved,
        }
    }

    #[test]
    fn test_pending_recommendation_is_not_actionable() {
        let draft = ReportDraft {
            recommendations: vec![
                rec("informational", false, None),
                rec("needs sign-off", true, None),
                rec("pre-approved by model", true, Some(true)),
            ],
            ..Default::default()
        };
        let report = AdvisoryReport::from_draft(ProjectId::new(), JobId::new(), draft);

        let actionable: Vec<_> = report
            .actionable_recommendations()
            .iter()
            .map(|r| r.title.as_str())
            .collect();
        assert_eq!(actionable, vec!["informational"]);
        assert!(!report.all_decided());
    }

    #[test]
    fn test_successor_links_parent() {
        let parent = Job::new(ProjectId::new(), DatasetId::new(), JobStage::Profile);
        let child = Job::successor_of(&parent, JobStage::GenerateKpis);
        assert_eq!(child.parent_job_id.as_ref(), Some(&parent.id));
        assert_eq!(child.dataset_id, parent.dataset_id);
        assert_eq!(child.status, JobStatus::Queued);
    }

    #[test]
    fn test_proposal_starts_uncomputed() {
        let proposal: KpiProposal = serde_json::from_value(serde_json::json!({
            "name": "Paid revenue",
            "plan": {"metric": "sum", "column": "revenue"}
        }))
        .unwrap();
        let kpi = Kpi::from_proposal(ProjectId::new(), JobId::new(), proposal);
        assert_eq!(kpi.status, KpiStatus::Proposed);
        assert!(!kpi.is_computed());
        assert!(kpi.value_breakdown.is_none());
    }
}
