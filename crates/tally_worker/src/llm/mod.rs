//! LLM collaborator
//!
//! The model interprets the business model, proposes KPI plans and drafts the
//! advisory report. Everything it
//! returns is untrusted: proposals are validated before they are stored and
//! report decisions are discarded before a human sees them.

use async_trait::async_trait;
use std::sync::Arc;
use tally_protocol::{DatasetProfile, KpiProposal, KpiSummary, ReportDraft};
use tracing::debug;

mod error;
mod openai;
mod prompts;

pub use error::LlmError;
pub use openai::OpenAiCollaborator;

use crate::config::LlmConfig;

#[async_trait]
pub trait LlmCollaborator: Send + Sync {
    /// Summarize how the business makes money, in a few sentences.
    async fn interpret_business_model(
        &self,
        profile: &DatasetProfile,
        business_description: &str,
    ) -> Result<String, LlmError>;

    /// Propose KPIs for a profiled dataset.
    async fn propose_kpis(
        &self,
        profile: &DatasetProfile,
        business_description: &str,
        business_model: &str,
    ) -> Result<Vec<KpiProposal>, LlmError>;

    /// Draft an advisory report from computed KPIs.
    async fn generate_report(
        &self,
        kpis: &[KpiSummary],
        business_description: &str,
        business_model: &str,
    ) -> Result<ReportDraft, LlmError>;
}

/// Collaborator used when `[llm] provider = "disabled"`. Every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCollaborator;

#[async_trait]
impl LlmCollaborator for DisabledCollaborator {
    async fn interpret_business_model(
        &self,
        _profile: &DatasetProfile,
        _business_description: &str,
    ) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }

    async fn propose_kpis(
        &self,
        _profile: &DatasetProfile,
        _business_description: &str,
        _business_model: &str,
    ) -> Result<Vec<KpiProposal>, LlmError> {
        Err(LlmError::Disabled)
    }

    async fn generate_report(
        &self,
        _kpis: &[KpiSummary],
        _business_description: &str,
        _business_model: &str,
    ) -> Result<ReportDraft, LlmError> {
        Err(LlmError::Disabled)
    }
}

/// Create the collaborator named by `config.provider`.
pub fn create_collaborator(config: &LlmConfig) -> Result<Arc<dyn LlmCollaborator>, LlmError> {
    debug!(provider = %config.provider, model = %config.model, "Creating LLM collaborator");
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiCollaborator::from_config(config)?)),
        "disabled" | "none" => Ok(Arc::new(DisabledCollaborator)),
        other => Err(LlmError::UnknownProvider(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_collaborator_by_provider() {
        let disabled = LlmConfig {
            provider: "disabled".to_string(),
            ..LlmConfig::default()
        };
        assert!(create_collaborator(&disabled).is_ok());

        let unknown = LlmConfig {
            provider: "llamacpp".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            create_collaborator(&unknown).err(),
            Some(LlmError::UnknownProvider(p)) if p == "llamacpp"
        ));
    }

    #[tokio::test]
    async fn test_disabled_collaborator_fails_every_call() {
        let llm = DisabledCollaborator;
        let err = llm.generate_report(&[], "Bakery", "").await.unwrap_err();
        assert!(matches!(err, LlmError::Disabled));
        let profile = DatasetProfile {
            row_count: 0,
            column_count: 0,
            columns: vec![],
            potential_join_keys: vec![],
            date_columns: vec![],
        };
        let err = llm.interpret_business_model(&profile, "Bakery").await.unwrap_err();
        assert!(matches!(err, LlmError::Disabled));
    }
}
