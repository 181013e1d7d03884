//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use serde::Serialize;
use std::fmt;
use std::path::Path;
use tally_ids::{JobId, ProjectId};
use tally_pipeline::{ApprovalError, RetryError};

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    /// The main error message
    pub message: String,
    /// Additional context about what was happening
    pub context: Option<String>,
    /// Suggestions for how to fix the error
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(
        mut self,
        suggestions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.suggestions.extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    pub fn file_not_found(path: &Path) -> Self {
        Self::new(format!("File not found: {}", path.display()))
            .with_context("The specified file does not exist")
            .with_suggestions([
                format!("TRY: Check if the file exists: ls -la {}", path.display()),
                format!(
                    "TRY: Look for similar files: ls {}",
                    path.parent()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| ".".to_string())
                ),
            ])
    }

    pub fn cannot_read_file(path: &Path, reason: &str) -> Self {
        Self::new(format!("Cannot read file: {}", path.display()))
            .with_context(reason.to_string())
            .with_suggestions([
                format!("TRY: Check file permissions: ls -la {}", path.display()),
                "TRY: Ensure the file is not open in another program".to_string(),
            ])
    }

    pub fn unsupported_upload(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("(no extension)");
        Self::new(format!("Unsupported file type: {}", ext))
            .with_context(format!("Cannot upload: {}", path.display()))
            .with_suggestions([
                "TRY: Export the sheet as CSV and upload the .csv file".to_string(),
                "TRY: Supported types: csv, txt".to_string(),
            ])
    }

    pub fn project_not_found(id: &ProjectId) -> Self {
        Self::new(format!("Project not found: {}", id))
            .with_suggestion("TRY: List projects: tally project list")
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

/// Explain an approval failure in terms of the next command to run.
pub fn approval_help(project_id: &ProjectId, err: ApprovalError) -> HelpfulError {
    let base = HelpfulError::new(err.to_string());
    match err {
        ApprovalError::ProjectNotFound(id) => HelpfulError::project_not_found(&id),
        ApprovalError::NoKpiRound(_) => base
            .with_context("KPIs are proposed after a dataset has been profiled")
            .with_suggestion(format!(
                "TRY: Check pipeline progress: tally job list --project {}",
                project_id
            )),
        ApprovalError::GateNotOpen { status, .. } => base
            .with_context(format!("The gate can only be decided once; it is {}", status))
            .with_suggestion(format!(
                "TRY: Check pipeline progress: tally job list --project {}",
                project_id
            )),
        ApprovalError::NoDecisions => base.with_suggestions([
            "TRY: Pass --approve <KPI_ID> or --reject <KPI_ID>".to_string(),
            format!("TRY: See pending KPIs: tally kpi list --project {}", project_id),
        ]),
        ApprovalError::UnknownKpi(_) | ApprovalError::KpiNotInRound { .. } => base
            .with_context("Only KPIs from the round awaiting approval can be decided")
            .with_suggestion(format!(
                "TRY: tally kpi list --project {} --pending",
                project_id
            )),
        ApprovalError::ReportNotFound(_) | ApprovalError::ReportNotInProject { .. } => base
            .with_suggestion(format!("TRY: tally report show --project {}", project_id)),
        other => HelpfulError::new(other.to_string()),
    }
}

pub fn retry_help(job_id: &JobId, err: RetryError) -> HelpfulError {
    let base = HelpfulError::new(err.to_string());
    match err {
        RetryError::NotFound(_) => base.with_suggestion("TRY: tally job list"),
        RetryError::NotFailed { .. } => base
            .with_context("Running, waiting and complete jobs are left alone")
            .with_suggestion(format!("TRY: tally job show {}", job_id)),
        other => HelpfulError::new(other.to_string()),
    }
}

#[derive(Serialize)]
struct JsonError {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    suggestions: Vec<String>,
}

/// Print an error as a JSON object on stdout for `--json` callers.
pub fn print_json_error(err: &anyhow::Error) {
    let payload = match err.downcast_ref::<HelpfulError>() {
        Some(helpful) => JsonError {
            error: helpful.message.clone(),
            context: helpful.context.clone(),
            suggestions: helpful.suggestions.clone(),
        },
        None => JsonError {
            error: format!("{:#}", err),
            context: None,
            suggestions: Vec::new(),
        },
    };
    match serde_json::to_string_pretty(&payload) {
        Ok(json) => println!("{}", json),
        Err(_) => eprintln!("{:?}", err),
    }
}
