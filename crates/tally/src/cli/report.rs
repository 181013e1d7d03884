//! Report commands - read the advisory report and decide its recommendations

use clap::Subcommand;
use comfy_table::Color;
use tally_db::TallyDb;
use tally_ids::{ProjectId, ReportId};
use tally_pipeline::{record_recommendation_approval, RecommendationApprovalRequest};
use tally_protocol::{AdvisoryReport, Recommendation};

use super::context::CliContext;
use super::error::{approval_help, HelpfulError};
use super::output::{format_time, print_json, print_table_colored};
use super::project::require_project;

#[derive(Subcommand, Debug, Clone)]
pub enum ReportAction {
    /// Show a project's latest report, or a specific one
    Show {
        #[arg(short, long)]
        project: ProjectId,
        /// Report ID (defaults to the latest)
        #[arg(long)]
        report: Option<ReportId>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Approve or reject recommendations by their index in `report show`
    ///
    /// With no indexes, confirms a report that has nothing left to decide.
    Approve {
        #[arg(short, long)]
        project: ProjectId,
        /// Report ID
        #[arg(long)]
        report: ReportId,
        /// Recommendation index to approve (repeatable)
        #[arg(long = "approve", value_name = "INDEX")]
        approve: Vec<usize>,
        /// Recommendation index to reject (repeatable)
        #[arg(long = "reject", value_name = "INDEX")]
        reject: Vec<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(action: ReportAction, ctx: &CliContext) -> anyhow::Result<()> {
    let db = ctx.open_db().await?;
    match action {
        ReportAction::Show {
            project,
            report,
            json,
        } => {
            require_project(&db, &project).await?;
            let found = match &report {
                Some(id) => db
                    .report_get(id)
                    .await?
                    .filter(|r| r.project_id == project),
                None => db.report_latest_for_project(&project).await?,
            };
            let Some(report) = found else {
                return Err(HelpfulError::new("No report found")
                    .with_context("Reports are drafted after approved KPIs are computed")
                    .with_suggestion(format!("TRY: tally job list --project {}", project))
                    .into());
            };
            if json {
                return print_json(&report);
            }
            print_report(&report);
            Ok(())
        }
        ReportAction::Approve {
            project,
            report,
            approve,
            reject,
            json,
        } => {
            let report = decide_recommendations(&db, &project, report, approve, reject).await?;
            if json {
                return print_json(&report);
            }
            print_recommendations(&report.recommendations);
            if report.all_decided() {
                println!("All recommendations decided; the pipeline run is complete.");
            } else {
                let pending = report
                    .recommendations
                    .iter()
                    .filter(|r| r.is_pending())
                    .count();
                println!("{} recommendation(s) still awaiting a decision", pending);
            }
            Ok(())
        }
    }
}

/// Record recommendation decisions by index.
///
/// An empty decision set is a confirmation and is only accepted when no gated
/// recommendation is still pending.
pub async fn decide_recommendations(
    db: &TallyDb,
    project: &ProjectId,
    report: ReportId,
    approve: Vec<usize>,
    reject: Vec<usize>,
) -> anyhow::Result<AdvisoryReport> {
    if approve.is_empty() && reject.is_empty() {
        let pending = db
            .report_get(&report)
            .await?
            .map(|r| r.recommendations.iter().filter(|rec| rec.is_pending()).count())
            .unwrap_or(0);
        if pending > 0 {
            return Err(HelpfulError::new("No decisions submitted")
                .with_context(format!("{} recommendation(s) still need a decision", pending))
                .with_suggestion("TRY: Pass --approve <INDEX> or --reject <INDEX>")
                .with_suggestion(format!(
                    "TRY: See indexes: tally report show --project {}",
                    project
                ))
                .into());
        }
    }

    let mut request = RecommendationApprovalRequest::new(project.clone(), report);
    for index in approve {
        request = request.decide(index, true);
    }
    for index in reject {
        request = request.decide(index, false);
    }

    record_recommendation_approval(db, &request)
        .await
        .map_err(|e| anyhow::Error::from(approval_help(project, e)))
}

fn print_report(report: &AdvisoryReport) {
    println!("Report {} ({})", report.id, format_time(report.created_at));
    println!();
    println!("{}", report.business_model_summary);

    if !report.risks.is_empty() {
        println!();
        println!("Risks:");
        for risk in &report.risks {
            println!("  [{}] {}: {}", risk.severity, risk.title, risk.description);
        }
    }

    if !report.compliance_notes.is_empty() {
        println!();
        println!("Compliance:");
        for note in &report.compliance_notes {
            let marker = if note.action_required { "!" } else { "-" };
            println!("  {} {}: {}", marker, note.regulation, note.observation);
        }
    }

    if !report.forecasts.is_empty() {
        println!();
        println!("Forecasts:");
        for forecast in &report.forecasts {
            println!(
                "  {} ({} days, {}): {}",
                forecast.kpi_name, forecast.horizon_days, forecast.trend, forecast.narrative
            );
        }
    }

    if !report.recommendations.is_empty() {
        println!();
        print_recommendations(&report.recommendations);
    }
}

fn decision(rec: &Recommendation) -> (String, Option<Color>) {
    match (rec.requires_approval, rec.approved) {
        (false, _) => ("not gated".to_string(), Some(Color::DarkGrey)),
        (true, None) => ("pending".to_string(), Some(Color::Yellow)),
        (true, Some(true)) => ("approved".to_string(), Some(Color::Green)),
        (true, Some(false)) => ("rejected".to_string(), Some(Color::Red)),
    }
}

fn print_recommendations(recommendations: &[Recommendation]) {
    let rows = recommendations
        .iter()
        .enumerate()
        .map(|(index, rec)| {
            vec![
                (index.to_string(), None),
                (rec.title.clone(), None),
                decision(rec),
                (rec.description.clone(), None),
            ]
        })
        .collect();
    print_table_colored(&["#", "RECOMMENDATION", "DECISION", "DETAIL"], rows);
}
