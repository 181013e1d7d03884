//! KPI commands - review proposals and read computed values

use clap::Subcommand;
use comfy_table::Color;
use tally_ids::{KpiId, ProjectId};
use tally_pipeline::{record_kpi_approval, KpiApprovalRequest};
use tally_protocol::{Kpi, KpiStatus};

use super::context::CliContext;
use super::error::{approval_help, HelpfulError};
use super::output::{
    format_metric, format_time, kpi_status_color, print_json, print_table, print_table_colored,
    truncate,
};
use super::project::require_project;

#[derive(Subcommand, Debug, Clone)]
pub enum KpiAction {
    /// List a project's KPIs
    List {
        #[arg(short, long)]
        project: ProjectId,
        /// Only KPIs still waiting for review
        #[arg(long)]
        pending: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one KPI with its plan and breakdown
    Show {
        /// KPI ID
        id: KpiId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Approve or reject proposed KPIs
    ///
    /// Approving at least one KPI queues the compute job. KPIs left out keep
    /// their current status.
    Approve {
        #[arg(short, long)]
        project: ProjectId,
        /// KPI to approve (repeatable)
        #[arg(long = "approve", value_name = "KPI_ID")]
        approve: Vec<KpiId>,
        /// KPI to reject (repeatable)
        #[arg(long = "reject", value_name = "KPI_ID")]
        reject: Vec<KpiId>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(action: KpiAction, ctx: &CliContext) -> anyhow::Result<()> {
    let db = ctx.open_db().await?;
    match action {
        KpiAction::List {
            project,
            pending,
            json,
        } => {
            require_project(&db, &project).await?;
            let kpis: Vec<Kpi> = db
                .kpi_list_for_project(&project)
                .await?
                .into_iter()
                .filter(|k| !pending || k.status == KpiStatus::Proposed)
                .collect();
            if json {
                return print_json(&kpis);
            }
            if kpis.is_empty() {
                println!("No KPIs found.");
                return Ok(());
            }
            print_kpi_table(&kpis);
            Ok(())
        }
        KpiAction::Show { id, json } => {
            let kpi = db.kpi_get(&id).await?.ok_or_else(|| {
                HelpfulError::new(format!("KPI not found: {}", id))
                    .with_suggestion("TRY: tally kpi list --project <PROJECT_ID>")
            })?;
            if json {
                return print_json(&kpi);
            }
            print_kpi_details(&kpi)
        }
        KpiAction::Approve {
            project,
            approve,
            reject,
            json,
        } => {
            let mut request = KpiApprovalRequest::new(project.clone());
            for id in approve {
                request = request.approve(id);
            }
            for id in reject {
                request = request.reject(id);
            }

            let queue = ctx.queue(&db);
            let outcome = record_kpi_approval(&db, queue.as_ref(), &request)
                .await
                .map_err(|e| approval_help(&project, e))?;
            if json {
                return print_json(&serde_json::json!({
                    "kpis": outcome.kpis,
                    "gate_job": outcome.gate_job,
                    "compute_job": outcome.compute_job,
                }));
            }

            print_kpi_table(&outcome.kpis);
            match &outcome.compute_job {
                Some(job) => println!("Compute job {} queued", job.id),
                None => println!("No KPI approved; nothing to compute"),
            }
            Ok(())
        }
    }
}

fn print_kpi_table(kpis: &[Kpi]) {
    let rows = kpis
        .iter()
        .map(|k| {
            vec![
                (k.id.to_string(), None),
                (truncate(&k.name, 36), None),
                (k.status.to_string(), Some(kpi_status_color(k.status))),
                (
                    format_metric(k.value.as_ref(), k.unit.as_deref()),
                    k.value.as_ref().map(|_| Color::Green),
                ),
                (k.value_label.clone().unwrap_or_default(), None),
            ]
        })
        .collect();
    print_table_colored(&["ID", "NAME", "STATUS", "VALUE", "LABEL"], rows);
}

fn print_kpi_details(kpi: &Kpi) -> anyhow::Result<()> {
    println!("{} ({})", kpi.name, kpi.status);
    if !kpi.description.is_empty() {
        println!("  {}", kpi.description);
    }
    if !kpi.formula.is_empty() {
        println!("Formula:   {}", kpi.formula);
    }
    if !kpi.rationale.is_empty() {
        println!("Rationale: {}", kpi.rationale);
    }
    if let Some(target) = &kpi.target {
        println!("Target:    {}", target);
    }
    println!(
        "Value:     {}",
        format_metric(kpi.value.as_ref(), kpi.unit.as_deref())
    );
    if let Some(computed_at) = kpi.computed_at {
        println!("Computed:  {}", format_time(computed_at));
    }
    println!();
    println!("Plan:");
    println!("{}", serde_json::to_string_pretty(&kpi.plan)?);

    if let Some(breakdown) = &kpi.value_breakdown {
        println!();
        let rows = breakdown
            .iter()
            .map(|entry| {
                vec![
                    entry.label.clone(),
                    format_metric(Some(&entry.value), None),
                    entry
                        .pct
                        .map(|p| format!("{:.2}%", p))
                        .unwrap_or_else(|| "-".to_string()),
                ]
            })
            .collect();
        print_table(&["GROUP", "VALUE", "SHARE"], rows);
    }
    Ok(())
}
