//! Project commands - create and list projects

use clap::Subcommand;
use tally_db::TallyDb;
use tally_protocol::Project;

use super::context::CliContext;
use super::error::HelpfulError;
use super::output::{format_time, print_json, print_table, truncate};

#[derive(Subcommand, Debug, Clone)]
pub enum ProjectAction {
    /// Create a project
    Create {
        /// Project name
        name: String,
        /// What the business does; given to the model with every request
        #[arg(short, long)]
        description: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List projects
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(action: ProjectAction, ctx: &CliContext) -> anyhow::Result<()> {
    let db = ctx.open_db().await?;
    match action {
        ProjectAction::Create {
            name,
            description,
            json,
        } => {
            let project = create_project(&db, &name, &description).await?;
            if json {
                return print_json(&project);
            }
            println!("Created project {} ({})", project.name, project.id);
            println!();
            println!("  Next: tally dataset upload --project {} <FILE.csv>", project.id);
            Ok(())
        }
        ProjectAction::List { json } => {
            let projects = db.project_list().await?;
            if json {
                return print_json(&projects);
            }
            if projects.is_empty() {
                println!("No projects yet.");
                println!("  TRY: tally project create <NAME> --description <TEXT>");
                return Ok(());
            }
            let rows = projects
                .iter()
                .map(|p| {
                    vec![
                        p.id.to_string(),
                        p.name.clone(),
                        truncate(&p.business_description, 48),
                        format_time(p.created_at),
                    ]
                })
                .collect();
            print_table(&["ID", "NAME", "DESCRIPTION", "CREATED"], rows);
            Ok(())
        }
    }
}

pub async fn create_project(
    db: &TallyDb,
    name: &str,
    description: &str,
) -> anyhow::Result<Project> {
    let name = name.trim();
    if name.is_empty() {
        return Err(HelpfulError::new("Project name cannot be empty").into());
    }
    let project = Project::new(name, description.trim());
    db.project_create(&project).await?;
    Ok(project)
}

/// Load a project or explain how to find one.
pub async fn require_project(
    db: &TallyDb,
    id: &tally_ids::ProjectId,
) -> anyhow::Result<Project> {
    db.project_get(id)
        .await?
        .ok_or_else(|| HelpfulError::project_not_found(id).into())
}
