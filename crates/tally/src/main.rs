//! Tally command-line launcher
//!
//! Usage:
//!     tally project create "Acme Bakery" --description "Bread delivered by region"
//!     tally dataset upload --project <ID> orders.csv
//!     tally worker
//!     tally kpi approve --project <ID> --approve <KPI_ID>

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tally::cli::{self, CliContext};
use tally_logging::{init_logging, LogConfig};
use tally_worker::{run_worker, WorkerArgs};

#[derive(Parser, Debug)]
#[command(name = "tally", about = "KPI discovery with human sign-off", version)]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.tally/config.toml)
    #[arg(long, global = true, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path (overrides [database] path)
    #[arg(long, global = true, env = "TALLY_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create and list projects
    Project {
        #[command(subcommand)]
        action: cli::project::ProjectAction,
    },
    /// Upload datasets and inspect their profiles
    Dataset {
        #[command(subcommand)]
        action: cli::dataset::DatasetAction,
    },
    /// List, inspect and retry pipeline jobs
    Job {
        #[command(subcommand)]
        action: cli::job::JobAction,
    },
    /// Review proposed KPIs and read computed values
    Kpi {
        #[command(subcommand)]
        action: cli::kpi::KpiAction,
    },
    /// Read advisory reports and decide recommendations
    Report {
        #[command(subcommand)]
        action: cli::report::ReportAction,
    },
    /// Run the pipeline worker until Ctrl+C
    Worker,
}

fn command_wants_json(cmd: &Commands) -> bool {
    use cli::dataset::DatasetAction as D;
    use cli::job::JobAction as J;
    use cli::kpi::KpiAction as K;
    use cli::project::ProjectAction as P;
    use cli::report::ReportAction as R;

    match cmd {
        Commands::Project { action } => match action {
            P::Create { json, .. } | P::List { json } => *json,
        },
        Commands::Dataset { action } => match action {
            D::Upload { json, .. } | D::List { json, .. } | D::Profile { json, .. } => *json,
        },
        Commands::Job { action } => match action {
            J::List { json, .. } | J::Show { json, .. } | J::Retry { json, .. } => *json,
        },
        Commands::Kpi { action } => match action {
            K::List { json, .. } | K::Show { json, .. } | K::Approve { json, .. } => *json,
        },
        Commands::Report { action } => match action {
            R::Show { json, .. } | R::Approve { json, .. } => *json,
        },
        Commands::Worker => false,
    }
}

async fn run_command(cli: Cli) -> Result<()> {
    if let Commands::Worker = cli.command {
        return run_worker(WorkerArgs {
            config: cli.config,
            db: cli.db,
        })
        .await;
    }

    let ctx = CliContext::load(cli.config.as_deref(), cli.db)?;
    match cli.command {
        Commands::Project { action } => cli::project::run(action, &ctx).await,
        Commands::Dataset { action } => cli::dataset::run(action, &ctx).await,
        Commands::Job { action } => cli::job::run(action, &ctx).await,
        Commands::Kpi { action } => cli::kpi::run(action, &ctx).await,
        Commands::Report { action } => cli::report::run(action, &ctx).await,
        Commands::Worker => Ok(()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = command_wants_json(&cli.command);
    let is_worker = matches!(cli.command, Commands::Worker);

    if let Err(e) = init_logging(LogConfig {
        app_name: "tally",
        verbose: cli.verbose,
        interactive: !is_worker,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", e);
    }

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(anyhow::Error::from)
        .and_then(|rt| rt.block_on(run_command(cli)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json_mode {
                cli::error::print_json_error(&err);
            } else {
                eprintln!("{:?}", err);
            }
            ExitCode::from(1)
        }
    }
}
