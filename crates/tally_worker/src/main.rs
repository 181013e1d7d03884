//! Tally worker binary
//!
//! Usage:
//!     tally-worker --db ~/.tally/tally.db

use clap::Parser;
use tally_logging::{init_logging, LogConfig};
use tally_worker::{run_worker, WorkerArgs};

#[derive(Parser, Debug)]
#[command(name = "tally-worker", about = "Pipeline worker for Tally")]
struct Args {
    #[command(flatten)]
    worker: WorkerArgs,

    /// Mirror the log file filter on stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(LogConfig {
        app_name: "tally-worker",
        verbose: args.verbose,
        interactive: false,
    })?;

    run_worker(args.worker).await
}
