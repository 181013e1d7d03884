//! CLI module for Tally
//!
//! Every command opens the local store, does its work and prints a table, or
//! JSON with `--json`. Only `worker` runs the pipeline itself.

pub mod context;
pub mod error;
pub mod output;

pub mod dataset;
pub mod job;
pub mod kpi;
pub mod project;
pub mod report;

pub use context::CliContext;
pub use error::HelpfulError;
