//! Tally - command-line front end
//!
//! Project, dataset, job, KPI and report commands over the local store, plus
//! the `worker` command that runs the pipeline.

pub mod cli;
