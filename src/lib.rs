//! nanopipe: Slurm orchestration of a per-sample nanopore processing pipeline
//!
//! Raw signal files are converted, basecalled, aligned and then handed to
//! modification and structural-variant callers, each step as a cluster job
//! chained on the scheduler's dependency mechanism.

pub mod client;
pub mod config;
pub mod models;
