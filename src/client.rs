//! Client-side orchestration: discovery, graph building, submission, polling
//! and reporting.

pub mod commands;
pub mod discovery;
pub mod errors;
pub mod hpc;
pub mod job_tracker;
pub mod lanes;
pub mod log_paths;
pub mod pipeline_manager;
pub mod redundancy;
pub mod relocate;
pub mod report;
pub mod stage_graph;
pub mod tool_commands;
pub mod utils;

// Re-exports for convenience
pub use hpc::{HpcInterface, HpcJobInfo, SlurmInterface};
pub use job_tracker::{JobRecord, JobTracker};
pub use pipeline_manager::{PipelineManager, PipelineSettings, RunOutcome};
pub use stage_graph::{StageGraph, StageGraphBuilder};
