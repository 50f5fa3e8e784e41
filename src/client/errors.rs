//! Error types for scheduler calls, job submission and sample discovery

use std::path::PathBuf;
use thiserror::Error;

/// Failure running an external scheduler command
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' did not finish within {timeout_secs}s and was killed")]
    Timeout { program: String, timeout_secs: u64 },

    #[error("I/O error while waiting for '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to obtain a job identifier from the scheduler
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("failed to write submission script {path}: {source}")]
    Script {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("submission of {job_name} exited with code {return_code}: {stderr}")]
    Rejected {
        job_name: String,
        return_code: i32,
        stderr: String,
    },

    #[error("submission of {job_name} returned no job id (output: '{output}')")]
    MissingJobId { job_name: String, output: String },

    #[error("submission of {job_name} failed: {source}")]
    Command {
        job_name: String,
        #[source]
        source: CommandError,
    },
}

/// Failure to find any raw data to process
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("cannot read input directory {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no samples with raw data found in {0}")]
    NoSamples(PathBuf),
}
