//! Scheduler-facing interface used by the pipeline manager

use anyhow::Result;
use std::collections::HashMap;

use super::common::HpcJobInfo;
use crate::client::errors::SubmissionError;
use crate::models::{Dependencies, JobId, JobRequest};

/// Submit, poll and cancel operations against a batch scheduler.
///
/// Implementations perform exactly one scheduler submission per `submit`
/// call and never deduplicate. `get_statuses` must query all requested jobs
/// in a single scheduler call; a job missing from the returned map was not
/// reported by the scheduler.
pub trait HpcInterface {
    /// Submit a job whose eligibility is gated on `dependencies`.
    fn submit(
        &self,
        request: &JobRequest,
        dependencies: &Dependencies,
    ) -> Result<JobId, SubmissionError>;

    /// Current state of the given jobs, in one batched query.
    fn get_statuses(&self, job_ids: &[JobId]) -> Result<HashMap<JobId, HpcJobInfo>>;

    /// Fire a cancel request. The returned code is informational only.
    fn cancel_job(&self, job_id: &JobId) -> Result<i32>;
}
