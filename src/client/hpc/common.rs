//! Types shared by scheduler interface implementations

use crate::models::{JobId, JobState};

/// State of one job as reported by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HpcJobInfo {
    pub job_id: JobId,
    pub state: JobState,
    /// Node list the job was placed on, when the scheduler reports one
    pub node: Option<String>,
}

impl HpcJobInfo {
    pub fn new(job_id: JobId, state: JobState, node: Option<String>) -> Self {
        Self {
            job_id,
            state,
            node,
        }
    }
}
