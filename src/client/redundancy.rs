//! Cancellation of redundant candidates for per-sample singleton stages
//!
//! sv_lookup is submitted once per variant but only one candidate per sample
//! should run. The first candidate in submission order that is running (or
//! already done) wins; every other live candidate is cancelled and recorded
//! as removed in the same cycle. A cancelled candidate the scheduler still
//! reports as live on a later poll gets the cancel request again.

use log::{info, warn};

use crate::client::hpc::HpcInterface;
use crate::client::job_tracker::JobTracker;
use crate::models::{JobId, JobState, Stage};

/// Cancel losing candidates. Returns the newly cancelled job ids.
///
/// Must run right after `JobTracker::reconcile`, which leaves only jobs the
/// scheduler still reports as live in the cancelling set.
pub fn resolve_redundant<H: HpcInterface>(hpc: &H, tracker: &mut JobTracker) -> Vec<JobId> {
    for job_id in tracker.cancelling() {
        info!("Cancelled job still live, cancelling again job_id={}", job_id);
        request_cancel(hpc, job_id);
    }

    let mut losers: Vec<(String, Stage, JobId)> = Vec::new();

    let samples: Vec<String> = tracker.results().keys().cloned().collect();
    for sample in samples {
        for stage in Stage::ALL.into_iter().filter(Stage::is_singleton) {
            let records = tracker.records(&sample, stage);
            let Some(winner) = records
                .iter()
                .find(|r| matches!(r.state, JobState::Running | JobState::Completed))
            else {
                continue;
            };
            losers.extend(
                records
                    .iter()
                    .filter(|r| r.job_id != winner.job_id && !r.state.is_terminal())
                    .map(|r| (sample.clone(), stage, r.job_id.clone())),
            );
        }
    }

    let mut cancelled = Vec::with_capacity(losers.len());
    for (sample, stage, job_id) in losers {
        info!(
            "Cancelling redundant candidate sample={} stage={} job_id={}",
            sample, stage, job_id
        );
        request_cancel(hpc, &job_id);
        tracker.mark_removed(&sample, stage, &job_id);
        cancelled.push(job_id);
    }
    cancelled
}

/// Fire one cancel request. Failures are only logged; the next poll decides
/// whether the job is gone.
fn request_cancel<H: HpcInterface>(hpc: &H, job_id: &JobId) {
    match hpc.cancel_job(job_id) {
        Ok(0) => {}
        Ok(return_code) => warn!(
            "Cancel request returned {} job_id={}, checking again next cycle",
            return_code, job_id
        ),
        Err(e) => warn!(
            "Cancel request failed job_id={}, checking again next cycle: {:#}",
            job_id, e
        ),
    }
}
