//! Pending and results bookkeeping for every submitted job
//!
//! The pending map holds in-flight job ids per sample and stage; the results
//! map keeps the last observed state of every job ever submitted. Both are
//! owned by one `JobTracker` and only mutated through its methods.
//!
//! A cancelled job is recorded as `REMOVED` at once but stays in the
//! `cancelling` set, and in every status query, until the scheduler reports
//! it terminal or stops reporting it.

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::client::hpc::HpcJobInfo;
use crate::models::{Dependencies, DependencyMode, JobId, JobState, Stage};

/// `sample -> stage -> in-flight job ids`, in submission order
pub type PendingJobs = BTreeMap<String, BTreeMap<Stage, Vec<JobId>>>;

/// `sample -> stage -> records`, in submission order
pub type JobResults = BTreeMap<String, BTreeMap<Stage, Vec<JobRecord>>>;

/// Last known state of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub state: JobState,
    pub node: Option<String>,
}

/// A state change applied during reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub sample: String,
    pub stage: Stage,
    pub job_id: JobId,
    pub from: JobState,
    pub to: JobState,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobTracker {
    pending: PendingJobs,
    results: JobResults,
    /// Jobs the scheduler has reported at least once
    seen: BTreeSet<JobId>,
    prerequisites: BTreeMap<JobId, Dependencies>,
    /// Owning sample and stage of every submitted job
    locations: BTreeMap<JobId, (String, Stage)>,
    /// Cancelled jobs not yet confirmed gone by the scheduler
    cancelling: BTreeSet<JobId>,
    /// Samples whose submission stopped early, with the reason
    aborted: BTreeMap<String, String>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &PendingJobs {
        &self.pending
    }

    pub fn results(&self) -> &JobResults {
        &self.results
    }

    pub fn aborted(&self) -> &BTreeMap<String, String> {
        &self.aborted
    }

    /// Create empty buckets for every stage of `sample`.
    pub fn register_sample(&mut self, sample: &str) {
        let mut pending = BTreeMap::new();
        let mut results = BTreeMap::new();
        for stage in Stage::ALL {
            pending.insert(stage, Vec::new());
            results.insert(stage, Vec::new());
        }
        self.pending.insert(sample.to_string(), pending);
        self.results.entry(sample.to_string()).or_insert(results);
    }

    pub fn record_submission(
        &mut self,
        sample: &str,
        stage: Stage,
        job_id: JobId,
        dependencies: Dependencies,
    ) {
        self.pending
            .entry(sample.to_string())
            .or_default()
            .entry(stage)
            .or_default()
            .push(job_id.clone());
        self.results
            .entry(sample.to_string())
            .or_default()
            .entry(stage)
            .or_default()
            .push(JobRecord {
                job_id: job_id.clone(),
                state: JobState::Pending,
                node: None,
            });
        self.locations
            .insert(job_id.clone(), (sample.to_string(), stage));
        if !dependencies.is_empty() {
            self.prerequisites.insert(job_id, dependencies);
        }
    }

    pub fn record_abort(&mut self, sample: &str, reason: impl Into<String>) {
        self.aborted.insert(sample.to_string(), reason.into());
    }

    /// Every in-flight job id, ordered by sample, stage and submission.
    pub fn pending_ids(&self) -> Vec<JobId> {
        self.in_flight().into_iter().map(|(_, _, id)| id).collect()
    }

    pub fn in_flight(&self) -> Vec<(String, Stage, JobId)> {
        self.pending
            .iter()
            .flat_map(|(sample, stages)| {
                stages.iter().flat_map(move |(stage, ids)| {
                    ids.iter().map(move |id| (sample.clone(), *stage, id.clone()))
                })
            })
            .collect()
    }

    pub fn cancelling(&self) -> &BTreeSet<JobId> {
        &self.cancelling
    }

    pub fn is_cancelling(&self, job_id: &JobId) -> bool {
        self.cancelling.contains(job_id)
    }

    /// Ids for one batched status query: in-flight jobs followed by
    /// cancelled jobs awaiting confirmation.
    pub fn query_ids(&self) -> Vec<JobId> {
        let mut ids = self.pending_ids();
        ids.extend(self.cancelling.iter().cloned());
        ids
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .values()
            .flat_map(|stages| stages.values())
            .map(Vec::len)
            .sum()
    }

    pub fn record(&self, job_id: &JobId) -> Option<&JobRecord> {
        let (sample, stage) = self.locations.get(job_id)?;
        self.records(sample, *stage)
            .iter()
            .find(|r| &r.job_id == job_id)
    }

    pub fn state_of(&self, job_id: &JobId) -> Option<JobState> {
        self.record(job_id).map(|r| r.state)
    }

    /// Records of one sample and stage, in submission order.
    pub fn records(&self, sample: &str, stage: Stage) -> &[JobRecord] {
        self.results
            .get(sample)
            .and_then(|stages| stages.get(&stage))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Apply one poll's worth of scheduler states.
    ///
    /// Terminal jobs leave the pending map. A job the scheduler no longer
    /// reports becomes `JOB NOT FOUND` if it was reported before; a job it has
    /// never reported keeps its current state.
    pub fn reconcile(&mut self, statuses: &HashMap<JobId, HpcJobInfo>) -> Vec<Transition> {
        let mut transitions = Vec::new();

        for (sample, stage, job_id) in self.in_flight() {
            let (state, node) = match statuses.get(&job_id) {
                Some(info) => {
                    self.seen.insert(job_id.clone());
                    (info.state, info.node.clone())
                }
                None if self.seen.contains(&job_id) => (JobState::NotFound, None),
                None => continue,
            };

            let Some(record) = self.record_mut(&sample, stage, &job_id) else {
                continue;
            };
            let from = record.state;
            record.state = state;
            if state == JobState::Running || node.is_some() {
                record.node = node;
            }

            if from != state {
                transitions.push(Transition {
                    sample: sample.clone(),
                    stage,
                    job_id: job_id.clone(),
                    from,
                    to: state,
                });
            }
            if state.is_terminal() {
                self.remove_pending(&sample, stage, &job_id);
            }
        }

        let cancelling: Vec<JobId> = self.cancelling.iter().cloned().collect();
        for job_id in cancelling {
            match statuses.get(&job_id) {
                Some(info) if !info.state.is_terminal() => debug!(
                    "Cancelled job still live job_id={} state={}",
                    job_id, info.state
                ),
                Some(info) => {
                    debug!("Cancellation confirmed job_id={} state={}", job_id, info.state);
                    self.cancelling.remove(&job_id);
                }
                None => {
                    debug!("Cancellation confirmed job_id={} (no longer reported)", job_id);
                    self.cancelling.remove(&job_id);
                }
            }
        }

        for t in &transitions {
            match t.to {
                JobState::Failed | JobState::NotFound => warn!(
                    "Job {} sample={} stage={} job_id={}",
                    t.to, t.sample, t.stage, t.job_id
                ),
                _ => info!(
                    "Job state changed sample={} stage={} job_id={} {} -> {}",
                    t.sample, t.stage, t.job_id, t.from, t.to
                ),
            }
        }

        self.drop_finished_samples();
        transitions
    }

    /// Reclassify a cancelled job as `REMOVED` without waiting for the
    /// scheduler. It is polled again until the cancellation is confirmed.
    pub fn mark_removed(&mut self, sample: &str, stage: Stage, job_id: &JobId) {
        if let Some(record) = self.record_mut(sample, stage, job_id) {
            record.state = JobState::Removed;
        }
        self.remove_pending(sample, stage, job_id);
        self.cancelling.insert(job_id.clone());
    }

    /// Drop samples whose every stage bucket is empty from the pending map.
    pub fn drop_finished_samples(&mut self) {
        let before = self.pending.len();
        self.pending
            .retain(|_, stages| stages.values().any(|ids| !ids.is_empty()));
        if self.pending.len() != before {
            debug!(
                "Samples with no work left removed from pending count={}",
                before - self.pending.len()
            );
        }
    }

    /// The prerequisite that prevents a pending job from ever running, if any.
    ///
    /// With all-of semantics one unsuccessful (or itself blocked)
    /// prerequisite is enough; with any-of semantics all of them must be.
    pub fn blocked_by(&self, job_id: &JobId) -> Option<JobId> {
        let state = self.state_of(job_id)?;
        if state.is_terminal() {
            return None;
        }
        let deps = self.prerequisites.get(job_id)?;
        let doomed: Vec<&JobId> = deps
            .job_ids
            .iter()
            .filter(|dep| self.can_never_succeed(dep))
            .collect();
        match deps.mode {
            DependencyMode::All => doomed.first().map(|id| (*id).clone()),
            DependencyMode::Any if doomed.len() == deps.job_ids.len() => {
                doomed.first().map(|id| (*id).clone())
            }
            DependencyMode::Any => None,
        }
    }

    fn can_never_succeed(&self, job_id: &JobId) -> bool {
        match self.state_of(job_id) {
            Some(state) if state.is_unsuccessful() => true,
            Some(_) => self.blocked_by(job_id).is_some(),
            None => false,
        }
    }

    /// True when there is pending work and none of it can ever run.
    pub fn is_stalled(&self) -> bool {
        let ids = self.pending_ids();
        !ids.is_empty() && ids.iter().all(|id| self.blocked_by(id).is_some())
    }

    /// True when no stage bucket of any sample holds a non-terminal job and
    /// every cancellation has been confirmed.
    pub fn is_finished(&self) -> bool {
        self.pending_count() == 0
            && self.cancelling.is_empty()
            && self
                .results
                .values()
                .flat_map(|stages| stages.values())
                .flatten()
                .all(|r| r.state.is_terminal())
    }

    fn record_mut(&mut self, sample: &str, stage: Stage, job_id: &JobId) -> Option<&mut JobRecord> {
        self.results
            .get_mut(sample)?
            .get_mut(&stage)?
            .iter_mut()
            .find(|r| &r.job_id == job_id)
    }

    fn remove_pending(&mut self, sample: &str, stage: Stage, job_id: &JobId) {
        if let Some(ids) = self
            .pending
            .get_mut(sample)
            .and_then(|stages| stages.get_mut(&stage))
        {
            ids.retain(|id| id != job_id);
        }
    }
}
