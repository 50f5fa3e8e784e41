//! Shared fixtures for integration tests
//!
//! `FakeHpc` is an in-memory scheduler. Jobs start `PENDING`; when
//! auto-advance is on, every poll moves eligible pending jobs to `RUNNING`
//! and running jobs to `COMPLETED` (or `FAILED` for names marked to fail),
//! honouring all-of and any-of dependencies the way Slurm would.

#![allow(dead_code)]

use anyhow::{Result, bail};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nanopipe::client::errors::SubmissionError;
use nanopipe::client::hpc::{HpcInterface, HpcJobInfo};
use nanopipe::client::pipeline_manager::{PipelineManager, PipelineSettings};
use nanopipe::client::report::ProgressReporter;
use nanopipe::client::stage_graph::StageGraphBuilder;
use nanopipe::client::tool_commands::ToolCommands;
use nanopipe::config::{LayoutConfig, NanopipeConfig};
use nanopipe::models::{
    AcceleratorBinding, Dependencies, DependencyMode, JobId, JobRequest, JobState, Sample,
};

pub const NODE: &str = "node01";

/// One call to `submit`
#[derive(Debug, Clone)]
pub struct Submission {
    pub job_id: JobId,
    pub name: String,
    pub partition: String,
    pub dependencies: Dependencies,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u64,
    submissions: Vec<Submission>,
    cancelled: Vec<JobId>,
    states: HashMap<JobId, JobState>,
    /// Jobs the scheduler does not report at all
    hidden: HashSet<JobId>,
    auto_advance: bool,
    fail_names: HashSet<String>,
    reject_prefixes: Vec<String>,
    failing_polls: usize,
    poll_calls: usize,
    failing_cancels: usize,
    cancel_attempts: usize,
    last_query: Vec<JobId>,
}

#[derive(Debug, Default)]
pub struct FakeHpc {
    state: RefCell<FakeState>,
}

impl FakeHpc {
    pub fn new() -> Self {
        let hpc = Self::default();
        hpc.state.borrow_mut().next_id = 1000;
        hpc
    }

    pub fn auto_advancing() -> Self {
        let hpc = Self::new();
        hpc.state.borrow_mut().auto_advance = true;
        hpc
    }

    /// The job with this name fails once it runs.
    pub fn fail_job(&self, name: &str) {
        self.state.borrow_mut().fail_names.insert(name.to_string());
    }

    /// Submissions whose job name starts with `prefix` are rejected.
    pub fn reject_submissions(&self, prefix: &str) {
        self.state.borrow_mut().reject_prefixes.push(prefix.to_string());
    }

    /// The next `count` status queries fail.
    pub fn fail_next_polls(&self, count: usize) {
        self.state.borrow_mut().failing_polls = count;
    }

    /// The next `count` cancel requests fail and leave the job untouched.
    pub fn fail_next_cancels(&self, count: usize) {
        self.state.borrow_mut().failing_cancels = count;
    }

    pub fn cancel_attempts(&self) -> usize {
        self.state.borrow().cancel_attempts
    }

    /// Ids passed to the most recent status query
    pub fn last_query(&self) -> Vec<JobId> {
        self.state.borrow().last_query.clone()
    }

    pub fn state_of(&self, name: &str) -> JobState {
        let id = self.job_id(name);
        self.state.borrow().states[&id]
    }

    pub fn set_state(&self, name: &str, state: JobState) {
        let id = self.job_id(name);
        self.state.borrow_mut().states.insert(id, state);
    }

    /// Stop reporting a job, as if the scheduler forgot it.
    pub fn forget(&self, name: &str) {
        let id = self.job_id(name);
        self.state.borrow_mut().hidden.insert(id);
    }

    pub fn job_id(&self, name: &str) -> JobId {
        self.submission(name).job_id
    }

    pub fn submission(&self, name: &str) -> Submission {
        self.state
            .borrow()
            .submissions
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .unwrap_or_else(|| panic!("no submission named {}", name))
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.borrow().submissions.clone()
    }

    pub fn submitted_names(&self) -> Vec<String> {
        self.submissions().into_iter().map(|s| s.name).collect()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.submitted_names()
            .iter()
            .filter(|n| n.starts_with(prefix))
            .count()
    }

    pub fn cancelled(&self) -> Vec<JobId> {
        self.state.borrow().cancelled.clone()
    }

    pub fn poll_calls(&self) -> usize {
        self.state.borrow().poll_calls
    }

    fn advance(state: &mut FakeState) {
        let snapshot = state.states.clone();
        let succeeded = |id: &JobId| snapshot.get(id) == Some(&JobState::Completed);

        for submission in &state.submissions {
            let Some(current) = snapshot.get(&submission.job_id) else {
                continue;
            };
            let next = match current {
                JobState::Pending => {
                    let deps = &submission.dependencies;
                    let eligible = deps.is_empty()
                        || match deps.mode {
                            DependencyMode::All => deps.job_ids.iter().all(succeeded),
                            DependencyMode::Any => deps.job_ids.iter().any(succeeded),
                        };
                    if eligible {
                        JobState::Running
                    } else {
                        JobState::Pending
                    }
                }
                JobState::Running if state.fail_names.contains(&submission.name) => {
                    JobState::Failed
                }
                JobState::Running => JobState::Completed,
                other => *other,
            };
            state.states.insert(submission.job_id.clone(), next);
        }
    }
}

impl HpcInterface for FakeHpc {
    fn submit(
        &self,
        request: &JobRequest,
        dependencies: &Dependencies,
    ) -> Result<JobId, SubmissionError> {
        let mut state = self.state.borrow_mut();
        if state
            .reject_prefixes
            .iter()
            .any(|p| request.name.starts_with(p))
        {
            return Err(SubmissionError::Rejected {
                job_name: request.name.clone(),
                return_code: 1,
                stderr: "sbatch: error: Batch job submission failed".to_string(),
            });
        }
        state.next_id += 1;
        let job_id = JobId::parse(&state.next_id.to_string()).ok_or_else(|| {
            SubmissionError::MissingJobId {
                job_name: request.name.clone(),
                output: String::new(),
            }
        })?;
        state.states.insert(job_id.clone(), JobState::Pending);
        state.submissions.push(Submission {
            job_id: job_id.clone(),
            name: request.name.clone(),
            partition: request.partition.clone(),
            dependencies: dependencies.clone(),
        });
        Ok(job_id)
    }

    fn get_statuses(&self, job_ids: &[JobId]) -> Result<HashMap<JobId, HpcJobInfo>> {
        let mut state = self.state.borrow_mut();
        state.poll_calls += 1;
        state.last_query = job_ids.to_vec();
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            bail!("sacct: error: Problem talking to the database");
        }
        if state.auto_advance {
            Self::advance(&mut state);
        }

        Ok(job_ids
            .iter()
            .filter(|id| !state.hidden.contains(*id))
            .filter_map(|id| {
                state.states.get(id).map(|s| {
                    let node = (*s == JobState::Running).then(|| NODE.to_string());
                    (id.clone(), HpcJobInfo::new(id.clone(), *s, node))
                })
            })
            .collect())
    }

    fn cancel_job(&self, job_id: &JobId) -> Result<i32> {
        let mut state = self.state.borrow_mut();
        state.cancel_attempts += 1;
        if state.failing_cancels > 0 {
            state.failing_cancels -= 1;
            bail!("'scancel' did not finish within 60s and was killed");
        }
        state.cancelled.push(job_id.clone());
        state.states.insert(job_id.clone(), JobState::Removed);
        Ok(0)
    }
}

/// Configuration and tool commands a manager borrows from
pub struct Fixture {
    pub config: NanopipeConfig,
    pub tools: ToolCommands,
}

impl Fixture {
    pub fn new() -> Self {
        let config = NanopipeConfig::default();
        let tools = ToolCommands::new(
            LayoutConfig::default().resolve(Path::new("/out")),
            PathBuf::from("/models/dna_sup"),
            config.pipeline.reference_fasta.clone(),
            config.pipeline.tandem_repeat_bed.clone(),
        );
        Self { config, tools }
    }

    pub fn settings(&self, exit_when_stalled: bool) -> PipelineSettings {
        PipelineSettings {
            poll_interval: Duration::ZERO,
            exit_when_stalled,
            cancel_on_interrupt: false,
        }
    }

    pub fn manager(
        &self,
        hpc: FakeHpc,
        samples: Vec<Sample>,
        settings: PipelineSettings,
    ) -> PipelineManager<'_, FakeHpc> {
        let builder =
            StageGraphBuilder::new(&self.config.pipeline, &self.config.slurm, &self.tools, 64);
        let lanes = samples
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    AcceleratorBinding {
                        token: "cuda:0,1".to_string(),
                        count: 2,
                    },
                )
            })
            .collect();
        PipelineManager::new(
            hpc,
            builder,
            lanes,
            samples,
            ProgressReporter::new(None, false),
            settings,
        )
    }
}

/// Sample with `groups` raw-file groups
pub fn sample(name: &str, groups: usize) -> Sample {
    Sample::new(
        name,
        (0..groups)
            .map(|i| PathBuf::from(format!("/in/{}/run{}/fast5_pass", name, i)))
            .collect(),
    )
}
