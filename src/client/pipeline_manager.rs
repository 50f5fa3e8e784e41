//! Pipeline manager: submission of every sample's stage graph followed by
//! the poll/reconcile/report loop
//!
//! The manager runs on a single thread. All parallelism happens on the
//! cluster; the only suspension point is the sleep between poll cycles.
//!
//! # Termination
//!
//! The loop ends when no stage bucket holds a non-terminal job. It also ends
//! early when the termination flag is set (see [`PipelineManager::get_termination_flag`])
//! or, with `exit_when_stalled`, when every pending job is blocked behind a
//! failed prerequisite.

use anyhow::{Context, Result};
use chrono::Local;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::client::errors::SubmissionError;
use crate::client::hpc::HpcInterface;
use crate::client::job_tracker::JobTracker;
use crate::client::redundancy::resolve_redundant;
use crate::client::report::ProgressReporter;
use crate::client::stage_graph::{StageGraph, StageGraphBuilder};
use crate::config::RunConfig;
use crate::models::{AcceleratorBinding, Dependencies, JobId, Sample};

const SLEEP_STEP: Duration = Duration::from_millis(200);

/// Loop behaviour settings
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub poll_interval: Duration,
    pub exit_when_stalled: bool,
    pub cancel_on_interrupt: bool,
}

impl PipelineSettings {
    pub fn from_run_config(run: &RunConfig) -> Result<Self> {
        let poll_interval = Duration::try_from_secs_f64(run.poll_interval_secs)
            .with_context(|| format!("Invalid poll interval {}s", run.poll_interval_secs))?;
        Ok(Self {
            poll_interval,
            exit_when_stalled: run.exit_when_stalled,
            cancel_on_interrupt: run.cancel_on_interrupt,
        })
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every job reached a terminal state
    Finished,
    /// Every remaining job is blocked behind a failed prerequisite
    Stalled,
    /// The termination flag was set
    Interrupted,
}

pub struct PipelineManager<'a, H: HpcInterface> {
    hpc: H,
    builder: StageGraphBuilder<'a>,
    lanes: BTreeMap<String, AcceleratorBinding>,
    queue: VecDeque<Sample>,
    tracker: JobTracker,
    reporter: ProgressReporter,
    settings: PipelineSettings,
    termination_requested: Arc<AtomicBool>,
}

impl<'a, H: HpcInterface> PipelineManager<'a, H> {
    pub fn new(
        hpc: H,
        builder: StageGraphBuilder<'a>,
        lanes: BTreeMap<String, AcceleratorBinding>,
        samples: Vec<Sample>,
        reporter: ProgressReporter,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            hpc,
            builder,
            lanes,
            queue: samples.into(),
            tracker: JobTracker::new(),
            reporter,
            settings,
            termination_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn hpc(&self) -> &H {
        &self.hpc
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn queued_samples(&self) -> usize {
        self.queue.len()
    }

    /// Flag shared with signal handlers; setting it ends the run at the next
    /// cycle boundary.
    pub fn get_termination_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.termination_requested)
    }

    pub fn is_termination_requested(&self) -> bool {
        self.termination_requested.load(Ordering::SeqCst)
    }

    pub fn request_termination(&self) {
        self.termination_requested.store(true, Ordering::SeqCst);
    }

    /// Submit every queued sample, then poll until the run ends.
    pub fn run(&mut self) -> RunOutcome {
        info!(
            "Pipeline started samples={} poll_interval={}s exit_when_stalled={}",
            self.queue.len(),
            self.settings.poll_interval.as_secs_f64(),
            self.settings.exit_when_stalled
        );

        while self.submit_next_sample() {
            if self.is_termination_requested() {
                return self.interrupt();
            }
        }

        loop {
            if self.is_termination_requested() {
                return self.interrupt();
            }
            if self.poll_cycle() {
                info!("All jobs reached a terminal state");
                return RunOutcome::Finished;
            }
            if self.settings.exit_when_stalled && self.tracker.is_stalled() {
                warn!(
                    "Run stalled: every pending job is blocked by a failed prerequisite pending={}",
                    self.tracker.pending_count()
                );
                return RunOutcome::Stalled;
            }
            self.sleep();
        }
    }

    /// Pop one sample and submit its graph. Returns false once the queue is empty.
    pub fn submit_next_sample(&mut self) -> bool {
        let Some(sample) = self.queue.pop_front() else {
            return false;
        };
        let accelerator = self.lanes.get(&sample.name);
        let Some(graph) = self.builder.build(&sample, accelerator) else {
            warn!("Skipping sample with no raw-file groups sample={}", sample.name);
            return true;
        };

        match self.submit_graph(&graph) {
            Ok(count) => info!("Submitted sample={} jobs={}", sample.name, count),
            Err(e) => {
                error!("Submission aborted sample={}: {}", sample.name, e);
                self.tracker.record_abort(&sample.name, e.to_string());
            }
        }
        true
    }

    /// Submit the nodes of `graph` in order. Stops at the first failure so no
    /// dependent is submitted against a missing prerequisite.
    fn submit_graph(&mut self, graph: &StageGraph) -> Result<usize, SubmissionError> {
        let sample = graph.sample();
        self.tracker.register_sample(sample);

        let mut job_ids: Vec<JobId> = Vec::with_capacity(graph.len());
        for node in graph.nodes() {
            let dependencies = Dependencies::new(
                node.depends_on.iter().map(|&i| job_ids[i].clone()).collect(),
                node.mode,
            );
            let job_id = self.hpc.submit(&node.request, &dependencies)?;
            info!(
                "Submitted job sample={} stage={} job_id={} name={} dependency={}",
                sample,
                node.stage,
                job_id,
                node.request.name,
                dependencies.to_slurm_expression().unwrap_or_default()
            );
            self.tracker
                .record_submission(sample, node.stage, job_id.clone(), dependencies);
            job_ids.push(job_id);
        }
        Ok(job_ids.len())
    }

    /// One poll/reconcile/resolve/report cycle. Returns the finished signal.
    ///
    /// A failed status query leaves all bookkeeping untouched; it is retried
    /// on the next cycle.
    pub fn poll_cycle(&mut self) -> bool {
        let ids = self.tracker.query_ids();
        let statuses = if ids.is_empty() {
            Ok(HashMap::new())
        } else {
            self.hpc.get_statuses(&ids)
        };

        match statuses {
            Ok(statuses) => {
                let transitions = self.tracker.reconcile(&statuses);
                let cancelled = resolve_redundant(&self.hpc, &mut self.tracker);
                debug!(
                    "Poll cycle jobs={} transitions={} cancelled={}",
                    ids.len(),
                    transitions.len(),
                    cancelled.len()
                );
            }
            Err(e) => warn!("Status query failed, retrying next cycle: {:#}", e),
        }

        match self.reporter.report(&self.tracker, Local::now()) {
            Ok(finished) => finished,
            Err(e) => {
                warn!("Failed to record progress: {:#}", e);
                self.tracker.is_finished()
            }
        }
    }

    fn interrupt(&mut self) -> RunOutcome {
        let in_flight = self.tracker.in_flight();
        warn!(
            "Termination requested queued_samples={} in_flight={}",
            self.queue.len(),
            in_flight.len()
        );

        for (sample, stage, job_id) in in_flight {
            if self.settings.cancel_on_interrupt {
                info!("Cancelling job sample={} stage={} job_id={}", sample, stage, job_id);
                if let Err(e) = self.hpc.cancel_job(&job_id) {
                    warn!("Cancel request failed job_id={}: {}", job_id, e);
                }
                self.tracker.mark_removed(&sample, stage, &job_id);
            } else {
                info!(
                    "Leaving job on the cluster sample={} stage={} job_id={}",
                    sample, stage, job_id
                );
            }
        }
        self.tracker.drop_finished_samples();
        RunOutcome::Interrupted
    }

    fn sleep(&self) {
        let deadline = Instant::now() + self.settings.poll_interval;
        while !self.is_termination_requested() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(SLEEP_STEP.min(deadline - now));
        }
    }
}
