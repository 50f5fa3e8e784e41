//! Core data types shared by the pipeline scheduler and the scheduler bindings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One step of the fixed per-sample pipeline template, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Converting,
    Basecalling,
    Aligning,
    ModLookup,
    SvLookup,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Converting,
        Stage::Basecalling,
        Stage::Aligning,
        Stage::ModLookup,
        Stage::SvLookup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Converting => "converting",
            Stage::Basecalling => "basecalling",
            Stage::Aligning => "aligning",
            Stage::ModLookup => "mod_lookup",
            Stage::SvLookup => "sv_lookup",
        }
    }

    /// Whether the stage must run at most once per sample even though one
    /// candidate is submitted per processing variant.
    pub fn is_singleton(&self) -> bool {
        matches!(self, Stage::SvLookup)
    }

    /// Whether the stage runs on the accelerator partition.
    pub fn uses_accelerator(&self) -> bool {
        matches!(self, Stage::Basecalling)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduler-assigned job identifier (a string of digits).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Parse a scheduler response into an identifier. Returns `None` for empty
    /// or non-numeric input.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last observed state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Removed,
    Unknown,
    /// The scheduler stopped reporting a job it had reported before.
    NotFound,
}

impl JobState {
    /// Map a raw Slurm state token (e.g. `CANCELLED by 1000`) to a job state.
    pub fn from_slurm(token: &str) -> Self {
        let token = token.split_whitespace().next().unwrap_or("");
        match token.trim_end_matches('+') {
            "PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED"
            | "RESIZING" | "SUSPENDED" => JobState::Pending,
            "RUNNING" | "COMPLETING" | "STAGE_OUT" | "SIGNALING" => JobState::Running,
            "COMPLETED" => JobState::Completed,
            "FAILED" | "TIMEOUT" | "OUT_OF_MEMORY" | "NODE_FAIL" | "BOOT_FAIL" | "DEADLINE"
            | "PREEMPTED" => JobState::Failed,
            "CANCELLED" | "REVOKED" => JobState::Removed,
            _ => JobState::Unknown,
        }
    }

    /// A terminal job never transitions again and leaves the pending map.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Removed | JobState::NotFound
        )
    }

    /// Terminal states other than success.
    pub fn is_unsuccessful(&self) -> bool {
        matches!(
            self,
            JobState::Failed | JobState::Removed | JobState::NotFound
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Removed => "REMOVED",
            JobState::Unknown => "UNKNOWN",
            JobState::NotFound => "JOB NOT FOUND",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sample and the raw-file groups discovered for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub name: String,
    pub raw_groups: Vec<PathBuf>,
}

impl Sample {
    pub fn new(name: impl Into<String>, raw_groups: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            raw_groups,
        }
    }
}

/// How a dependency set is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyMode {
    /// Every listed job must succeed.
    #[default]
    All,
    /// Success of any listed job suffices.
    Any,
}

impl DependencyMode {
    /// Separator between identifiers in an `afterok:` expression.
    pub fn separator(&self) -> char {
        match self {
            DependencyMode::All => ':',
            DependencyMode::Any => '?',
        }
    }
}

/// Resolved prerequisites of a job about to be submitted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dependencies {
    pub job_ids: Vec<JobId>,
    pub mode: DependencyMode,
}

impl Dependencies {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(job_ids: Vec<JobId>, mode: DependencyMode) -> Self {
        Self { job_ids, mode }
    }

    pub fn is_empty(&self) -> bool {
        self.job_ids.is_empty()
    }

    /// Slurm dependency expression, e.g. `afterok:12:13` or `afterok:12?13`.
    pub fn to_slurm_expression(&self) -> Option<String> {
        if self.job_ids.is_empty() {
            return None;
        }
        let separator = self.mode.separator().to_string();
        let ids: Vec<&str> = self.job_ids.iter().map(|id| id.as_str()).collect();
        Some(format!("afterok:{}", ids.join(&separator)))
    }
}

/// Binding of a job to a slice of accelerator devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceleratorBinding {
    /// Device token handed to the tool, e.g. `cuda:0,1`.
    pub token: String,
    /// Number of devices in the slice.
    pub count: usize,
}

/// Resource shape requested for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceShape {
    pub nodes: u32,
    pub ntasks: u32,
    pub cpus_per_task: u32,
    /// Memory in Slurm notation (`16G`); `None` leaves the partition default.
    pub memory: Option<String>,
    pub accelerator: Option<AcceleratorBinding>,
    pub exclude_nodes: Vec<String>,
}

impl Default for ResourceShape {
    fn default() -> Self {
        Self {
            nodes: 1,
            ntasks: 1,
            cpus_per_task: 1,
            memory: None,
            accelerator: None,
            exclude_nodes: Vec::new(),
        }
    }
}

/// An abstract job ready to hand to a scheduler interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRequest {
    pub name: String,
    pub partition: String,
    pub command: String,
    pub resources: ResourceShape,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_parse() {
        assert_eq!(JobId::parse(" 1234\n").unwrap().as_str(), "1234");
        assert!(JobId::parse("").is_none());
        assert!(JobId::parse("12a4").is_none());
        assert!(JobId::parse("Submitted").is_none());
    }

    #[test]
    fn test_state_from_slurm() {
        assert_eq!(JobState::from_slurm("PENDING"), JobState::Pending);
        assert_eq!(JobState::from_slurm("COMPLETING"), JobState::Running);
        assert_eq!(JobState::from_slurm("COMPLETED"), JobState::Completed);
        assert_eq!(JobState::from_slurm("OUT_OF_MEMORY"), JobState::Failed);
        assert_eq!(JobState::from_slurm("CANCELLED by 1000"), JobState::Removed);
        assert_eq!(JobState::from_slurm("CANCELLED+"), JobState::Removed);
        assert_eq!(JobState::from_slurm("SPECIAL_EXIT"), JobState::Unknown);
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<JobState> = [
            JobState::Pending,
            JobState::Running,
            JobState::Completed,
            JobState::Failed,
            JobState::Removed,
            JobState::Unknown,
            JobState::NotFound,
        ]
        .into_iter()
        .filter(|s| s.is_terminal())
        .collect();
        assert_eq!(
            terminal,
            vec![
                JobState::Completed,
                JobState::Failed,
                JobState::Removed,
                JobState::NotFound
            ]
        );
    }

    #[test]
    fn test_dependency_expression() {
        let ids = vec![JobId::parse("12").unwrap(), JobId::parse("13").unwrap()];
        let all = Dependencies::new(ids.clone(), DependencyMode::All);
        let any = Dependencies::new(ids, DependencyMode::Any);
        assert_eq!(all.to_slurm_expression().unwrap(), "afterok:12:13");
        assert_eq!(any.to_slurm_expression().unwrap(), "afterok:12?13");
        assert!(Dependencies::none().to_slurm_expression().is_none());
    }

    #[test]
    fn test_stage_order() {
        let mut stages = Stage::ALL.to_vec();
        stages.reverse();
        stages.sort();
        assert_eq!(stages, Stage::ALL.to_vec());
        assert!(Stage::SvLookup.is_singleton());
        assert!(!Stage::ModLookup.is_singleton());
    }
}
