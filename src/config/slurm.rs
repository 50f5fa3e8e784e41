//! Slurm binding configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Partitions, node exclusions and executables used to talk to Slurm
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SlurmConfig {
    /// Partition for CPU stages (converting, aligning, lookups)
    pub cpu_partition: String,

    /// Partition for accelerator stages (basecalling)
    pub gpu_partition: String,

    /// Nodes never used for CPU stages
    pub exclude_nodes_cpu: Vec<String>,

    /// Nodes never used for accelerator stages
    pub exclude_nodes_gpu: Vec<String>,

    /// Root of the per-job submission directories
    pub working_dir: PathBuf,

    /// sbatch executable
    pub sbatch: String,

    /// sacct executable
    pub sacct: String,

    /// scancel executable
    pub scancel: String,

    /// Attempts per sbatch call (1 = no retry)
    pub submit_retries: usize,

    /// Delay between sbatch attempts
    pub retry_delay_secs: u64,
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            cpu_partition: "cpu_nodes".to_string(),
            gpu_partition: "gpu_nodes".to_string(),
            exclude_nodes_cpu: vec!["dgx10".to_string()],
            exclude_nodes_gpu: Vec::new(),
            working_dir: PathBuf::from("/common_share/tmp/slurm"),
            sbatch: "sbatch".to_string(),
            sacct: "sacct".to_string(),
            scancel: "scancel".to_string(),
            submit_retries: 1,
            retry_delay_secs: 5,
        }
    }
}
