//! Pipeline template configuration: processing variants, references, lanes
//! and per-stage resource shapes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::Stage;

/// Resource sizing for one stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StageResources {
    /// How many tasks of this stage should share one machine
    pub tasks_per_machine: u32,

    /// Upper bound on threads per task
    pub max_threads: u32,

    /// Memory request in Slurm notation (e.g. "32G")
    pub memory: Option<String>,
}

impl StageResources {
    fn new(tasks_per_machine: u32, max_threads: u32) -> Self {
        Self {
            tasks_per_machine,
            max_threads,
            memory: None,
        }
    }

    /// Threads per task for a machine with `threads_per_machine` hardware threads.
    pub fn threads_per_task(&self, threads_per_machine: u32) -> u32 {
        let share = threads_per_machine / self.tasks_per_machine.max(1);
        share.min(self.max_threads).max(1)
    }
}

impl Default for StageResources {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// Configuration of the five-stage template
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Modification-calling modes; basecalling onwards fans out per variant
    pub variants: Vec<String>,

    /// Reference genome used by alignment and both lookups
    pub reference_fasta: PathBuf,

    /// Tandem repeat annotation for structural variant calling
    pub tandem_repeat_bed: PathBuf,

    /// Number of concurrency lanes the sample list is split into
    pub lanes: usize,

    /// Accelerator devices shared out between lanes
    pub gpu_devices: Vec<String>,

    pub converting: StageResources,
    pub basecalling: StageResources,
    pub aligning: StageResources,
    pub mod_lookup: StageResources,
    pub sv_lookup: StageResources,
}

impl PipelineConfig {
    pub fn stage(&self, stage: Stage) -> &StageResources {
        match stage {
            Stage::Converting => &self.converting,
            Stage::Basecalling => &self.basecalling,
            Stage::Aligning => &self.aligning,
            Stage::ModLookup => &self.mod_lookup,
            Stage::SvLookup => &self.sv_lookup,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            variants: vec!["5mCG_5hmCG".to_string(), "5mCG".to_string()],
            reference_fasta: PathBuf::from(
                "/common_share/nanopore_service_files/ref_files/GCA_000001405.15_GRCh38_no_alt_analysis_set.fna",
            ),
            tandem_repeat_bed: PathBuf::from(
                "/common_share/nanopore_service_files/ref_files/human_GRCh38_no_alt_analysis_set.trf.bed",
            ),
            lanes: 1,
            gpu_devices: vec!["0".to_string(), "1".to_string()],
            converting: StageResources::new(16, 16),
            basecalling: StageResources::new(1, 16),
            aligning: StageResources::new(4, 64),
            mod_lookup: StageResources::new(32, 8),
            sv_lookup: StageResources::new(8, 32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threads_per_task() {
        let config = PipelineConfig::default();
        assert_eq!(config.converting.threads_per_task(128), 8);
        assert_eq!(config.aligning.threads_per_task(128), 32);
        assert_eq!(config.aligning.threads_per_task(512), 64);
        assert_eq!(config.mod_lookup.threads_per_task(128), 4);
        assert_eq!(config.sv_lookup.threads_per_task(4), 1);
    }

    #[test]
    fn test_zero_tasks_per_machine_does_not_divide_by_zero() {
        let resources = StageResources::new(0, 4);
        assert_eq!(resources.threads_per_task(16), 4);
    }
}
