//! CLI command handlers

pub mod config;
pub mod plan;
pub mod run;

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::client::discovery::discover_samples;
use crate::client::lanes::assign_lanes;
use crate::client::tool_commands::ToolCommands;
use crate::config::{ConfigPaths, NanopipeConfig};
use crate::models::{AcceleratorBinding, Sample};

/// Positional inputs shared by `run` and `plan`
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub in_dir: PathBuf,
    pub out_dir: PathBuf,
    pub model: PathBuf,
    pub threads: u32,
}

/// Load the layered configuration plus an optional explicit file.
pub fn load_config(explicit: Option<&Path>) -> Result<NanopipeConfig> {
    let paths = ConfigPaths::new();
    let mut files: Vec<PathBuf> = paths.existing_paths().into_iter().cloned().collect();
    if let Some(path) = explicit {
        if !path.exists() {
            bail!("Config file {} does not exist", path.display());
        }
        files.push(path.to_path_buf());
    }
    NanopipeConfig::load_from_files(&files)
}

/// Fail with every validation problem listed.
pub fn ensure_valid(config: &NanopipeConfig) -> Result<()> {
    if let Err(errors) = config.validate() {
        bail!("Invalid configuration:\n  {}", errors.join("\n  "));
    }
    Ok(())
}

/// Everything derived from the inputs before any job is submitted
pub struct PreparedRun {
    pub samples: Vec<Sample>,
    pub lanes: BTreeMap<String, AcceleratorBinding>,
    pub tools: ToolCommands,
}

pub fn prepare_run(inputs: &PipelineInputs, config: &NanopipeConfig) -> Result<PreparedRun> {
    if inputs.threads == 0 {
        bail!("--threads must be at least 1");
    }
    let samples = discover_samples(&inputs.in_dir)
        .with_context(|| format!("Sample discovery failed in {}", inputs.in_dir.display()))?;
    let names: Vec<String> = samples.iter().map(|s| s.name.clone()).collect();
    let lanes = assign_lanes(
        &names,
        &config.pipeline.gpu_devices,
        config.pipeline.lanes,
    )?;
    let tools = ToolCommands::new(
        config.layout.resolve(&inputs.out_dir),
        inputs.model.clone(),
        config.pipeline.reference_fasta.clone(),
        config.pipeline.tandem_repeat_bed.clone(),
    );
    Ok(PreparedRun {
        samples,
        lanes,
        tools,
    })
}
