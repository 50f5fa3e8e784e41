//! Run command: submit the whole pipeline and watch it to completion

use anyhow::{Context, Result};
use chrono::Local;
use env_logger::Builder;
use log::{LevelFilter, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::fs::{self, File};
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use super::{PipelineInputs, ensure_valid, load_config, prepare_run};
use crate::client::hpc::SlurmInterface;
use crate::client::log_paths::{get_log_dir, get_progress_log_file, get_run_log_file};
use crate::client::pipeline_manager::{PipelineManager, PipelineSettings, RunOutcome};
use crate::client::relocate::relocate_outputs;
use crate::client::report::{ProgressReporter, render_summary};
use crate::client::stage_graph::StageGraphBuilder;
use crate::config::NanopipeConfig;

/// A writer that writes to both stdout and a file
struct MultiWriter {
    stdout: std::io::Stdout,
    file: File,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stdout.write_all(buf)?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stdout.flush()?;
        self.file.flush()
    }
}

/// Arguments for the run command
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub inputs: PipelineInputs,
    /// Directory for submission scripts, overrides `slurm.working_dir`
    pub work_dir: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub poll_interval: Option<f64>,
    pub lanes: Option<usize>,
    pub log_level: Option<String>,
}

impl RunArgs {
    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut NanopipeConfig) {
        if let Some(poll_interval) = self.poll_interval {
            config.run.poll_interval_secs = poll_interval;
        }
        if let Some(lanes) = self.lanes {
            config.pipeline.lanes = lanes;
        }
        if let Some(level) = &self.log_level {
            config.run.log_level = level.clone();
        }
        if let Some(work_dir) = &self.work_dir {
            config.slurm.working_dir = work_dir.clone();
        }
    }
}

pub fn parse_log_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to 'info'", level);
            LevelFilter::Info
        }
    }
}

fn init_logging(log_file_path: &Path, level: &str) -> Result<()> {
    let log_file = File::create(log_file_path)
        .with_context(|| format!("Error creating log file {}", log_file_path.display()))?;
    let multi_writer = MultiWriter {
        stdout: std::io::stdout(),
        file: log_file,
    };

    let mut builder = Builder::from_default_env();
    builder
        .target(env_logger::Target::Pipe(Box::new(multi_writer)))
        .filter_level(parse_log_level(level))
        .try_init()
        .ok(); // Ignore error if logger is already initialized
    Ok(())
}

pub fn run_pipeline(args: &RunArgs) -> Result<RunOutcome> {
    let mut config = load_config(args.config_file.as_deref())?;
    args.apply_overrides(&mut config);
    ensure_valid(&config)?;

    let inputs = &args.inputs;
    fs::create_dir_all(get_log_dir(&inputs.out_dir)).with_context(|| {
        format!("Error creating output directory {}", inputs.out_dir.display())
    })?;
    let log_file_path = get_run_log_file(&inputs.out_dir, Local::now());
    init_logging(&log_file_path, &config.run.log_level)?;

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    info!(
        "Run started in_dir={} out_dir={} model={} threads={} hostname={} log_file={}",
        inputs.in_dir.display(),
        inputs.out_dir.display(),
        inputs.model.display(),
        inputs.threads,
        hostname,
        log_file_path.display()
    );

    let prepared = prepare_run(inputs, &config)?;
    for dir in prepared.tools.layout().all_dirs() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Error creating output directory {}", dir.display()))?;
    }
    info!(
        "Discovered samples={} lanes={}",
        prepared.samples.len(),
        config.pipeline.lanes
    );

    let hpc = SlurmInterface::new(
        config.slurm.clone(),
        Duration::from_secs(config.run.command_timeout_secs),
    )?;
    let builder = StageGraphBuilder::new(
        &config.pipeline,
        &config.slurm,
        &prepared.tools,
        inputs.threads,
    );
    let reporter = ProgressReporter::new(
        Some(get_progress_log_file(&inputs.out_dir)),
        std::io::stdout().is_terminal(),
    );

    let mut manager = PipelineManager::new(
        hpc,
        builder,
        prepared.lanes,
        prepared.samples,
        reporter,
        PipelineSettings::from_run_config(&config.run)?,
    );

    let termination_flag = manager.get_termination_flag();
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            warn!("Received signal {}, stopping after the current cycle", sig);
            termination_flag.store(true, Ordering::SeqCst);
        }
    });

    let outcome = manager.run();
    println!("{}", render_summary(manager.tracker()));

    match outcome {
        RunOutcome::Finished => {
            info!("All samples processed, moving files to their folders");
            relocate_outputs(prepared.tools.layout())?;
        }
        RunOutcome::Stalled => warn!("Run stalled; outputs were not relocated"),
        RunOutcome::Interrupted => warn!("Run interrupted; outputs were not relocated"),
    }
    Ok(outcome)
}
