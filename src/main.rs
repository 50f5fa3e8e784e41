use clap::{Parser, Subcommand, builder::styling};
use std::path::PathBuf;
use std::process::ExitCode;

use nanopipe::client::RunOutcome;
use nanopipe::client::commands::config::{init_config, show_config, validate_config};
use nanopipe::client::commands::plan::run_plan;
use nanopipe::client::commands::run::{RunArgs, run_pipeline};
use nanopipe::client::commands::{PipelineInputs, load_config};

const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::Green.on_default().bold())
    .usage(styling::AnsiColor::Green.on_default().bold())
    .literal(styling::AnsiColor::Cyan.on_default().bold())
    .placeholder(styling::AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "nanopipe")]
#[command(version, about = "Nanopore sample pipeline on Slurm", long_about = None)]
#[command(styles = STYLES)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct InputArgs {
    /// Directory holding one subdirectory per sample
    #[arg()]
    in_dir: PathBuf,

    /// Root of the pod5/ubam/bam/other output tree
    #[arg()]
    out_dir: PathBuf,

    /// Basecalling model directory
    #[arg(short, long)]
    model: PathBuf,

    /// Hardware threads per compute machine
    #[arg(short, long)]
    threads: u32,

    /// Extra configuration file applied after the standard locations
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl InputArgs {
    fn inputs(&self) -> PipelineInputs {
        PipelineInputs {
            in_dir: self.in_dir.clone(),
            out_dir: self.out_dir.clone(),
            model: self.model.clone(),
            threads: self.threads,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit the pipeline for every discovered sample and watch it to completion
    Run {
        #[command(flatten)]
        input: InputArgs,

        /// Directory for submission scripts and job output
        #[arg(short, long)]
        work_dir: Option<PathBuf>,

        /// Seconds between status polls
        #[arg(short, long)]
        poll_interval: Option<f64>,

        /// Number of accelerator lanes
        #[arg(long)]
        lanes: Option<usize>,

        /// Log level (error, warn, info, debug, trace)
        #[arg(long)]
        log_level: Option<String>,
    },
    /// Show the jobs a run would submit, without submitting
    Plan {
        #[command(flatten)]
        input: InputArgs,

        /// Number of accelerator lanes
        #[arg(long)]
        lanes: Option<usize>,

        /// Output format (table or json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
    /// Inspect and manage configuration files
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration
    Show {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write a default configuration file
    Init {
        /// Destination (defaults to the user configuration file)
        #[arg()]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long, default_value = "false")]
        force: bool,
    },
    /// Check the effective configuration for errors
    Validate {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            input,
            work_dir,
            poll_interval,
            lanes,
            log_level,
        } => {
            let args = RunArgs {
                inputs: input.inputs(),
                work_dir,
                config_file: input.config.clone(),
                poll_interval,
                lanes,
                log_level,
            };
            run_pipeline(&args).map(|outcome| match outcome {
                RunOutcome::Finished => ExitCode::SUCCESS,
                RunOutcome::Stalled => ExitCode::from(2),
                RunOutcome::Interrupted => ExitCode::from(130),
            })
        }
        Commands::Plan {
            input,
            lanes,
            format,
        } => load_config(input.config.as_deref()).and_then(|mut config| {
            if let Some(lanes) = lanes {
                config.pipeline.lanes = lanes;
            }
            run_plan(&input.inputs(), &config, &format).map(|_| ExitCode::SUCCESS)
        }),
        Commands::Config { action } => match action {
            ConfigCommands::Show { config } => {
                show_config(config.as_deref()).map(|_| ExitCode::SUCCESS)
            }
            ConfigCommands::Init { path, force } => {
                init_config(path.as_deref(), force).map(|_| ExitCode::SUCCESS)
            }
            ConfigCommands::Validate { config } => {
                validate_config(config.as_deref()).map(|_| ExitCode::SUCCESS)
            }
        },
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
