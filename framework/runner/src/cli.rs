use std::num::NonZeroU32;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use docbench_summary_model::{BackendKind, Quantization, TaskSet};

#[derive(Parser, Debug, Clone)]
#[command(about, long_about = None)]
pub struct DocbenchCli {
    /// Path to a TOML configuration file.
    ///
    /// Anything the file does not set falls back to the built-in defaults.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// The results log that records are appended to. Overrides the configuration file.
    #[clap(long, global = true)]
    pub results: Option<PathBuf>,

    #[command(subcommand)]
    pub command: BenchCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum BenchCommand {
    /// Run every supported scenario in the configuration matrix.
    Run(RunArgs),
    /// Compare the latest results in the results log against the previous ones.
    Summary(SummaryArgs),
    /// Run a single scenario. Used by `run` to isolate scenarios from each other.
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Only run these backend kinds. Replaces the configured list, may be repeated or comma separated.
    #[clap(long = "backend", value_delimiter = ',')]
    pub backends: Vec<BackendKind>,

    /// Only run these models. Replaces the configured list.
    #[clap(long = "model", value_delimiter = ',')]
    pub models: Vec<String>,

    /// Only run these task sets, for example `summarize+generate`. Replaces the configured list.
    #[clap(long = "tasks", value_delimiter = ',')]
    pub tasks: Vec<TaskSet>,

    /// Only run these quantizations, one of `full`, `8bit` or `4bit`. Replaces the configured list.
    #[clap(long = "quantization", value_delimiter = ',')]
    pub quantizations: Vec<Quantization>,

    /// Only run with these GPU counts. Replaces the configured list.
    #[clap(long = "gpus", value_delimiter = ',')]
    pub gpu_counts: Vec<NonZeroU32>,

    /// How scenarios are isolated from each other.
    ///
    /// With `process` each scenario runs in a fresh child process, so that a crash or a leaked
    /// GPU allocation cannot affect the scenarios after it.
    #[clap(long, value_enum, default_value_t = Isolation::Process)]
    pub isolation: Isolation,

    /// Stop after the first failed scenario instead of continuing with the rest of the matrix.
    #[clap(long, default_value = "false")]
    pub fail_fast: bool,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// Identifier shared by every record of this run. Generated if not set.
    #[clap(long)]
    pub run_id: Option<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SummaryArgs {
    /// Flag a timing as a regression when it is slower than the previous result by more than this
    /// many percent.
    #[clap(long, default_value_t = 10.0)]
    pub threshold: f64,
}

#[derive(clap::Args, Debug, Clone)]
pub struct WorkerArgs {
    #[clap(long)]
    pub run_id: String,

    /// The scenario to run, as JSON.
    #[clap(long)]
    pub scenario: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    /// Run each scenario in a child process.
    #[default]
    Process,
    /// Run every scenario in this process.
    None,
}
