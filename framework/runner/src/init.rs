use crate::cli::DocbenchCli;
use clap::Parser;

/// Initialise the CLI and logging for the benchmark harness.
pub fn init() -> DocbenchCli {
    env_logger::init();

    DocbenchCli::parse()
}
