use std::sync::Arc;

use anyhow::Context;
use docbench_instruments::Reporter;
use docbench_summary_model::{load_records_from_file, ScenarioDescriptor};

use crate::cli::{BenchCommand, Isolation, RunArgs, SummaryArgs, WorkerArgs};
use crate::definition::{BenchmarkDefinition, BenchmarkDefinitionBuilder};
use crate::executor::Executor;
use crate::progress::MatrixProgress;
use crate::report::{print_comparison, records_table};
use crate::scenario::{ScenarioOutcome, ScenarioRunner};
use crate::worker::IsolatedRunner;

/// Counts of how the scenarios of a run ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatrixReport {
    pub run_id: String,
    pub succeeded: usize,
    pub skipped: usize,
    /// Labels of the scenarios that failed.
    pub failed: Vec<String>,
    /// Whether the run stopped before every scenario was attempted.
    pub stopped_early: bool,
}

/// Run the command selected on the command line.
///
/// For `run`, every supported scenario of the matrix is attempted in order and one record is
/// appended per scenario. The run fails if any scenario failed, after all of them were attempted
/// unless `--fail-fast` was given.
pub fn run(definition: BenchmarkDefinitionBuilder) -> anyhow::Result<MatrixReport> {
    let definition = definition.build()?;

    match definition.cli.command.clone() {
        BenchCommand::Run(args) => run_matrix(&definition, &args),
        BenchCommand::Worker(args) => run_worker(&definition, &args),
        BenchCommand::Summary(args) => run_summary(&definition, &args),
    }
}

fn run_matrix(definition: &BenchmarkDefinition, args: &RunArgs) -> anyhow::Result<MatrixReport> {
    let mut axes = definition.config.matrix.clone();
    axes.apply_overrides(args);
    axes.validate()?;

    let run_id = args.run_id.clone().unwrap_or_else(|| nanoid::nanoid!());
    log::info!(
        "Running benchmark {} with run id {run_id}, results go to {}",
        definition.name,
        definition.config.results_path.display()
    );
    for scenario in axes.unsupported() {
        log::info!("Skipping unsupported combination {}", scenario.label());
    }

    let executor = Arc::new(Executor::start().context("Failed to create Tokio runtime")?);
    let interrupt_handle = executor.interrupt_handle().clone();
    let reporter = Arc::new(Reporter::new());

    let attempt: Box<dyn Fn(&ScenarioDescriptor) -> anyhow::Result<ScenarioOutcome>> =
        match args.isolation {
            Isolation::Process => {
                let runner = IsolatedRunner::new(
                    run_id.clone(),
                    definition.cli.config.clone(),
                    definition.config.results_path.clone(),
                )?;
                Box::new(move |scenario: &ScenarioDescriptor| runner.run_scenario(scenario))
            }
            Isolation::None => {
                let runner = ScenarioRunner::new(
                    run_id.clone(),
                    &definition.config,
                    definition.collaborators.clone(),
                    executor.clone(),
                    reporter.clone(),
                );
                Box::new(move |scenario: &ScenarioDescriptor| runner.run_scenario(scenario))
            }
        };

    let progress = MatrixProgress::start(axes.scenarios().count(), args.no_progress);
    let mut report = MatrixReport {
        run_id: run_id.clone(),
        ..Default::default()
    };

    for scenario in axes.scenarios() {
        if interrupt_handle.is_interrupted() {
            log::warn!("Interrupted, not starting the remaining scenarios");
            report.stopped_early = true;
            break;
        }

        progress.begin(&scenario);
        match attempt(&scenario) {
            Ok(ScenarioOutcome::Succeeded) => report.succeeded += 1,
            Ok(ScenarioOutcome::Skipped) => report.skipped += 1,
            Err(e) => {
                log::error!("Scenario {} failed: {e:?}", scenario.label());
                report.failed.push(scenario.label());
                if args.fail_fast {
                    log::warn!("Stopping after the first failure");
                    report.stopped_early = true;
                    progress.complete();
                    break;
                }
            }
        }
        progress.complete();
    }
    progress.finish();

    reporter.print_summary();
    match load_records_from_file(&definition.config.results_path) {
        Ok(records) => {
            let records = records
                .into_iter()
                .filter(|record| record.run_id == run_id)
                .collect::<Vec<_>>();
            if let Some(table) = records_table(&records) {
                println!("\nResults of run {run_id}\n{table}");
            }
        }
        Err(e) => log::warn!("Failed to read back the results: {e:?}"),
    }

    log::info!(
        "Run {run_id} finished: {} succeeded, {} skipped, {} failed",
        report.succeeded,
        report.skipped,
        report.failed.len()
    );

    if !report.failed.is_empty() {
        anyhow::bail!(
            "{} scenarios failed: {}",
            report.failed.len(),
            report.failed.join(", ")
        );
    }

    Ok(report)
}

/// Run a single scenario on behalf of an isolated `run`.
fn run_worker(definition: &BenchmarkDefinition, args: &WorkerArgs) -> anyhow::Result<MatrixReport> {
    let scenario: ScenarioDescriptor =
        serde_json::from_str(&args.scenario).context("Invalid scenario passed to the worker")?;

    let executor = Arc::new(Executor::start().context("Failed to create Tokio runtime")?);
    let reporter = Arc::new(Reporter::new());
    let runner = ScenarioRunner::new(
        args.run_id.clone(),
        &definition.config,
        definition.collaborators.clone(),
        executor,
        reporter.clone(),
    );

    let outcome = runner.run_scenario(&scenario);
    reporter.print_summary();

    let mut report = MatrixReport {
        run_id: args.run_id.clone(),
        ..Default::default()
    };
    match outcome? {
        ScenarioOutcome::Succeeded => report.succeeded = 1,
        ScenarioOutcome::Skipped => report.skipped = 1,
    }
    Ok(report)
}

fn run_summary(definition: &BenchmarkDefinition, args: &SummaryArgs) -> anyhow::Result<MatrixReport> {
    print_comparison(&definition.config.results_path, args.threshold)?;
    Ok(MatrixReport::default())
}
