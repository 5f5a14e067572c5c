use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use docbench_core::prelude::{classify_failure, BenchError};
use docbench_instruments::Reporter;
use docbench_summary_model::{
    BenchmarkRecord, FailureKind, FailureStage, GenerateOutcome, ScenarioDescriptor,
    SummarizeOutcome, Task,
};

use crate::collaborators::Collaborators;
use crate::config::{BenchConfig, WorkloadConfig};
use crate::environment::{collect_environment, gpu_visibility, HARNESS_VERSION};
use crate::executor::Executor;
use crate::lifecycle::{BackendManager, RunningBackend};
use crate::recorder::ResultRecorder;
use crate::workload::WorkloadDriver;

/// How a scenario attempt ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioOutcome {
    Succeeded,
    Skipped,
}

/// The lifecycle of a single scenario attempt.
///
/// ```text
/// Pending -> Starting -> Running -> Succeeded -> Recorded -> TornDown
///    |          |           |                      ^
///    +----------+-----------+-----> Failed --------+
///    +-----------------------------> Skipped ------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    Pending,
    Starting,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Recorded,
    TornDown,
}

impl ScenarioState {
    pub fn can_transition_to(&self, next: ScenarioState) -> bool {
        use ScenarioState::*;

        matches!(
            (self, next),
            (Pending, Starting)
                | (Pending, Skipped)
                | (Pending, Failed)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Succeeded, Recorded)
                | (Failed, Recorded)
                | (Skipped, Recorded)
                | (Recorded, TornDown)
        )
    }
}

/// Runs scenarios one at a time in this process.
pub struct ScenarioRunner {
    run_id: String,
    workload: WorkloadConfig,
    manager: BackendManager,
    collaborators: Collaborators,
    recorder: ResultRecorder,
    reporter: Arc<Reporter>,
}

impl ScenarioRunner {
    pub fn new(
        run_id: impl Into<String>,
        config: &BenchConfig,
        collaborators: Collaborators,
        executor: Arc<Executor>,
        reporter: Arc<Reporter>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            workload: config.workload.clone(),
            manager: BackendManager::new(
                config.backend.clone(),
                &config.workload,
                collaborators.clone(),
                executor,
            ),
            collaborators,
            recorder: ResultRecorder::new(config.results_path.clone()),
            reporter,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run one scenario and write exactly one record for it.
    ///
    /// Whatever happens, including a panic, the record is appended and the backend stopped before
    /// this returns or unwinds. A failure is returned to the caller after that has happened.
    pub fn run_scenario(&self, scenario: &ScenarioDescriptor) -> anyhow::Result<ScenarioOutcome> {
        log::info!("Running scenario {}", scenario.label());

        let mut attempt = ScenarioAttempt {
            recorder: &self.recorder,
            manager: &self.manager,
            record: BenchmarkRecord::new(self.run_id.clone(), scenario.clone(), HARNESS_VERSION),
            backend: self.manager.prepare(scenario),
            stage: FailureStage::Environment,
            state: ScenarioState::Pending,
        };

        let result = self.execute(scenario, &mut attempt);
        match &result {
            Ok(ScenarioOutcome::Succeeded) => attempt.transition(ScenarioState::Succeeded),
            Ok(ScenarioOutcome::Skipped) => {}
            Err(e) => attempt.fail(e),
        }
        drop(attempt);

        match &result {
            Ok(outcome) => log::info!("Scenario {} finished: {outcome:?}", scenario.label()),
            Err(e) => log::error!("Scenario {} failed: {e:?}", scenario.label()),
        }
        result
    }

    fn execute(
        &self,
        scenario: &ScenarioDescriptor,
        attempt: &mut ScenarioAttempt<'_>,
    ) -> anyhow::Result<ScenarioOutcome> {
        let gpus = self
            .collaborators
            .gpus
            .visible_devices(&gpu_visibility(scenario.gpu_count))
            .context("Failed to detect GPUs")?;
        let requested = scenario.gpu_count.get() as usize;
        if gpus.len() != requested {
            let reason = format!("requested {requested} GPUs but {} are visible", gpus.len());
            log::warn!("Skipping {}: {reason}", scenario.label());
            attempt.record.mark_skipped(reason);
            attempt.transition(ScenarioState::Skipped);
            return Ok(ScenarioOutcome::Skipped);
        }
        attempt.record.set_environment(collect_environment(gpus));

        attempt.transition(ScenarioState::Starting);
        attempt.stage = FailureStage::Startup;
        self.manager.start(scenario, &mut attempt.backend)?;
        attempt.transition(ScenarioState::Running);

        let client = self
            .collaborators
            .connector
            .connect(attempt.backend.endpoint()?, self.workload.request_timeout())
            .context(BenchError::startup("Failed to connect to the summarization service"))?;
        let mut driver = WorkloadDriver::new(client, self.workload.clone(), self.reporter.clone());

        if scenario.tasks.contains(Task::Summarize) {
            attempt.stage = FailureStage::Document;
            let path = self.fetch_document()?;
            let input_len_bytes = std::fs::metadata(&path)?.len();

            attempt.stage = FailureStage::Upload;
            let document = driver.upload_document(&path)?;
            driver.add_document(&document)?;

            attempt.stage = FailureStage::Summarize;
            let summary = driver.run_summarization(&document)?;
            let outcome = SummarizeOutcome {
                input_len_bytes,
                output_len_bytes: summary.response.len() as u64,
                elapsed: summary.elapsed,
            };
            log::info!(
                "Time to summarize {} bytes into {} bytes: {:.4}s",
                outcome.input_len_bytes,
                outcome.output_len_bytes,
                outcome.elapsed.as_secs_f64()
            );
            attempt.record.record_summarize(&outcome);
        }

        if scenario.tasks.contains(Task::Generate) {
            attempt.stage = FailureStage::Generate;
            let generation = driver.run_generation(&self.workload.generation_prompt)?;
            let outcome = GenerateOutcome {
                output_len_bytes: generation.response.len() as u64,
                elapsed: generation.elapsed,
            };
            log::info!(
                "Time to generate {} bytes: {:.4}s",
                outcome.output_len_bytes,
                outcome.elapsed.as_secs_f64()
            );
            attempt.record.record_generate(&outcome);
        }

        Ok(ScenarioOutcome::Succeeded)
    }

    fn fetch_document(&self) -> anyhow::Result<PathBuf> {
        let path = self
            .collaborators
            .documents
            .fetch(&self.workload.document_url, &self.workload.document_path)
            .with_context(|| format!("Failed to fetch {}", self.workload.document_url))?;

        let size = std::fs::metadata(&path)
            .with_context(|| format!("Fetched document is missing: {}", path.display()))?
            .len();
        if size == 0 {
            anyhow::bail!("Fetched document is empty: {}", path.display());
        }

        Ok(path)
    }
}

/// One attempt at a scenario. Dropping it records the result and stops the backend.
struct ScenarioAttempt<'a> {
    recorder: &'a ResultRecorder,
    manager: &'a BackendManager,
    record: BenchmarkRecord,
    backend: RunningBackend,
    stage: FailureStage,
    state: ScenarioState,
}

impl ScenarioAttempt<'_> {
    fn transition(&mut self, next: ScenarioState) {
        if !self.state.can_transition_to(next) {
            log::warn!(
                "Unexpected transition for {}: {:?} -> {next:?}",
                self.record.scenario.label(),
                self.state
            );
        }
        log::debug!(
            "{}: {:?} -> {next:?}",
            self.record.scenario.label(),
            self.state
        );
        self.state = next;
    }

    fn fail(&mut self, err: &anyhow::Error) {
        let failure = classify_failure(err);
        self.record
            .record_failure(self.stage, failure.kind, failure.reason);
        self.transition(ScenarioState::Failed);
    }
}

impl Drop for ScenarioAttempt<'_> {
    fn drop(&mut self) {
        if std::thread::panicking()
            && !matches!(self.state, ScenarioState::Failed | ScenarioState::Skipped)
        {
            self.record.record_failure(
                self.stage,
                FailureKind::Unclassified,
                "The scenario panicked",
            );
            self.transition(ScenarioState::Failed);
        }

        self.recorder.append(&self.record);
        self.transition(ScenarioState::Recorded);

        self.manager.stop(&mut self.backend);
        self.transition(ScenarioState::TornDown);
    }
}
