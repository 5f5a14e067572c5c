use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use anyhow::{bail, Context};
use docbench_summary_model::{
    count_records, load_records_from_file, BenchmarkRecord, FailureKind, FailureStage,
    RecordOutcome, ScenarioDescriptor,
};

use crate::environment::HARNESS_VERSION;
use crate::recorder::ResultRecorder;
use crate::scenario::ScenarioOutcome;

/// Runs each scenario in a child process started from this executable.
///
/// The child runs the hidden `worker` command, which records its own result. If the child dies
/// before recording, for example because the backend took the whole process down, a failure
/// record is written on its behalf so that every scenario still has exactly one record.
pub struct IsolatedRunner {
    run_id: String,
    config_path: Option<PathBuf>,
    recorder: ResultRecorder,
    executable: PathBuf,
}

impl IsolatedRunner {
    pub fn new(run_id: impl Into<String>, config_path: Option<PathBuf>, results_path: PathBuf) -> anyhow::Result<Self> {
        let executable = std::env::current_exe().context("Failed to locate the harness executable")?;
        Ok(Self::with_executable(run_id, config_path, results_path, executable))
    }

    pub fn with_executable(
        run_id: impl Into<String>,
        config_path: Option<PathBuf>,
        results_path: PathBuf,
        executable: PathBuf,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            config_path,
            recorder: ResultRecorder::new(results_path),
            executable,
        }
    }

    pub fn run_scenario(&self, scenario: &ScenarioDescriptor) -> anyhow::Result<ScenarioOutcome> {
        let results_path = self.recorder.path();
        let before = count_records(results_path).unwrap_or_else(|e| {
            log::warn!("Failed to read {}: {e:?}", results_path.display());
            0
        });

        let mut command = Command::new(&self.executable);
        if let Some(config_path) = &self.config_path {
            command.arg("--config").arg(config_path);
        }
        command
            .arg("--results")
            .arg(results_path)
            .arg("worker")
            .arg("--run-id")
            .arg(&self.run_id)
            .arg("--scenario")
            .arg(serde_json::to_string(scenario)?);

        log::debug!("Starting worker for {}", scenario.label());
        let status = match command.status() {
            Ok(status) => status,
            Err(e) => {
                let reason = format!("Failed to start the worker: {e}");
                self.record_fallback(scenario, &reason);
                bail!(reason);
            }
        };

        match self.recorded_by_worker(scenario, results_path, before) {
            Some(record) => outcome_of(scenario, &record, status),
            None => {
                let reason = format!("The worker exited with {status} without recording a result");
                self.record_fallback(scenario, &reason);
                bail!("Scenario {} failed: {reason}", scenario.label());
            }
        }
    }

    /// The record the worker appended for this scenario, if it got that far.
    fn recorded_by_worker(
        &self,
        scenario: &ScenarioDescriptor,
        results_path: &Path,
        before: usize,
    ) -> Option<BenchmarkRecord> {
        let after = count_records(results_path).ok()?;
        if after <= before {
            return None;
        }

        match load_records_from_file(results_path) {
            Ok(records) => records
                .into_iter()
                .rev()
                .find(|record| record.run_id == self.run_id && &record.scenario == scenario),
            Err(e) => {
                log::warn!("Failed to read {}: {e:?}", results_path.display());
                None
            }
        }
    }

    fn record_fallback(&self, scenario: &ScenarioDescriptor, reason: &str) {
        let mut record = BenchmarkRecord::new(self.run_id.clone(), scenario.clone(), HARNESS_VERSION);
        record.record_failure(FailureStage::Worker, FailureKind::Unclassified, reason);
        self.recorder.append(&record);
    }
}

fn outcome_of(
    scenario: &ScenarioDescriptor,
    record: &BenchmarkRecord,
    status: ExitStatus,
) -> anyhow::Result<ScenarioOutcome> {
    match record.outcome() {
        RecordOutcome::Succeeded => {
            if !status.success() {
                log::warn!(
                    "Worker for {} recorded success but exited with {status}",
                    scenario.label()
                );
            }
            Ok(ScenarioOutcome::Succeeded)
        }
        RecordOutcome::Skipped => Ok(ScenarioOutcome::Skipped),
        RecordOutcome::Failed => bail!(
            "Scenario {} failed: {}",
            scenario.label(),
            record.failure_reason.as_deref().unwrap_or("unknown reason")
        ),
    }
}
