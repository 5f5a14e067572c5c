use std::fmt::{Display, Formatter};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha3::Digest;

use crate::scenario::ScenarioDescriptor;

/// The closed set of reasons a scenario attempt can fail for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BackendStartupTimeout,
    BackendStartupError,
    UploadError,
    SummarizationError,
    GenerationError,
    ContractViolation,
    OutOfMemory,
    Unclassified,
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::BackendStartupTimeout => "BackendStartupTimeout",
            FailureKind::BackendStartupError => "BackendStartupError",
            FailureKind::UploadError => "UploadError",
            FailureKind::SummarizationError => "SummarizationError",
            FailureKind::GenerationError => "GenerationError",
            FailureKind::ContractViolation => "ContractViolation",
            FailureKind::OutOfMemory => "OutOfMemory",
            FailureKind::Unclassified => "Unclassified",
        };
        f.write_str(name)
    }
}

/// Where in the scenario a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Environment,
    Startup,
    Document,
    Upload,
    Summarize,
    Generate,
    /// The isolated worker running the scenario died without recording.
    Worker,
}

/// Metadata about the machine and code a scenario ran against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// Short revision of the code under test, if it could be determined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    /// Number of GPUs visible to the scenario.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_gpus: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpus: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harness_version: Option<String>,
}

/// Measurements from a successful summarization.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarizeOutcome {
    pub input_len_bytes: u64,
    pub output_len_bytes: u64,
    pub elapsed: Duration,
}

/// Measurements from a successful generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOutcome {
    pub output_len_bytes: u64,
    pub elapsed: Duration,
}

/// The overall result a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Succeeded,
    Skipped,
    Failed,
}

/// One persisted outcome of running a single scenario.
///
/// Task measurements are only set once the task has completed, so a record for an attempt that
/// failed part way through keeps the measurements of the tasks that did complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    /// Shared by every record written during one run of the matrix.
    pub run_id: String,
    #[serde(flatten)]
    pub scenario: ScenarioDescriptor,
    /// See [fingerprint].
    pub fingerprint: String,
    #[serde(flatten)]
    pub environment: EnvironmentInfo,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarize_input_len_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarize_output_len_bytes: Option<u64>,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarize_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_output_len_bytes: Option<u64>,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_time: Option<f64>,

    /// Why the scenario was not run, if it was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    /// The canonical failure code, or the raw error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_stage: Option<FailureStage>,
}

impl BenchmarkRecord {
    pub fn new(run_id: impl Into<String>, scenario: ScenarioDescriptor, harness_version: &str) -> Self {
        let fingerprint = fingerprint(&scenario, harness_version);
        Self {
            run_id: run_id.into(),
            scenario,
            fingerprint,
            environment: EnvironmentInfo::default(),
            summarize_input_len_bytes: None,
            summarize_output_len_bytes: None,
            summarize_time: None,
            generate_output_len_bytes: None,
            generate_time: None,
            skipped: None,
            failure_reason: None,
            failure_kind: None,
            failure_stage: None,
        }
    }

    pub fn set_environment(&mut self, environment: EnvironmentInfo) {
        self.environment = environment;
    }

    pub fn record_summarize(&mut self, outcome: &SummarizeOutcome) {
        self.summarize_input_len_bytes = Some(outcome.input_len_bytes);
        self.summarize_output_len_bytes = Some(outcome.output_len_bytes);
        self.summarize_time = Some(outcome.elapsed.as_secs_f64());
    }

    pub fn record_generate(&mut self, outcome: &GenerateOutcome) {
        self.generate_output_len_bytes = Some(outcome.output_len_bytes);
        self.generate_time = Some(outcome.elapsed.as_secs_f64());
    }

    /// Mark the attempt as failed. The first failure wins, later calls are ignored.
    pub fn record_failure(&mut self, stage: FailureStage, kind: FailureKind, reason: impl Into<String>) {
        if self.failure_reason.is_some() {
            return;
        }

        self.failure_stage = Some(stage);
        self.failure_kind = Some(kind);
        self.failure_reason = Some(reason.into());
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.skipped = Some(reason.into());
    }

    pub fn outcome(&self) -> RecordOutcome {
        if self.failure_reason.is_some() {
            RecordOutcome::Failed
        } else if self.skipped.is_some() {
            RecordOutcome::Skipped
        } else {
            RecordOutcome::Succeeded
        }
    }
}

/// Compute a fingerprint for a scenario configuration.
///
/// The fingerprint identifies the configuration independently of when or where it ran, so that
/// records from different runs can be compared. It uses the
///     - Backend kind
///     - Model id
///     - Tasks
///     - Quantization
///     - GPU count
///     - Harness version
///
/// The fingerprint is computed using [sha3::Sha3_256].
pub fn fingerprint(scenario: &ScenarioDescriptor, harness_version: &str) -> String {
    let mut hasher = sha3::Sha3_256::new();
    Digest::update(&mut hasher, scenario.backend.as_str().as_bytes());
    Digest::update(&mut hasher, scenario.model_id.as_bytes());
    Digest::update(&mut hasher, scenario.tasks.to_string().as_bytes());
    Digest::update(&mut hasher, scenario.quantization.as_str().as_bytes());
    Digest::update(&mut hasher, scenario.gpu_count.get().to_le_bytes());
    Digest::update(&mut hasher, harness_version.as_bytes());

    format!("{:x}", hasher.finalize())
}
