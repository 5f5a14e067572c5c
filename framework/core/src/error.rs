use docbench_summary_model::FailureKind;

/// The short code recorded in place of the driver message when a device runs out of memory.
pub const OOM_CODE: &str = "OOM";

/// Substrings of error text that indicate the device ran out of memory.
const OOM_SIGNATURES: &[&str] = &[
    "CUDA out of memory",
    "CUDA error: out of memory",
    "OutOfMemoryError",
];

/// Errors raised by the harness itself while running a scenario.
///
/// Failures that do not originate in the harness, for example a transport timeout while waiting
/// for a response, are passed through as they are and classified as [FailureKind::Unclassified].
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub enum BenchError {
    #[display("Backend did not become ready within {timeout_s}s: {target}")]
    BackendStartupTimeout { target: String, timeout_s: u64 },
    #[display("Backend failed to start: {reason}")]
    BackendStartupError { reason: String },
    #[display("Document upload failed: {reason}")]
    UploadError { reason: String },
    #[display("Summarization failed: {reason}")]
    SummarizationError { reason: String },
    #[display("Generation failed: {reason}")]
    GenerationError { reason: String },
    #[display("Contract violation: {reason}")]
    ContractViolation { reason: String },
}

impl BenchError {
    pub fn startup(reason: impl Into<String>) -> Self {
        BenchError::BackendStartupError {
            reason: reason.into(),
        }
    }

    pub fn upload(reason: impl Into<String>) -> Self {
        BenchError::UploadError {
            reason: reason.into(),
        }
    }

    pub fn summarization(reason: impl Into<String>) -> Self {
        BenchError::SummarizationError {
            reason: reason.into(),
        }
    }

    pub fn generation(reason: impl Into<String>) -> Self {
        BenchError::GenerationError {
            reason: reason.into(),
        }
    }

    pub fn contract(reason: impl Into<String>) -> Self {
        BenchError::ContractViolation {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            BenchError::BackendStartupTimeout { .. } => FailureKind::BackendStartupTimeout,
            BenchError::BackendStartupError { .. } => FailureKind::BackendStartupError,
            BenchError::UploadError { .. } => FailureKind::UploadError,
            BenchError::SummarizationError { .. } => FailureKind::SummarizationError,
            BenchError::GenerationError { .. } => FailureKind::GenerationError,
            BenchError::ContractViolation { .. } => FailureKind::ContractViolation,
        }
    }
}

/// A failure reduced to what gets persisted in a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedFailure {
    pub kind: FailureKind,
    pub reason: String,
}

/// Classify a scenario failure.
///
/// Device memory exhaustion is recognised anywhere in the error chain and reduced to [OOM_CODE].
/// Otherwise the kind comes from the first [BenchError] in the chain and the reason is the full
/// error chain text.
pub fn classify_failure(err: &anyhow::Error) -> ClassifiedFailure {
    let text = format!("{err:#}");
    if OOM_SIGNATURES.iter().any(|signature| text.contains(signature)) {
        return ClassifiedFailure {
            kind: FailureKind::OutOfMemory,
            reason: OOM_CODE.to_string(),
        };
    }

    let kind = err
        .downcast_ref::<BenchError>()
        .or_else(|| {
            err.chain()
                .find_map(|cause| cause.downcast_ref::<BenchError>())
        })
        .map(BenchError::kind)
        .unwrap_or(FailureKind::Unclassified);

    ClassifiedFailure { kind, reason: text }
}
