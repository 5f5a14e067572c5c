use std::path::{Path, PathBuf};

use docbench_summary_model::{append_record, BenchmarkRecord};

/// Appends records to the results log.
///
/// Recording is best effort. A failed write is logged and never fails the scenario, the outcome
/// of a run matters more than whether it was persisted.
#[derive(Debug, Clone)]
pub struct ResultRecorder {
    path: PathBuf,
}

impl ResultRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether the record was written.
    pub fn append(&self, record: &BenchmarkRecord) -> bool {
        match append_record(record, &self.path) {
            Ok(()) => {
                log::debug!(
                    "Recorded {} to {}",
                    record.scenario.label(),
                    self.path.display()
                );
                true
            }
            Err(e) => {
                log::error!(
                    "Failed to record {} to {}: {e:?}",
                    record.scenario.label(),
                    self.path.display()
                );
                false
            }
        }
    }
}
