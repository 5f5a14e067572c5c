mod report;

use std::time::{Duration, Instant};

pub use report::Reporter;

/// Timing of a single remote call.
///
/// Create the record immediately before the call and finish it immediately after, so the elapsed
/// time brackets the call and nothing else.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    operation_id: String,
    started: Instant,
    elapsed: Option<Duration>,
    is_error: bool,
}

impl OperationRecord {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            started: Instant::now(),
            elapsed: None,
            is_error: false,
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Stop the clock. Only the first call has an effect.
    pub fn finish<T, E>(&mut self, response: &Result<T, E>) -> Duration {
        *self.elapsed.get_or_insert_with(|| {
            self.is_error = response.is_err();
            self.started.elapsed()
        })
    }

    /// The elapsed time, if the operation has finished.
    pub fn duration(&self) -> Option<Duration> {
        self.elapsed
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }
}
