mod error;
mod interrupt;

pub mod prelude {
    pub use crate::error::{classify_failure, BenchError, ClassifiedFailure, OOM_CODE};
    pub use crate::interrupt::{InterruptHandle, InterruptListener, InterruptedError};
}
