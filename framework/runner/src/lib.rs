mod cli;
mod collaborators;
mod config;
mod definition;
mod environment;
mod executor;
mod init;
mod lifecycle;
mod literal;
mod matrix;
mod progress;
mod recorder;
mod report;
mod run;
mod scenario;
mod types;
mod worker;
mod workload;

pub mod prelude {
    pub use crate::cli::{BenchCommand, DocbenchCli, Isolation, RunArgs, SummaryArgs};
    pub use crate::collaborators::{
        AddDocumentReply, Collaborators, ContainerHandle, ContainerRuntime, ContainerSpec,
        DocumentSource, GpuProbe, LaunchArgs, LoadedModel, LocalEngine, ServiceClient,
        ServiceConnector, UploadedFile,
    };
    pub use crate::config::{BackendConfig, BenchConfig, WorkloadConfig};
    pub use crate::definition::BenchmarkDefinitionBuilder;
    pub use crate::environment::{gpu_visibility, GPU_VISIBILITY_ENV, HARNESS_VERSION};
    pub use crate::executor::Executor;
    pub use crate::init::init;
    pub use crate::lifecycle::{BackendManager, RunningBackend};
    pub use crate::matrix::MatrixAxes;
    pub use crate::recorder::ResultRecorder;
    pub use crate::report::{compare_latest, records_table, Comparison};
    pub use crate::run::{run, MatrixReport};
    pub use crate::scenario::{ScenarioOutcome, ScenarioRunner, ScenarioState};
    pub use crate::types::DocbenchResult;
    pub use crate::workload::{Generation, Summary, UploadedDocument, WorkloadDriver};

    pub use docbench_core::prelude::*;
    pub use docbench_instruments::{OperationRecord, Reporter};
    pub use docbench_summary_model::{
        BackendKind, BenchmarkRecord, FailureKind, FailureStage, Quantization, ScenarioDescriptor,
        Task, TaskSet,
    };
}
