use std::sync::Arc;

use anyhow::Context;

use crate::cli::DocbenchCli;
use crate::collaborators::{
    Collaborators, ContainerRuntime, DocumentSource, GpuProbe, LocalEngine, ServiceConnector,
};
use crate::config::BenchConfig;

/// The builder for a benchmark definition.
///
/// This must be used at the start of a benchmark binary to supply the collaborators the harness
/// drives. Every collaborator is required.
pub struct BenchmarkDefinitionBuilder {
    /// The name of the benchmark.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    /// This value is initialised for you and you cannot change it.
    #[doc(hidden)]
    cli: DocbenchCli,
    containers: Option<Arc<dyn ContainerRuntime>>,
    engine: Option<Arc<dyn LocalEngine>>,
    gpus: Option<Arc<dyn GpuProbe>>,
    connector: Option<Arc<dyn ServiceConnector>>,
    documents: Option<Arc<dyn DocumentSource>>,
}

pub struct BenchmarkDefinition {
    pub name: String,
    pub cli: DocbenchCli,
    pub config: BenchConfig,
    pub collaborators: Collaborators,
}

impl BenchmarkDefinitionBuilder {
    /// Initialise a new benchmark definition from the benchmark name and command line arguments.
    /// See the [BenchmarkDefinitionBuilder::name] for more information about the name.
    pub fn new(name: &str, cli: DocbenchCli) -> Self {
        Self {
            name: name.to_string(),
            cli,
            containers: None,
            engine: None,
            gpus: None,
            connector: None,
            documents: None,
        }
    }

    /// Set the container runtime used to launch the single and dual service backends.
    pub fn use_container_runtime(mut self, containers: impl ContainerRuntime + 'static) -> Self {
        self.containers = Some(Arc::new(containers));
        self
    }

    /// Set the engine that loads the model for the in-process and dual service backends.
    pub fn use_local_engine(mut self, engine: impl LocalEngine + 'static) -> Self {
        self.engine = Some(Arc::new(engine));
        self
    }

    pub fn use_gpu_probe(mut self, gpus: impl GpuProbe + 'static) -> Self {
        self.gpus = Some(Arc::new(gpus));
        self
    }

    pub fn use_service_connector(mut self, connector: impl ServiceConnector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn use_document_source(mut self, documents: impl DocumentSource + 'static) -> Self {
        self.documents = Some(Arc::new(documents));
        self
    }

    pub(crate) fn build(self) -> anyhow::Result<BenchmarkDefinition> {
        let mut config = match &self.cli.config {
            Some(path) => BenchConfig::load(path)?,
            None => BenchConfig::default(),
        };
        if let Some(results) = &self.cli.results {
            config.results_path = results.clone();
        }

        let collaborators = Collaborators {
            containers: self
                .containers
                .context("No container runtime configured, call use_container_runtime")?,
            engine: self
                .engine
                .context("No local engine configured, call use_local_engine")?,
            gpus: self
                .gpus
                .context("No GPU probe configured, call use_gpu_probe")?,
            connector: self
                .connector
                .context("No service connector configured, call use_service_connector")?,
            documents: self
                .documents
                .context("No document source configured, call use_document_source")?,
        };

        Ok(BenchmarkDefinition {
            name: self.name,
            cli: self.cli,
            config,
            collaborators,
        })
    }
}
