use docbench_backends::prelude::{DockerCli, LocalCommandEngine, NvidiaSmi};
use docbench_client::prelude::{HttpConnector, HttpDocumentFetcher};
use docbench_runner::prelude::*;

fn main() -> DocbenchResult<()> {
    let cli = init();

    let builder = BenchmarkDefinitionBuilder::new(env!("CARGO_PKG_NAME"), cli)
        .use_container_runtime(DockerCli::new())
        .use_local_engine(LocalCommandEngine::new())
        .use_gpu_probe(NvidiaSmi::new())
        .use_service_connector(HttpConnector)
        .use_document_source(HttpDocumentFetcher::default());

    run(builder)?;

    Ok(())
}
