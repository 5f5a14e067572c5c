//! The seams between the harness and the outside world.
//!
//! The runner only talks to containers, GPUs, the summarization service and the document host
//! through these traits. Real implementations live in the bindings crates, tests supply fakes.

use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use docbench_summary_model::Quantization;
use url::Url;

use crate::executor::Executor;

/// A container to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Used to name the container, the runtime may add a suffix to keep names unique.
    pub name: String,
    pub image: String,
    /// `(host, container)` port pairs to publish.
    pub ports: Vec<(u16, u16)>,
    pub network: Option<String>,
    pub env: Vec<(String, String)>,
    /// Indices of the GPUs the container may use.
    pub gpu_devices: Vec<u32>,
    pub args: Vec<String>,
}

/// Opaque identifier of a launched container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContainerHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait ContainerRuntime: Send + Sync {
    /// Launch a container in the background and return as soon as it has been created.
    fn start(&self, spec: &ContainerSpec) -> anyhow::Result<ContainerHandle>;

    /// The last `lines` lines of the container's output.
    fn logs_tail(&self, handle: &ContainerHandle, lines: usize) -> anyhow::Result<String>;

    fn stop(&self, handle: &ContainerHandle) -> anyhow::Result<()>;
}

/// Everything needed to launch the summarization service for a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchArgs {
    pub model_id: String,
    pub quantization: Quantization,
    pub gpu_count: NonZeroU32,
    pub port: u16,
    pub max_new_tokens: u32,
    pub collection: String,
    /// Delegate generation to this inference service instead of loading the model locally.
    pub inference_server: Option<Url>,
    /// The host the service is reached on.
    pub host: String,
    /// Program and leading arguments that start the service on this machine.
    pub command: Vec<String>,
    /// Variables set for the service process only, including the GPU visibility.
    pub env: Vec<(String, String)>,
}

impl LaunchArgs {
    /// Command line arguments understood by the summarization service.
    pub fn service_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--base_model={}", self.model_id),
            format!("--load_half={}", py_bool(self.quantization == Quantization::Full)),
            format!("--load_8bit={}", py_bool(self.quantization == Quantization::EightBit)),
            format!("--load_4bit={}", py_bool(self.quantization == Quantization::FourBit)),
            format!("--max_new_tokens={}", self.max_new_tokens),
            format!("--use_gpu_id={}", py_bool(self.gpu_count.get() == 1)),
            format!("--langchain_mode={}", self.collection),
            format!("--server_port={}", self.port),
            "--gradio=True".to_string(),
            "--share=False".to_string(),
        ];
        if let Some(inference_server) = &self.inference_server {
            args.push(format!("--inference_server={}", inference_server.as_str().trim_end_matches('/')));
        }
        args
    }
}

fn py_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// A model loaded by a [LocalEngine]. Dropping it unloads the model.
pub trait LoadedModel: Send {
    /// Where the loaded service accepts requests.
    fn endpoint(&self) -> &Url;
}

pub trait LocalEngine: Send + Sync {
    /// Start loading the model and return without waiting for it to become ready.
    fn load(&self, executor: &Executor, args: &LaunchArgs) -> anyhow::Result<Box<dyn LoadedModel>>;
}

pub trait GpuProbe: Send + Sync {
    /// Names of the GPUs a process would see with `visibility` as its `CUDA_VISIBLE_DEVICES`.
    ///
    /// A machine without GPUs or a working driver sees none.
    fn visible_devices(&self, visibility: &str) -> anyhow::Result<Vec<String>>;
}

/// Reply to a file upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// The path the client sent.
    pub local: String,
    /// Where the service stored the file.
    pub remote: String,
}

/// Reply to adding an uploaded file to a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct AddDocumentReply {
    pub error: Option<String>,
    pub collection: String,
    pub sources: serde_json::Value,
    /// Empty on success.
    pub status: String,
}

/// A connection to the summarization service's remote procedures.
pub trait ServiceClient: Send {
    fn upload(&mut self, file: &Path) -> anyhow::Result<UploadedFile>;

    fn add_document(
        &mut self,
        remote: &str,
        chunk: bool,
        chunk_size: u32,
        collection: &str,
    ) -> anyhow::Result<AddDocumentReply>;

    /// Submit a JSON encoded parameter object and return the JSON encoded reply.
    ///
    /// Transport errors, including timeouts, are returned as they are.
    fn submit(&mut self, params: &str, timeout: Duration) -> anyhow::Result<String>;
}

pub trait ServiceConnector: Send + Sync {
    fn connect(&self, endpoint: &Url, request_timeout: Duration) -> anyhow::Result<Box<dyn ServiceClient>>;
}

pub trait DocumentSource: Send + Sync {
    /// Make the document at `url` available at `dest` and return its path.
    fn fetch(&self, url: &Url, dest: &Path) -> anyhow::Result<PathBuf>;
}

/// The set of collaborators a benchmark run uses.
#[derive(Clone)]
pub struct Collaborators {
    pub containers: Arc<dyn ContainerRuntime>,
    pub engine: Arc<dyn LocalEngine>,
    pub gpus: Arc<dyn GpuProbe>,
    pub connector: Arc<dyn ServiceConnector>,
    pub documents: Arc<dyn DocumentSource>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
