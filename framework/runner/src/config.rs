use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::matrix::MatrixAxes;

/// Configuration for a benchmark run, loaded from TOML.
///
/// Every section and field is optional. A minimal file might only restrict the matrix:
///
/// ```toml
/// [matrix]
/// backends = ["in_process", "single_service"]
/// gpu_counts = [1, 2]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    /// Where records are appended. The recommended extension is `.jsonl`.
    pub results_path: PathBuf,
    pub matrix: MatrixAxes,
    pub workload: WorkloadConfig,
    pub backend: BackendConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            results_path: PathBuf::from("perf.jsonl"),
            matrix: MatrixAxes::default(),
            workload: WorkloadConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl BenchConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: BenchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.matrix.validate()?;

        if self.workload.chunk_size == 0 {
            anyhow::bail!("workload.chunk_size must be greater than zero");
        }
        if self.backend.inference_port() == self.backend.service_port {
            anyhow::bail!(
                "backend.inference_port must differ from backend.service_port ({})",
                self.backend.service_port
            );
        }

        Ok(())
    }
}

/// What is sent to the backend once it is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkloadConfig {
    /// The document that is summarized. Downloaded once and reused by later scenarios.
    pub document_url: Url,
    pub document_path: PathBuf,
    /// The document collection uploads are added to.
    pub collection: String,
    pub chunk: bool,
    pub chunk_size: u32,
    /// How many of the most relevant chunks the summary is built from.
    pub top_k_docs: u32,
    pub max_new_tokens: u32,
    /// Time the service is allowed to spend on a summary.
    pub summarize_time_budget_s: u64,
    /// Added to the summarize budget before the harness itself gives up on the request.
    pub transport_slack_s: u64,
    /// Timeout for every other request.
    pub request_timeout_s: u64,
    pub summary_prompt: String,
    pub generation_prompt: String,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            document_url: Url::parse("https://cdn.openai.com/papers/whisper.pdf")
                .expect("valid default url"),
            document_path: std::env::temp_dir().join("my_test_pdf.pdf"),
            collection: "MyData".to_string(),
            chunk: true,
            chunk_size: 512,
            top_k_docs: 4,
            max_new_tokens: 4096,
            summarize_time_budget_s: 300,
            transport_slack_s: 30,
            request_timeout_s: 120,
            summary_prompt: "Summarize into single paragraph".to_string(),
            generation_prompt: "Write a poem about water.".to_string(),
        }
    }
}

impl WorkloadConfig {
    pub fn summarize_budget(&self) -> Duration {
        Duration::from_secs(self.summarize_time_budget_s)
    }

    /// How long the harness waits for a summary before treating the request as failed.
    pub fn summarize_timeout(&self) -> Duration {
        Duration::from_secs(self.summarize_time_budget_s.saturating_add(self.transport_slack_s))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_s)
    }
}

/// How backends are launched and how long they get to become ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    /// The host the harness reaches the backend on.
    pub host: String,
    /// Port of the summarization service.
    pub service_port: u16,
    /// Port of the inference service, the port above the service port when not set.
    pub inference_port: Option<u16>,
    pub ready_timeout_s: u64,
    /// Fixed wait after launch before readiness is probed.
    pub settle_interval_s: u64,
    /// Poll the service port until it accepts connections. When disabled only the settle interval
    /// is waited.
    pub probe_readiness: bool,
    pub poll_interval_ms: u64,
    /// Lines of container output logged after startup.
    pub log_tail_lines: usize,
    /// Docker network the containers join. With `host` the port mappings are not needed.
    pub network: Option<String>,
    pub inference_image: String,
    /// Extra arguments for the inference container.
    pub inference_args: Vec<String>,
    pub service_image: String,
    /// Program and leading arguments that run the summarization service locally.
    pub local_command: Vec<String>,
    /// Environment variables passed through to containers when they are set, such as access
    /// tokens for gated models.
    pub forward_env: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            service_port: 7860,
            inference_port: None,
            ready_timeout_s: 600,
            settle_interval_s: 30,
            probe_readiness: true,
            poll_interval_ms: 1000,
            log_tail_lines: 10,
            network: Some("host".to_string()),
            inference_image: "ghcr.io/huggingface/text-generation-inference:latest".to_string(),
            inference_args: Vec::new(),
            service_image: "gcr.io/vorvan/h2oai/h2ogpt-runtime:latest".to_string(),
            local_command: vec!["python".to_string(), "generate.py".to_string()],
            forward_env: vec!["HUGGING_FACE_HUB_TOKEN".to_string()],
        }
    }
}

impl BackendConfig {
    pub fn inference_port(&self) -> u16 {
        self.inference_port
            .unwrap_or_else(|| self.service_port.saturating_add(1))
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_s)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_secs(self.settle_interval_s)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn url_for_port(&self, port: u16) -> anyhow::Result<Url> {
        let url = format!("http://{}:{}/", self.host, port);
        Url::parse(&url).with_context(|| format!("Invalid backend address: {url}"))
    }

    /// The forwarded environment variables that are actually set.
    pub fn forwarded_env(&self) -> Vec<(String, String)> {
        self.forward_env
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|value| (name.clone(), value)))
            .collect()
    }
}
