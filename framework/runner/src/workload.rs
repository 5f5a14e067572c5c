use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use docbench_core::prelude::BenchError;
use docbench_instruments::{OperationRecord, Reporter};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::collaborators::ServiceClient;
use crate::config::WorkloadConfig;
use crate::literal;

/// A document that has been uploaded and added to the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedDocument {
    pub local_path: PathBuf,
    pub remote: String,
    /// The file name the service is expected to cite as a source.
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub response: String,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub response: String,
    pub elapsed: Duration,
}

#[derive(Deserialize)]
struct SummaryReply {
    response: String,
    #[serde(default)]
    sources: serde_json::Value,
}

#[derive(Deserialize)]
struct GenerationReply {
    response: String,
}

/// Sends the benchmark workload to a running backend.
///
/// Only the remote procedure call of each task is timed, see [OperationRecord].
pub struct WorkloadDriver {
    client: Box<dyn ServiceClient>,
    settings: WorkloadConfig,
    reporter: Arc<Reporter>,
}

impl WorkloadDriver {
    pub fn new(client: Box<dyn ServiceClient>, settings: WorkloadConfig, reporter: Arc<Reporter>) -> Self {
        Self {
            client,
            settings,
            reporter,
        }
    }

    pub fn upload_document(&mut self, path: &Path) -> anyhow::Result<UploadedDocument> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| BenchError::upload(format!("Not a file: {}", path.display())))?;

        let mut operation = OperationRecord::new("upload");
        let result = self.client.upload(path);
        operation.finish(&result);
        self.reporter.add_operation(&operation);

        let uploaded = result.context(BenchError::upload(format!("Failed to upload {}", path.display())))?;
        if same_path(&uploaded.remote, &uploaded.local) || same_path(&uploaded.remote, &path.to_string_lossy()) {
            return Err(BenchError::upload(format!(
                "The service returned the local path {} instead of a server side reference",
                uploaded.remote
            ))
            .into());
        }

        log::debug!("Uploaded {} to {}", path.display(), uploaded.remote);
        Ok(UploadedDocument {
            local_path: path.to_path_buf(),
            remote: uploaded.remote,
            file_name,
        })
    }

    pub fn add_document(&mut self, document: &UploadedDocument) -> anyhow::Result<()> {
        let mut operation = OperationRecord::new("add_document");
        let result = self.client.add_document(
            &document.remote,
            self.settings.chunk,
            self.settings.chunk_size,
            &self.settings.collection,
        );
        operation.finish(&result);
        self.reporter.add_operation(&operation);

        let reply = result.context(BenchError::upload(format!(
            "Failed to add {} to {}",
            document.remote, self.settings.collection
        )))?;

        if let Some(error) = reply.error.filter(|error| !error.is_empty()) {
            return Err(BenchError::upload(format!("The service rejected {}: {error}", document.remote)).into());
        }
        if reply.collection != self.settings.collection {
            return Err(BenchError::upload(format!(
                "Expected the document in collection {} but it was added to {}",
                self.settings.collection, reply.collection
            ))
            .into());
        }
        if !reply.status.is_empty() {
            return Err(BenchError::upload(format!(
                "Unexpected status adding {}: {}",
                document.remote, reply.status
            ))
            .into());
        }

        Ok(())
    }

    /// Summarize the collection the document was added to.
    ///
    /// The summary must cite the uploaded document as one of its sources.
    pub fn run_summarization(&mut self, document: &UploadedDocument) -> anyhow::Result<Summary> {
        let params = literal::to_python(&json!({
            "langchain_mode": self.settings.collection,
            "langchain_action": "Summarize",
            "top_k_docs": self.settings.top_k_docs,
            "document_subset": "Relevant",
            "document_choice": "All",
            "max_new_tokens": self.settings.max_new_tokens,
            "max_time": self.settings.summarize_budget().as_secs(),
            "do_sample": false,
            "prompt_summary": self.settings.summary_prompt,
        }));

        let mut operation = OperationRecord::new("summarize");
        let result = self.client.submit(&params, self.settings.summarize_timeout());
        let elapsed = operation.finish(&result);
        self.reporter.add_operation(&operation);

        let raw = result?;
        let reply: SummaryReply = decode_reply(&raw).map_err(|e| {
            BenchError::summarization(format!("Unexpected reply ({e}): {}", preview(&raw)))
        })?;

        if !mentions(&reply.sources, &document.file_name) {
            return Err(BenchError::contract(format!(
                "The summary does not cite {} as a source",
                document.file_name
            ))
            .into());
        }

        Ok(Summary {
            response: reply.response,
            elapsed,
        })
    }

    pub fn run_generation(&mut self, prompt: &str) -> anyhow::Result<Generation> {
        let params = literal::to_python(&json!({
            "instruction": prompt,
            "max_new_tokens": self.settings.max_new_tokens,
            "do_sample": false,
        }));

        let mut operation = OperationRecord::new("generate");
        let result = self.client.submit(&params, self.settings.request_timeout());
        let elapsed = operation.finish(&result);
        self.reporter.add_operation(&operation);

        let raw = result?;
        let reply: GenerationReply = decode_reply(&raw).map_err(|e| {
            BenchError::generation(format!("Unexpected reply ({e}): {}", preview(&raw)))
        })?;

        Ok(Generation {
            response: reply.response,
            elapsed,
        })
    }
}

/// Replies are the `str()` of a Python dict, or JSON from services that send it.
fn decode_reply<T: DeserializeOwned>(raw: &str) -> anyhow::Result<T> {
    Ok(serde_json::from_value(literal::parse(raw)?)?)
}

fn same_path(a: &str, b: &str) -> bool {
    Path::new(a).components().eq(Path::new(b).components())
}

/// Whether any string in the value contains the needle.
fn mentions(value: &serde_json::Value, needle: &str) -> bool {
    match value {
        serde_json::Value::String(s) => s.contains(needle),
        serde_json::Value::Array(items) => items.iter().any(|item| mentions(item, needle)),
        serde_json::Value::Object(map) => map.values().any(|item| mentions(item, needle)),
        _ => false,
    }
}

fn preview(raw: &str) -> String {
    const LIMIT: usize = 200;
    match raw.char_indices().nth(LIMIT) {
        Some((end, _)) => format!("{}...", &raw[..end]),
        None => raw.to_string(),
    }
}
