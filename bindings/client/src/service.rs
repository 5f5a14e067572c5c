use std::path::Path;
use std::time::Duration;

use docbench_runner::prelude::{AddDocumentReply, ServiceClient, ServiceConnector, UploadedFile};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::error::ServiceClientError;

const UPLOAD: &str = "upload_api";
const ADD_FILE: &str = "run/add_file_api";
const SUBMIT: &str = "run/submit_nochat_api";

/// Longest piece of an error reply kept in the error message.
const ERROR_BODY_LIMIT: usize = 2000;

/// Every procedure of the service answers with its return values wrapped in `data`.
#[derive(Debug, Deserialize)]
struct Reply {
    data: Vec<Value>,
}

/// Talks to the summarization service's HTTP procedures.
pub struct HttpServiceClient {
    endpoint: Url,
    agent: ureq::Agent,
}

impl HttpServiceClient {
    pub fn new(endpoint: Url, request_timeout: Duration) -> Self {
        let agent = ureq::config::Config::builder()
            .timeout_global(Some(request_timeout))
            .http_status_as_error(false)
            .build()
            .new_agent();

        Self {
            endpoint: with_trailing_slash(endpoint),
            agent,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn procedure_url(&self, procedure: &str) -> Result<Url, ServiceClientError> {
        Ok(self.endpoint.join(procedure)?)
    }

    fn call(
        &self,
        procedure: &'static str,
        data: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Value>, ServiceClientError> {
        let url = self.procedure_url(procedure)?;
        log::trace!("Calling {url}");

        let request = self.agent.post(url.as_str());
        let response = match timeout {
            Some(timeout) => request
                .config()
                .timeout_global(Some(timeout))
                .build()
                .send_json(json!({ "data": data }))?,
            None => request.send_json(json!({ "data": data }))?,
        };

        read_reply(procedure, response)
    }
}

impl ServiceClient for HttpServiceClient {
    fn upload(&mut self, file: &Path) -> anyhow::Result<UploadedFile> {
        let file_name = file
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ServiceClientError::protocol(UPLOAD, format!("No file name in {}", file.display()))
            })?;
        let content = std::fs::read(file)?;

        let url = self.procedure_url(UPLOAD)?;
        log::debug!("Uploading {} ({} bytes) to {url}", file.display(), content.len());
        let response = self
            .agent
            .post(url.as_str())
            .query("filename", file_name)
            .header("Content-Type", "application/octet-stream")
            .send(&content[..])
            .map_err(ServiceClientError::from)?;

        let data = read_reply(UPLOAD, response)?;
        Ok(decode_upload(data)?)
    }

    fn add_document(
        &mut self,
        remote: &str,
        chunk: bool,
        chunk_size: u32,
        collection: &str,
    ) -> anyhow::Result<AddDocumentReply> {
        let data = self.call(
            ADD_FILE,
            vec![json!(remote), json!(chunk), json!(chunk_size), json!(collection)],
            None,
        )?;
        Ok(decode_add_document(data)?)
    }

    fn submit(&mut self, params: &str, timeout: Duration) -> anyhow::Result<String> {
        let data = self.call(SUBMIT, vec![json!(params)], Some(timeout))?;
        Ok(decode_submit(data)?)
    }
}

/// Creates a [HttpServiceClient] for each backend the harness starts.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

impl ServiceConnector for HttpConnector {
    fn connect(
        &self,
        endpoint: &Url,
        request_timeout: Duration,
    ) -> anyhow::Result<Box<dyn ServiceClient>> {
        Ok(Box::new(HttpServiceClient::new(
            endpoint.clone(),
            request_timeout,
        )))
    }
}

fn with_trailing_slash(mut endpoint: Url) -> Url {
    if !endpoint.path().ends_with('/') {
        let path = format!("{}/", endpoint.path());
        endpoint.set_path(&path);
    }
    endpoint
}

fn read_reply(
    procedure: &'static str,
    mut response: ureq::http::Response<ureq::Body>,
) -> Result<Vec<Value>, ServiceClientError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.body_mut().read_to_string().unwrap_or_default();
        let body = body.chars().take(ERROR_BODY_LIMIT).collect::<String>();
        return Err(ServiceClientError::protocol(
            procedure,
            format!("status {status}: {body}"),
        ));
    }

    let text = response.body_mut().read_to_string()?;
    let reply: Reply = serde_json::from_str(&text)?;
    Ok(reply.data)
}

fn decode_upload(data: Vec<Value>) -> Result<UploadedFile, ServiceClientError> {
    let [local, remote] = take_values::<2>(UPLOAD, data)?;
    Ok(UploadedFile {
        local: expect_string(UPLOAD, local)?,
        remote: expect_string(UPLOAD, remote)?,
    })
}

fn decode_add_document(data: Vec<Value>) -> Result<AddDocumentReply, ServiceClientError> {
    let [error, collection, sources, status] = take_values::<4>(ADD_FILE, data)?;
    let error = match error {
        Value::Null => None,
        Value::String(message) => Some(message),
        other => Some(other.to_string()),
    };
    let status = match status {
        Value::Null => String::new(),
        other => expect_string(ADD_FILE, other)?,
    };

    Ok(AddDocumentReply {
        error,
        collection: expect_string(ADD_FILE, collection)?,
        sources,
        status,
    })
}

fn decode_submit(data: Vec<Value>) -> Result<String, ServiceClientError> {
    let [reply] = take_values::<1>(SUBMIT, data)?;
    expect_string(SUBMIT, reply)
}

fn take_values<const N: usize>(
    procedure: &'static str,
    data: Vec<Value>,
) -> Result<[Value; N], ServiceClientError> {
    let found = data.len();
    data.try_into().map_err(|_| {
        ServiceClientError::protocol(procedure, format!("expected {N} values but got {found}"))
    })
}

fn expect_string(procedure: &'static str, value: Value) -> Result<String, ServiceClientError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(ServiceClientError::protocol(
            procedure,
            format!("expected a string but got {other}"),
        )),
    }
}
