/// An error talking to the summarization service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] ureq::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid endpoint: {0}")]
    Url(#[from] url::ParseError),
    #[error("Invalid reply: {0}")]
    Decode(#[from] serde_json::Error),
    /// The service answered, but not with what the procedure should return. Error replies from
    /// the service, such as a device running out of memory, end up here with their message.
    #[error("Unexpected reply from {procedure}: {reason}")]
    Protocol {
        procedure: &'static str,
        reason: String,
    },
}

impl ServiceClientError {
    pub(crate) fn protocol(procedure: &'static str, reason: impl Into<String>) -> Self {
        ServiceClientError::Protocol {
            procedure,
            reason: reason.into(),
        }
    }
}
