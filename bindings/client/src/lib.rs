mod error;
mod fetch;
mod service;

#[cfg(test)]
mod test_server;

pub mod prelude {
    pub use crate::error::ServiceClientError;
    pub use crate::fetch::HttpDocumentFetcher;
    pub use crate::service::{HttpConnector, HttpServiceClient};
}
