use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use docbench_runner::prelude::DocumentSource;
use url::Url;

/// Downloads the benchmark document over HTTP.
///
/// A non-empty file already at the destination is used as it is, so the document is only
/// downloaded once per machine.
#[derive(Debug, Clone)]
pub struct HttpDocumentFetcher {
    timeout: Duration,
}

impl Default for HttpDocumentFetcher {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
        }
    }
}

impl HttpDocumentFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn download(&self, url: &Url, dest: &Path) -> anyhow::Result<()> {
        let agent = ureq::config::Config::builder()
            .timeout_global(Some(self.timeout))
            .build()
            .new_agent();
        let response = agent
            .get(url.as_str())
            .call()
            .with_context(|| format!("Failed to download {url}"))?;

        let mut body = response.into_body();
        let mut writer = std::fs::File::create(dest)
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        if let Err(err) = std::io::copy(&mut body.as_reader(), &mut writer)
            .with_context(|| format!("Failed to write {}", dest.display()))
        {
            // cleanup partial file
            std::fs::remove_file(dest).ok();
            return Err(err);
        }

        Ok(())
    }
}

impl DocumentSource for HttpDocumentFetcher {
    fn fetch(&self, url: &Url, dest: &Path) -> anyhow::Result<PathBuf> {
        if is_non_empty_file(dest) {
            log::debug!("Using existing document at {}", dest.display());
            return Ok(dest.to_path_buf());
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        log::info!("Downloading {url} to {}", dest.display());
        self.download(url, dest)?;

        Ok(dest.to_path_buf())
    }
}

fn is_non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}
