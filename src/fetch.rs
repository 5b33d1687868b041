//! Retrieval of lists referenced by `#IMPORT_URL` comments.

use std::io::Read;
use std::time::Duration;

use tracing::debug;

use crate::error::{AclError, Result};

/// Default timeout for fetching an imported list
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of imported ACL text.
pub trait Fetcher: Send + Sync {
    /// Return the full text behind `url`.
    fn fetch(&self, url: &str) -> Result<String>;
}

impl<F> Fetcher for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn fetch(&self, url: &str) -> Result<String> {
        self(url)
    }
}

/// HTTP(S) fetcher backed by `ureq`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: Duration,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the overall request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        debug!(url, "fetching imported ACL");
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build();
        let agent = ureq::Agent::new_with_config(config);

        let response = agent
            .get(url)
            .call()
            .map_err(|e| AclError::FetchError(format!("{}: {}", url, e)))?;

        let (_, body) = response.into_parts();
        let mut bytes = Vec::new();
        body.into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| AclError::FetchError(format!("{}: {}", url, e)))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
