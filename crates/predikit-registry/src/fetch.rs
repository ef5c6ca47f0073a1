//! Resource download backends.

use std::io::Write;
use std::time::Duration;

use crate::error::CacheError;

/// Retry behavior for resource downloads.
///
/// Failed fetches are retried with exponential backoff up to
/// `max_attempts`; integrity failures are terminal and never retried.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl FetchPolicy {
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Downloads a resource into a sink.
///
/// Implementations report the number of bytes written. The cache supplies
/// the sink and handles temp files, checksums and publication.
pub trait ResourceFetcher: Send + Sync {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64, CacheError>;
}

/// Default fetcher backed by a blocking HTTP client.
pub struct HttpFetcher {
    http: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, CacheError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| CacheError::Fetch {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { http })
    }
}

impl ResourceFetcher for HttpFetcher {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64, CacheError> {
        let fetch_err = |message: String| CacheError::Fetch {
            url: url.to_string(),
            message,
        };
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|e| fetch_err(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_err(format!("server returned {}", status.as_u16())));
        }
        let mut response = response;
        let written = std::io::copy(&mut response, sink).map_err(|e| fetch_err(e.to_string()))?;
        Ok(written)
    }
}
