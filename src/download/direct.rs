//! Progressive (single file) downloads.

use bytes::Bytes;
use reqwest::Client;
use url::Url;

use crate::core::metrics;
use crate::core::retry::{retry, RetryConfig, Retryable};
use crate::download::error::DownloadError;
use crate::download::http::{self, AttemptError};

/// Downloads a progressive stream, retrying transient failures.
#[derive(Debug, Clone)]
pub struct DirectFetcher {
    client: Client,
    retry: RetryConfig,
    max_bytes: u64,
}

impl DirectFetcher {
    pub fn new(client: Client, retry: RetryConfig, max_bytes: u64) -> Self {
        Self {
            client,
            retry,
            max_bytes,
        }
    }

    /// Fetches `url`. Use [`DirectFetcher::fetch_str`] for unvalidated input.
    pub async fn fetch(&self, url: &Url) -> Result<Bytes, DownloadError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DownloadError::DirectFetch {
                status: None,
                attempts: 0,
                message: format!("unsupported URL scheme {:?}", url.scheme()),
                retryable: false,
            });
        }

        let client = &self.client;
        let outcome = retry(&self.retry, || {
            metrics::record_fetch_attempt("direct");
            http::fetch_bytes(client, url, self.max_bytes)
        })
        .await;
        let attempts = outcome.attempts;

        match outcome.into_result() {
            Ok(bytes) => {
                log::debug!("Fetched {} bytes from {} in {} attempt(s)", bytes.len(), url, attempts);
                Ok(bytes)
            }
            Err(AttemptError::TooLarge { limit }) => Err(DownloadError::TooLarge { limit }),
            Err(e) => Err(DownloadError::DirectFetch {
                status: e.status(),
                attempts,
                retryable: e.is_retryable(),
                message: e.to_string(),
            }),
        }
    }

    /// Parses and fetches `url`; a malformed URL fails without any request.
    pub async fn fetch_str(&self, url: &str) -> Result<Bytes, DownloadError> {
        let parsed = Url::parse(url).map_err(|e| DownloadError::DirectFetch {
            status: None,
            attempts: 0,
            message: format!("malformed URL {:?}: {}", url, e),
            retryable: false,
        })?;
        self.fetch(&parsed).await
    }
}
