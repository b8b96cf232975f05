//! Shared HTTP plumbing for the fetchers: client construction and a
//! size-capped streaming GET with retry classification.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use thiserror::Error;
use url::Url;

use crate::core::config;
use crate::core::retry::Retryable;

/// Builds a client whose every request is bounded by `timeout`.
pub fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(config::network::USER_AGENT)
        .build()
}

/// Failure of a single HTTP attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    #[error("HTTP {status} from {url}")]
    Status {
        status: u16,
        url: String,
        retry_after: Option<Duration>,
    },

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("response exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("request failed: {0}")]
    Request(String),
}

impl AttemptError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AttemptError::Timeout
        } else if err.is_connect() {
            AttemptError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            AttemptError::Body(err.to_string())
        } else if let Some(status) = err.status() {
            AttemptError::Status {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
                retry_after: None,
            }
        } else {
            AttemptError::Request(err.to_string())
        }
    }

    /// HTTP status of the response, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            AttemptError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Retryable for AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Status { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            AttemptError::Timeout | AttemptError::Connect(_) | AttemptError::Body(_) => true,
            AttemptError::TooLarge { .. } | AttemptError::Request(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            AttemptError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// GETs `url` into memory, failing once more than `max_bytes` arrive.
///
/// The `Content-Length` header is checked up front; the running total is
/// checked while streaming because the header may be absent or wrong.
pub async fn fetch_bytes(client: &Client, url: &Url, max_bytes: u64) -> Result<Bytes, AttemptError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(AttemptError::from_reqwest)?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(AttemptError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            retry_after,
        });
    }

    if let Some(length) = response.content_length() {
        if length > max_bytes {
            return Err(AttemptError::TooLarge { limit: max_bytes });
        }
    }

    let mut stream = response.bytes_stream();
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(AttemptError::from_reqwest)?;
        if (buffer.len() + chunk.len()) as u64 > max_bytes {
            return Err(AttemptError::TooLarge { limit: max_bytes });
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(buffer.freeze())
}
