use thiserror::Error;

use crate::download::validate::InvalidReason;
use crate::source::SourceError;

/// Structured error type for the download pipeline.
///
/// Cloneable so one failed fetch can be handed to every coalesced waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// No candidate survived codec/protocol filtering (or there were none)
    #[error("no playable stream among {candidates} candidate(s)")]
    NoPlayableStream { candidates: usize },

    /// HLS fetch failed; `segment` is the manifest index when a single segment is at fault
    #[error("HLS fetch failed{}: {message} after {attempts} attempt(s)", .segment.map(|i| format!(" at segment {}", i)).unwrap_or_default())]
    SegmentFetch {
        segment: Option<usize>,
        attempts: u32,
        message: String,
        retryable: bool,
    },

    /// Progressive download failed
    #[error("direct download failed{}: {message} after {attempts} attempt(s)", .status.map(|s| format!(" with status {}", s)).unwrap_or_default())]
    DirectFetch {
        status: Option<u16>,
        attempts: u32,
        message: String,
        retryable: bool,
    },

    /// Download exceeded the size cap
    #[error("download exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    /// The validator rejected the bytes
    #[error("downloaded file is invalid: {reason}")]
    ValidationFailed { reason: InvalidReason },

    /// Track resolution or stream lookup failed
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Cache store failure. Degraded to a miss inside the cache manager.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Background task died or another invariant broke
    #[error("internal error: {0}")]
    Internal(String),
}

impl DownloadError {
    /// Returns category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            DownloadError::NoPlayableStream { .. } => "no_playable_stream",
            DownloadError::SegmentFetch { .. } => "segment_fetch",
            DownloadError::DirectFetch { .. } => "direct_fetch",
            DownloadError::TooLarge { .. } => "too_large",
            DownloadError::ValidationFailed { .. } => "validation",
            DownloadError::Source(_) => "source",
            DownloadError::CacheUnavailable(_) => "cache_unavailable",
            DownloadError::Internal(_) => "internal",
        }
    }

    /// Whether asking again later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::SegmentFetch { retryable, .. } | DownloadError::DirectFetch { retryable, .. } => *retryable,
            DownloadError::Source(e) => e.is_retryable(),
            DownloadError::CacheUnavailable(_) | DownloadError::Internal(_) => true,
            DownloadError::NoPlayableStream { .. }
            | DownloadError::TooLarge { .. }
            | DownloadError::ValidationFailed { .. } => false,
        }
    }
}

/// Outcome handed to every caller of a fetch.
pub type DownloadResult<T = crate::storage::CachedAudio> = Result<T, DownloadError>;
