//! Fake collaborators: fetchers, stores and stream providers

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use soundgrab::download::{DownloadError, FileValidator, StreamCandidate, TrackFetcher, ValidatedAudio};
use soundgrab::source::{SourceError, StreamProvider};
use soundgrab::storage::{CacheRecord, CacheStore, StoreError};
use soundgrab::{Fingerprint, TrackReference};
use url::Url;

use super::helpers::wav;

/// Fetcher that counts calls and returns a WAV of the track's length.
pub struct CountingFetcher {
    calls: AtomicUsize,
    delay: Duration,
    failure: Option<DownloadError>,
}

impl CountingFetcher {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            failure: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, error: DownloadError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackFetcher for CountingFetcher {
    async fn fetch(&self, track: &TrackReference) -> Result<ValidatedAudio, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        let seconds = track.duration_secs().map_or(5.0, f64::from);
        FileValidator::default()
            .validate(Bytes::from(wav(seconds, 8_000)), None)
            .map_err(|reason| DownloadError::ValidationFailed { reason })
    }
}

/// Store whose every operation fails.
pub struct UnavailableStore;

fn down() -> StoreError {
    StoreError::Unavailable("database is locked".into())
}

#[async_trait]
impl CacheStore for UnavailableStore {
    async fn load(&self, _fingerprint: &Fingerprint) -> Result<Option<CacheRecord>, StoreError> {
        Err(down())
    }

    async fn save(&self, _record: &CacheRecord) -> Result<(), StoreError> {
        Err(down())
    }

    async fn set_file_id(
        &self,
        _fingerprint: &Fingerprint,
        _file_id: &str,
        _now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Err(down())
    }

    async fn remove(&self, _fingerprint: &Fingerprint) -> Result<(), StoreError> {
        Err(down())
    }

    async fn prune(&self, _cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        Err(down())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Err(down())
    }
}

/// Provider with a fixed candidate list; indirect locations resolve to `media_url`.
pub struct FixedProvider {
    pub candidates: Vec<StreamCandidate>,
    pub media_url: Url,
}

#[async_trait]
impl StreamProvider for FixedProvider {
    async fn stream_candidates(&self, _track: &TrackReference) -> Result<Vec<StreamCandidate>, SourceError> {
        Ok(self.candidates.clone())
    }

    async fn resolve_stream_url(&self, _track: &TrackReference, _api_url: &Url) -> Result<Url, SourceError> {
        Ok(self.media_url.clone())
    }
}
