//! Delivery reconciler: placeholder first, audio once it is ready.
//!
//! Every request walks
//! `PlaceholderSent → Fetching → Validated → Delivered`, or ends in `Failed`.
//! The only backwards step is `Validated → Fetching`, taken once when the
//! platform rejects a cached file id and no validated bytes are at hand.

use std::sync::Arc;
use std::time::Duration;

use teloxide::types::ChatId;
use thiserror::Error;

use crate::core::metrics;
use crate::core::types::TrackReference;
use crate::download::error::DownloadError;
use crate::download::pipeline::TrackFetcher;
use crate::storage::{CacheManager, CachedAudio};
use crate::telegram::captions;
use crate::telegram::transport::{AudioPayload, DeliveryContent, MessageHandle, MessagingTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryState {
    PlaceholderSent,
    Fetching,
    Validated,
    Delivered,
    Failed,
}

impl DeliveryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryState::Delivered | DeliveryState::Failed)
    }

    /// Forward edges of the state machine. `Validated → Fetching` is gated separately.
    fn allows(self, next: DeliveryState) -> bool {
        use DeliveryState::*;
        match (self, next) {
            (PlaceholderSent, Fetching) | (Fetching, Validated) | (Validated, Delivered) | (Validated, Fetching) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("could not send the placeholder: {source}")]
    PlaceholderFailed {
        access: bool,
        #[source]
        source: TransportError,
    },

    /// The audio was ready but the message could not be updated
    #[error("could not update the placeholder: {source}")]
    DeliveryUpdateFailed {
        access: bool,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("illegal delivery transition {} -> {to}", .from.map(|s| s.to_string()).unwrap_or_else(|| "start".into()))]
    IllegalTransition {
        from: Option<DeliveryState>,
        to: DeliveryState,
    },
}

impl DeliveryError {
    /// Stable label for reports and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::PlaceholderFailed { .. } => "placeholder_failed",
            DeliveryError::DeliveryUpdateFailed { .. } => "delivery_update_failed",
            DeliveryError::Download(_) => "download_failed",
            DeliveryError::IllegalTransition { .. } => "illegal_transition",
        }
    }

    /// The user's doing (blocked bot, never started it) rather than ours.
    pub fn is_access(&self) -> bool {
        match self {
            DeliveryError::PlaceholderFailed { access, .. } | DeliveryError::DeliveryUpdateFailed { access, .. } => *access,
            DeliveryError::Download(_) | DeliveryError::IllegalTransition { .. } => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::PlaceholderFailed { source, .. } | DeliveryError::DeliveryUpdateFailed { source, .. } => {
                matches!(source, TransportError::Network(_))
            }
            DeliveryError::Download(e) => e.is_retryable(),
            DeliveryError::IllegalTransition { .. } => false,
        }
    }
}

/// Where the result should appear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryTarget {
    /// Send a new placeholder into this chat
    Chat(ChatId),
    /// Adopt a message that already exists (chosen inline results)
    Existing(MessageHandle),
}

#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// What the user typed or linked, echoed back in failure notices
    pub query: String,
    pub track: TrackReference,
    pub target: DeliveryTarget,
}

/// Terminal outcome of one request.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub query: String,
    pub state: DeliveryState,
    pub error: Option<DeliveryError>,
    pub handle: Option<MessageHandle>,
    pub file_id: Option<String>,
    pub audio_duration: Option<Duration>,
    /// Every state entered, in order
    pub transitions: Vec<DeliveryState>,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        self.state == DeliveryState::Delivered
    }

    pub fn error_kind(&self) -> Option<&'static str> {
        self.error.as_ref().map(DeliveryError::kind)
    }

    pub fn is_access_failure(&self) -> bool {
        self.error.as_ref().is_some_and(DeliveryError::is_access)
    }
}

#[derive(Debug, Default)]
struct Progress {
    state: Option<DeliveryState>,
    transitions: Vec<DeliveryState>,
    refetched: bool,
    handle: Option<MessageHandle>,
    file_id: Option<String>,
    audio_duration: Option<Duration>,
}

impl Progress {
    fn advance(&mut self, next: DeliveryState) -> Result<(), DeliveryError> {
        let allowed = match self.state {
            None => matches!(next, DeliveryState::PlaceholderSent | DeliveryState::Failed),
            Some(DeliveryState::Validated) if next == DeliveryState::Fetching => !self.refetched,
            Some(current) => current.allows(next),
        };
        if !allowed {
            return Err(DeliveryError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        if self.state == Some(DeliveryState::Validated) && next == DeliveryState::Fetching {
            self.refetched = true;
        }
        self.state = Some(next);
        self.transitions.push(next);
        Ok(())
    }

    fn into_report(mut self, query: String, result: Result<(), DeliveryError>) -> DeliveryReport {
        let error = result.err();
        if error.is_some() && self.state != Some(DeliveryState::Failed) {
            self.state = Some(DeliveryState::Failed);
            self.transitions.push(DeliveryState::Failed);
        }
        DeliveryReport {
            query,
            state: self.state.unwrap_or(DeliveryState::Failed),
            error,
            handle: self.handle,
            file_id: self.file_id,
            audio_duration: self.audio_duration,
            transitions: self.transitions,
        }
    }
}

/// Drives requests from placeholder to delivered audio.
pub struct DeliveryReconciler {
    transport: Arc<dyn MessagingTransport>,
    cache: CacheManager,
    fetcher: Arc<dyn TrackFetcher>,
}

impl DeliveryReconciler {
    pub fn new(transport: Arc<dyn MessagingTransport>, cache: CacheManager, fetcher: Arc<dyn TrackFetcher>) -> Self {
        Self {
            transport,
            cache,
            fetcher,
        }
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Runs one request to a terminal state. Never panics, never returns early.
    pub async fn deliver(&self, request: DeliveryRequest) -> DeliveryReport {
        let mut progress = Progress::default();
        let result = self.drive(&request, &mut progress).await;
        let report = progress.into_report(request.query, result);

        metrics::record_delivery(report.state.as_ref(), report.error_kind().unwrap_or("ok"));
        match &report.error {
            None => log::info!(
                "Delivered {} for {:?} via {:?}",
                request.track.display_name(),
                report.query,
                report.transitions
            ),
            Some(e) if e.is_access() => log::info!("Cannot reach the user for {:?}: {}", report.query, e),
            Some(e) => log::warn!("Delivery for {:?} failed ({}): {}", report.query, e.kind(), e),
        }
        report
    }

    async fn drive(&self, request: &DeliveryRequest, progress: &mut Progress) -> Result<(), DeliveryError> {
        let track = &request.track;
        let fingerprint = track.fingerprint();

        let handle = match &request.target {
            DeliveryTarget::Existing(handle) => handle.clone(),
            DeliveryTarget::Chat(chat) => self
                .transport
                .send_placeholder(*chat, &DeliveryContent::Text(captions::placeholder(track)))
                .await
                .map_err(|source| DeliveryError::PlaceholderFailed {
                    access: source.is_access(),
                    source,
                })?,
        };
        progress.handle = Some(handle.clone());
        progress.advance(DeliveryState::PlaceholderSent)?;

        'fetch: loop {
            progress.advance(DeliveryState::Fetching)?;
            let fetcher = Arc::clone(&self.fetcher);
            let owned = track.clone();
            let outcome = self
                .cache
                .get_or_fetch(&fingerprint, move || async move { fetcher.fetch(&owned).await })
                .await;

            let mut cached = match outcome {
                Ok(cached) => cached,
                Err(e) => {
                    self.notify_failure(&handle, request, false).await;
                    return Err(e.into());
                }
            };
            progress.advance(DeliveryState::Validated)?;
            progress.audio_duration = cached.audio.as_ref().map(|a| a.duration());

            loop {
                let content = audio_content(track, &cached)
                    .ok_or_else(|| DownloadError::Internal("cache entry has neither file id nor audio".into()))?;

                match self.transport.update_message(&handle, &content).await {
                    Ok(receipt) => {
                        match &receipt.file_id {
                            Some(file_id) if cached.file_id.as_ref() != Some(file_id) => {
                                self.cache.record_file_id(&fingerprint, file_id).await;
                            }
                            _ => {}
                        }
                        progress.file_id = receipt.file_id.or(cached.file_id);
                        progress.advance(DeliveryState::Delivered)?;
                        return Ok(());
                    }
                    // the bytes are still good; upload them instead of downloading again
                    Err(TransportError::StaleFile(message)) if cached.file_id.is_some() && cached.audio.is_some() => {
                        log::warn!(
                            "Cached file id for {} was rejected ({}), uploading the cached audio",
                            track.display_name(),
                            message
                        );
                        cached.file_id = None;
                    }
                    Err(TransportError::StaleFile(message)) if cached.file_id.is_some() && !progress.refetched => {
                        log::warn!(
                            "Cached file id for {} was rejected ({}), fetching again",
                            track.display_name(),
                            message
                        );
                        self.cache.invalidate(&fingerprint).await;
                        continue 'fetch;
                    }
                    Err(source) => {
                        let access = source.is_access();
                        if !access {
                            self.notify_failure(&handle, request, false).await;
                        }
                        return Err(DeliveryError::DeliveryUpdateFailed { access, source });
                    }
                }
            }
        }
    }

    /// Best-effort edit of the placeholder into a failure notice.
    async fn notify_failure(&self, handle: &MessageHandle, request: &DeliveryRequest, access: bool) {
        let notice = captions::failure_notice(&request.query, Some(&request.track), access);
        if let Err(e) = self.transport.update_message(handle, &DeliveryContent::Text(notice)).await {
            log::debug!("Could not post failure notice for {:?}: {}", request.query, e);
        }
    }
}

/// Prefers the known file id, otherwise uploads the bytes.
fn audio_content(track: &TrackReference, cached: &CachedAudio) -> Option<DeliveryContent> {
    let payload = match (&cached.file_id, &cached.audio) {
        (Some(file_id), _) => AudioPayload::FileId(file_id.clone()),
        (None, Some(audio)) => AudioPayload::Bytes {
            data: audio.bytes().clone(),
            file_name: captions::file_name(track, audio.format()),
        },
        (None, None) => return None,
    };
    let duration_secs = cached
        .audio
        .as_ref()
        .and_then(|a| u32::try_from(a.duration().as_secs()).ok())
        .or(track.duration_secs());

    Some(DeliveryContent::Audio {
        payload,
        caption: captions::track_caption(track),
        title: track.title().to_string(),
        performer: track.artist().to_string(),
        duration_secs,
        artwork: track.artwork_url().cloned(),
    })
}
