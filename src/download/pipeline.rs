//! Track pipeline: provider → selector → fetcher → validator.
//!
//! [`TrackPipeline`] implements [`TrackFetcher`], the fetch function the
//! delivery side hands to the cache manager. It never touches the cache itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::config::PipelineSettings;
use crate::core::metrics;
use crate::core::types::TrackReference;
use crate::download::direct::DirectFetcher;
use crate::download::error::DownloadError;
use crate::download::hls::SegmentFetcher;
use crate::download::http;
use crate::download::selector::{Protocol, StreamLocation, StreamSelector};
use crate::download::validate::{FileValidator, ValidatedAudio};
use crate::source::StreamProvider;

/// Something that turns a track into validated audio.
#[async_trait]
pub trait TrackFetcher: Send + Sync {
    async fn fetch(&self, track: &TrackReference) -> Result<ValidatedAudio, DownloadError>;
}

#[derive(Clone)]
pub struct TrackPipeline {
    provider: Arc<dyn StreamProvider>,
    selector: StreamSelector,
    segments: SegmentFetcher,
    direct: DirectFetcher,
    validator: FileValidator,
}

impl TrackPipeline {
    pub fn new(
        provider: Arc<dyn StreamProvider>,
        selector: StreamSelector,
        segments: SegmentFetcher,
        direct: DirectFetcher,
        validator: FileValidator,
    ) -> Self {
        Self {
            provider,
            selector,
            segments,
            direct,
            validator,
        }
    }

    /// Builds the pipeline with one HTTP client per timeout class.
    pub fn from_settings(provider: Arc<dyn StreamProvider>, settings: &PipelineSettings) -> reqwest::Result<Self> {
        let retry = settings.retry.to_retry_config();
        let segments = SegmentFetcher::new(
            http::build_client(settings.segment_timeout())?,
            retry.clone(),
            settings.segment_concurrency,
            settings.max_download_bytes,
        );
        let direct = DirectFetcher::new(
            http::build_client(settings.direct_timeout())?,
            retry,
            settings.max_download_bytes,
        );

        Ok(Self::new(
            provider,
            StreamSelector::new(settings.scoring.clone(), settings.allowed_codecs.clone()),
            segments,
            direct,
            FileValidator::from_settings(&settings.validation),
        ))
    }

    /// Downloads and validates the best stream of `track`.
    pub async fn fetch(&self, track: &TrackReference) -> Result<ValidatedAudio, DownloadError> {
        let result = self.run(track).await;
        match &result {
            Ok(audio) => log::info!(
                "Fetched {}: {} bytes of {}, {:.1}s",
                track.display_name(),
                audio.len(),
                audio.format(),
                audio.duration().as_secs_f64()
            ),
            Err(e) => {
                metrics::record_download_failure(e.category());
                log::warn!("Fetch of {} failed: {}", track.display_name(), e);
            }
        }
        result
    }

    async fn run(&self, track: &TrackReference) -> Result<ValidatedAudio, DownloadError> {
        let candidates = self.provider.stream_candidates(track).await?;
        let chosen = self.selector.select(&candidates)?;
        log::debug!(
            "Selected {} {} stream ({} kbps) for {} among {} candidate(s)",
            chosen.protocol,
            chosen.codec,
            chosen.bitrate_kbps.map(|b| b.to_string()).unwrap_or_else(|| "?".into()),
            track.display_name(),
            candidates.len()
        );

        let media_url = match &chosen.location {
            StreamLocation::Direct(url) => url.clone(),
            StreamLocation::Indirect(api_url) => self.provider.resolve_stream_url(track, api_url).await?,
        };

        let timer = metrics::DOWNLOAD_DURATION_SECONDS
            .with_label_values(&[chosen.protocol.as_ref()])
            .start_timer();
        let bytes = match chosen.protocol {
            Protocol::Progressive => self.direct.fetch(&media_url).await,
            Protocol::Hls => self.segments.fetch(&media_url).await,
            Protocol::EncryptedHls => Err(DownloadError::NoPlayableStream {
                candidates: candidates.len(),
            }),
        };
        timer.observe_duration();

        let expected = track.duration_secs().map(|secs| Duration::from_secs(u64::from(secs)));
        self.validator.validate_blocking(bytes?, expected).await
    }
}

#[async_trait]
impl TrackFetcher for TrackPipeline {
    async fn fetch(&self, track: &TrackReference) -> Result<ValidatedAudio, DownloadError> {
        TrackPipeline::fetch(self, track).await
    }
}
