//! HLS segment fetching.
//!
//! A manifest is resolved to a flat list of segment URLs (master playlists
//! pick their highest-bandwidth variant), then the segments are fetched with
//! bounded concurrency and concatenated in manifest order. Any segment that
//! exhausts its retry budget fails the whole download; partial output is
//! dropped.

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, StreamExt};
use m3u8_rs::{KeyMethod, Playlist};
use reqwest::Client;
use url::Url;

use crate::core::metrics;
use crate::core::retry::{retry, RetryConfig, Retryable};
use crate::download::error::DownloadError;
use crate::download::http::{self, AttemptError};

/// Manifests are small text files; anything bigger is not a playlist.
const MAX_MANIFEST_BYTES: u64 = 1024 * 1024;

/// Master playlists may point at further master playlists, but not forever.
const MAX_MANIFEST_DEPTH: usize = 3;

/// Flat download plan of a media playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HlsPlan {
    /// `EXT-X-MAP` initialization segment (fMP4 streams)
    pub init: Option<Url>,
    pub segments: Vec<Url>,
}

/// A parsed manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Manifest {
    /// Master playlist, already narrowed to the variant to follow
    Master { variant: Url },
    Media(HlsPlan),
}

fn manifest_error(message: impl Into<String>) -> DownloadError {
    DownloadError::SegmentFetch {
        segment: None,
        attempts: 1,
        message: message.into(),
        retryable: false,
    }
}

fn resolve(base: &Url, uri: &str) -> Result<Url, DownloadError> {
    base.join(uri)
        .map_err(|e| manifest_error(format!("bad URI {:?} in manifest: {}", uri, e)))
}

/// Parses a manifest body. Segment URIs are resolved against `base`.
///
/// Fails on encrypted playlists, live (unterminated) playlists and playlists
/// without segments.
pub fn parse_manifest(data: &[u8], base: &Url) -> Result<Manifest, DownloadError> {
    let playlist =
        m3u8_rs::parse_playlist_res(data).map_err(|e| manifest_error(format!("unparsable manifest: {:?}", e)))?;

    match playlist {
        Playlist::MasterPlaylist(master) => {
            let mut best: Option<&m3u8_rs::VariantStream> = None;
            for variant in master.variants.iter().filter(|v| !v.is_i_frame) {
                // strict comparison keeps the first listed on ties
                if best.map_or(true, |b| variant.bandwidth > b.bandwidth) {
                    best = Some(variant);
                }
            }
            let variant = best.ok_or_else(|| manifest_error("master playlist has no variants"))?;
            Ok(Manifest::Master {
                variant: resolve(base, &variant.uri)?,
            })
        }
        Playlist::MediaPlaylist(media) => {
            let encrypted = media
                .segments
                .iter()
                .filter_map(|s| s.key.as_ref())
                .any(|key| !matches!(key.method, KeyMethod::None));
            if encrypted {
                return Err(manifest_error("playlist is encrypted"));
            }
            if !media.end_list {
                return Err(manifest_error("playlist is live (no EXT-X-ENDLIST)"));
            }
            if media.segments.is_empty() {
                return Err(manifest_error("manifest declares zero segments"));
            }

            let init = media
                .segments
                .iter()
                .find_map(|s| s.map.as_ref())
                .map(|map| resolve(base, &map.uri))
                .transpose()?;
            let segments = media
                .segments
                .iter()
                .map(|s| resolve(base, &s.uri))
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Manifest::Media(HlsPlan { init, segments }))
        }
    }
}

/// Which part of a plan a download belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Part {
    Init,
    Segment(usize),
}

/// Fetches an HLS stream into one buffer.
#[derive(Debug, Clone)]
pub struct SegmentFetcher {
    client: Client,
    retry: RetryConfig,
    concurrency: usize,
    max_bytes: u64,
}

impl SegmentFetcher {
    pub fn new(client: Client, retry: RetryConfig, concurrency: usize, max_bytes: u64) -> Self {
        Self {
            client,
            retry,
            concurrency: concurrency.max(1),
            max_bytes,
        }
    }

    /// Downloads the stream behind `manifest_url`.
    pub async fn fetch(&self, manifest_url: &Url) -> Result<Bytes, DownloadError> {
        let plan = self.resolve_plan(manifest_url).await?;
        log::info!(
            "HLS plan for {}: {} segment(s){}",
            manifest_url,
            plan.segments.len(),
            if plan.init.is_some() { " + init" } else { "" }
        );
        self.fetch_plan(&plan).await
    }

    /// Follows master playlists down to a media playlist.
    pub async fn resolve_plan(&self, manifest_url: &Url) -> Result<HlsPlan, DownloadError> {
        let mut url = manifest_url.clone();
        for _ in 0..MAX_MANIFEST_DEPTH {
            let body = self.fetch_manifest(&url).await?;
            match parse_manifest(&body, &url)? {
                Manifest::Master { variant } => {
                    log::debug!("Master playlist {} -> variant {}", url, variant);
                    url = variant;
                }
                Manifest::Media(plan) => return Ok(plan),
            }
        }
        Err(manifest_error(format!(
            "master playlists nested deeper than {}",
            MAX_MANIFEST_DEPTH
        )))
    }

    async fn fetch_manifest(&self, url: &Url) -> Result<Bytes, DownloadError> {
        let client = &self.client;
        let outcome = retry(&self.retry, || {
            metrics::record_fetch_attempt("manifest");
            http::fetch_bytes(client, url, MAX_MANIFEST_BYTES)
        })
        .await;
        let attempts = outcome.attempts;
        outcome.into_result().map_err(|e| DownloadError::SegmentFetch {
            segment: None,
            attempts,
            message: format!("manifest: {}", e),
            retryable: e.is_retryable(),
        })
    }

    /// Fetches every part of `plan` and concatenates them in manifest order.
    pub async fn fetch_plan(&self, plan: &HlsPlan) -> Result<Bytes, DownloadError> {
        if plan.segments.is_empty() {
            return Err(manifest_error("manifest declares zero segments"));
        }

        let parts: Vec<(Part, Url)> = plan
            .init
            .iter()
            .map(|url| (Part::Init, url.clone()))
            .chain(
                plan.segments
                    .iter()
                    .enumerate()
                    .map(|(index, url)| (Part::Segment(index), url.clone())),
            )
            .collect();
        let expected = parts.len();

        // `buffered` yields in input order, whatever order the fetches finish in
        let mut downloads = stream::iter(parts)
            .map(|(part, url)| {
                let client = self.client.clone();
                let retry_config = self.retry.clone();
                let max_bytes = self.max_bytes;
                async move {
                    let outcome = retry(&retry_config, || {
                        metrics::record_fetch_attempt("segment");
                        http::fetch_bytes(&client, &url, max_bytes)
                    })
                    .await;
                    (part, outcome.attempts, outcome.into_result())
                }
            })
            .buffered(self.concurrency);

        let mut output = BytesMut::new();
        let mut fetched = 0usize;
        while let Some((part, attempts, result)) = downloads.next().await {
            let bytes = result.map_err(|e| self.part_error(part, attempts, e))?;
            if (output.len() + bytes.len()) as u64 > self.max_bytes {
                return Err(DownloadError::TooLarge { limit: self.max_bytes });
            }
            output.extend_from_slice(&bytes);
            fetched += 1;
        }

        if fetched != expected {
            return Err(manifest_error(format!(
                "fetched {} of {} declared parts",
                fetched, expected
            )));
        }
        Ok(output.freeze())
    }

    fn part_error(&self, part: Part, attempts: u32, err: AttemptError) -> DownloadError {
        if let AttemptError::TooLarge { limit } = err {
            return DownloadError::TooLarge { limit };
        }
        let (segment, message) = match part {
            Part::Init => (None, format!("init segment: {}", err)),
            Part::Segment(index) => (Some(index), err.to_string()),
        };
        log::warn!("HLS part {:?} failed after {} attempt(s): {}", part, attempts, err);
        DownloadError::SegmentFetch {
            segment,
            attempts,
            message,
            retryable: err.is_retryable(),
        }
    }
}
