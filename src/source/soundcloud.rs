//! SoundCloud API v2 client.
//!
//! Resolves links and searches through the public v2 API with a web
//! `client_id`, scraped from soundcloud.com when none is configured or the
//! configured one is rejected. Go+ tracks (policy `SNIP`) only stream a 30 second preview
//! and are filtered out of results.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::core::config;
use crate::core::error::AppResult;
use crate::core::types::{millis_to_secs, Platform, TrackReference};
use crate::download::selector::StreamCandidate;
use crate::source::client_id::{ClientIdProvider, SITE_BASE};
use crate::source::{Resolved, SourceError, StreamProvider, TrackResolver};

pub const API_BASE: &str = "https://api-v2.soundcloud.com/";

/// The `/tracks?ids=` endpoint accepts at most this many ids per call.
const IDS_PER_REQUEST: usize = 50;

const SNIPPET_POLICY: &str = "SNIP";

/// Separators accepted between artist and title in "Artist - Title" names.
const DASHES: [char; 5] = ['-', '\u{2212}', '\u{2013}', '\u{2014}', '\u{2015}'];

pub fn is_soundcloud_url(url: &Url) -> bool {
    matches!(
        url.host_str(),
        Some("soundcloud.com" | "www.soundcloud.com" | "m.soundcloud.com" | "on.soundcloud.com")
    )
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ApiUser {
    #[serde(default)]
    username: String,
    avatar_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiTranscodingFormat {
    protocol: String,
    mime_type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiTranscoding {
    url: String,
    preset: Option<String>,
    quality: Option<String>,
    format: ApiTranscodingFormat,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ApiMedia {
    #[serde(default)]
    transcodings: Vec<ApiTranscoding>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ApiPublisherMetadata {
    artist: Option<String>,
}

/// Track as the API returns it. Playlist responses embed stubs with only `id`.
#[derive(Debug, Clone, Deserialize)]
struct ApiTrack {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    user: ApiUser,
    artwork_url: Option<String>,
    /// Milliseconds
    #[serde(default)]
    duration: u64,
    media: Option<ApiMedia>,
    permalink_url: Option<String>,
    track_authorization: Option<String>,
    policy: Option<String>,
    publisher_metadata: Option<ApiPublisherMetadata>,
}

impl ApiTrack {
    fn is_complete(&self) -> bool {
        !self.title.is_empty()
    }

    fn is_snippet(&self) -> bool {
        self.policy.as_deref() == Some(SNIPPET_POLICY)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ApiPlaylist {
    #[serde(default)]
    title: String,
    #[serde(default)]
    tracks: Vec<ApiTrack>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiCollection {
    #[serde(default)]
    collection: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiStreamUrl {
    url: String,
}

/// Splits "Artist - Title" on exactly one spaced dash.
///
/// Several spaced dashes are ambiguous ("A - B - C") and yield `None`.
pub fn split_artist_title(name: &str) -> Option<(String, String)> {
    let mut hits = DASHES.iter().flat_map(|dash| {
        let separator = format!(" {} ", dash);
        name.match_indices(&separator)
            .map(|(index, _)| (index, separator.len()))
            .collect::<Vec<_>>()
    });
    let (index, separator_len) = hits.next()?;
    if hits.next().is_some() {
        return None;
    }

    let artist = name[..index].trim();
    let title = name[index + separator_len..].trim();
    if artist.is_empty() || title.is_empty() {
        None
    } else {
        Some((artist.to_string(), title.to_string()))
    }
}

/// Drops a leading "Artist - " from `title` when it repeats the artist.
pub fn strip_artist_prefix(title: &str, artist: &str) -> String {
    let lower_title = title.to_lowercase();
    let lower_artist = artist.to_lowercase();
    if !lower_artist.is_empty() && lower_title.starts_with(&lower_artist) {
        let rest = title[artist.len()..].trim_start();
        if let Some(stripped) = rest.strip_prefix(|c: char| DASHES.contains(&c)) {
            let stripped = stripped.trim();
            if !stripped.is_empty() {
                return stripped.to_string();
            }
        }
    }
    title.to_string()
}

/// Upgrades SoundCloud's 100px "-large" artwork to 500px.
pub fn upgrade_artwork_url(raw: &str) -> Option<Url> {
    Url::parse(&raw.replace("-large.", "-t500x500.")).ok()
}

/// Client for api-v2.soundcloud.com.
pub struct SoundCloudClient {
    http: Client,
    api_base: Url,
    client_id: ClientIdProvider,
}

impl SoundCloudClient {
    pub fn new(client_id: SecretString) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(config::network::api_timeout())
            .user_agent(config::network::USER_AGENT)
            .build()?;
        Ok(Self {
            client_id: ClientIdProvider::new(http.clone(), Url::parse(SITE_BASE)?, client_id),
            http,
            api_base: Url::parse(API_BASE)?,
        })
    }

    /// Points the client at another API host (tests, proxies).
    #[must_use]
    pub fn with_api_base(mut self, api_base: Url) -> Self {
        self.api_base = api_base;
        self
    }

    /// Where a `client_id` is scraped from (tests, proxies).
    #[must_use]
    pub fn with_site_base(mut self, site_base: Url) -> Self {
        self.client_id.set_site_base(site_base);
        self
    }

    /// GETs `url`, swapping in a fresh `client_id` once if the current one is rejected.
    async fn get_json<T: DeserializeOwned>(&self, url: Url, query: &[(&str, String)]) -> Result<T, SourceError> {
        let client_id = self.client_id.current().await?;
        match self.get_json_with(&client_id, &url, query).await {
            Err(SourceError::Unauthorized) => {
                log::warn!("SoundCloud rejected the client_id for {}, looking for a new one", url.path());
                let fresh = self.client_id.refresh(&client_id).await?;
                self.get_json_with(&fresh, &url, query).await
            }
            other => other,
        }
    }

    async fn get_json_with<T: DeserializeOwned>(
        &self,
        client_id: &SecretString,
        url: &Url,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let response = self
            .http
            .get(url.clone())
            .query(&[("client_id", client_id.expose_secret())])
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                log::debug!("SoundCloud rejected client_id ({}) for {}", status, url.path());
                return Err(SourceError::Unauthorized);
            }
            StatusCode::NOT_FOUND => return Err(SourceError::NotFound(url.path().to_string())),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(SourceError::RateLimited { retry_after });
            }
            s if !s.is_success() => return Err(SourceError::Http(format!("HTTP {} from {}", s, url.path()))),
            _ => {}
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }

    fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        self.api_base
            .join(path)
            .map_err(|e| SourceError::Decode(format!("bad endpoint {}: {}", path, e)))
    }

    /// Resolves a soundcloud.com link to a track or playlist.
    pub async fn resolve_url(&self, link: &Url) -> Result<Resolved, SourceError> {
        let value: serde_json::Value = self
            .get_json(self.endpoint("resolve")?, &[("url", link.to_string())])
            .await
            .map_err(|e| match e {
                SourceError::NotFound(_) => SourceError::NotFound(link.to_string()),
                other => other,
            })?;

        match value.get("kind").and_then(|k| k.as_str()) {
            Some("track") => {
                let track: ApiTrack = decode(value)?;
                if track.is_snippet() {
                    return Err(SourceError::Unsupported(format!(
                        "{} is a Go+ track, only a preview is streamable",
                        link
                    )));
                }
                Ok(Resolved::Track(to_reference(&track)?))
            }
            Some("playlist") => {
                let playlist: ApiPlaylist = decode(value)?;
                let tracks = self.complete_tracks(playlist.tracks).await?;
                if tracks.is_empty() {
                    return Err(SourceError::NotFound(link.to_string()));
                }
                Ok(Resolved::Playlist {
                    title: playlist.title,
                    tracks,
                })
            }
            other => Err(SourceError::Unsupported(format!(
                "{} resolves to {}",
                link,
                other.unwrap_or("an unknown object")
            ))),
        }
    }

    /// Fills playlist stubs (id only) through `/tracks?ids=`, keeping playlist order.
    async fn complete_tracks(&self, tracks: Vec<ApiTrack>) -> Result<Vec<TrackReference>, SourceError> {
        let mut tracks: Vec<ApiTrack> = tracks.into_iter().take(config::download::MAX_PLAYLIST_TRACKS).collect();

        let missing: Vec<u64> = tracks.iter().filter(|t| !t.is_complete()).map(|t| t.id).collect();
        for chunk in missing.chunks(IDS_PER_REQUEST) {
            let ids = chunk.iter().map(u64::to_string).collect::<Vec<_>>().join(",");
            let fetched: Vec<ApiTrack> = self.get_json(self.endpoint("tracks")?, &[("ids", ids)]).await?;
            for full in fetched {
                if let Some(slot) = tracks.iter_mut().find(|t| t.id == full.id) {
                    *slot = full;
                }
            }
        }

        tracks
            .iter()
            .filter(|t| t.is_complete() && !t.is_snippet())
            .map(to_reference)
            .collect()
    }

    async fn fetch_track(&self, id: &str) -> Result<ApiTrack, SourceError> {
        self.get_json(self.endpoint(&format!("tracks/{}", id))?, &[]).await
    }

    /// Looks a track up by its numeric id (inline results carry only the id).
    pub async fn track_by_id(&self, id: &str) -> Result<TrackReference, SourceError> {
        let track = self.fetch_track(id).await?;
        if track.is_snippet() {
            return Err(SourceError::Unsupported(format!("track {} is a Go+ preview", id)));
        }
        to_reference(&track)
    }

    /// Searches tracks; Go+ snippets and non-track results are dropped.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackReference>, SourceError> {
        // ask for extra results because filtering removes some
        let request_limit = (limit * 2).clamp(1, 50);
        let page: ApiCollection = self
            .get_json(
                self.endpoint("search/tracks")?,
                &[("q", query.to_string()), ("limit", request_limit.to_string())],
            )
            .await?;

        let total = page.collection.len();
        let mut tracks = Vec::new();
        for item in page.collection {
            if item.get("kind").and_then(|k| k.as_str()) != Some("track") {
                continue;
            }
            let track: ApiTrack = decode(item)?;
            if track.is_snippet() {
                continue;
            }
            tracks.push(to_reference(&track)?);
            if tracks.len() == limit {
                break;
            }
        }
        log::info!("SoundCloud search {:?}: {} of {} results kept", query, tracks.len(), total);
        Ok(tracks)
    }
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, SourceError> {
    serde_json::from_value(value).map_err(|e| SourceError::Decode(e.to_string()))
}

fn to_reference(track: &ApiTrack) -> Result<TrackReference, SourceError> {
    let url = track
        .permalink_url
        .as_deref()
        .and_then(|u| Url::parse(u).ok())
        .ok_or_else(|| SourceError::Decode(format!("track {} has no permalink", track.id)))?;

    let metadata_artist = track
        .publisher_metadata
        .as_ref()
        .and_then(|m| m.artist.as_deref())
        .filter(|a| !a.trim().is_empty());
    let (artist, title) = match (split_artist_title(&track.title), metadata_artist) {
        (Some((artist, title)), _) => (artist, title),
        (None, Some(artist)) => (artist.to_string(), strip_artist_prefix(&track.title, artist)),
        (None, None) => (track.user.username.clone(), track.title.clone()),
    };

    let artwork = track
        .artwork_url
        .as_deref()
        .or(track.user.avatar_url.as_deref())
        .and_then(upgrade_artwork_url);

    Ok(TrackReference::builder()
        .platform(Platform::SoundCloud)
        .id(track.id.to_string())
        .url(url)
        .title(title)
        .artist(artist)
        .maybe_duration_secs((track.duration > 0).then(|| millis_to_secs(track.duration)))
        .maybe_artwork_url(artwork)
        .build())
}

#[async_trait]
impl TrackResolver for SoundCloudClient {
    async fn resolve(&self, query_or_url: &str) -> Result<Resolved, SourceError> {
        match Url::parse(query_or_url.trim()) {
            Ok(url) if is_soundcloud_url(&url) => self.resolve_url(&url).await,
            Ok(url) => Err(SourceError::Unsupported(url.to_string())),
            Err(_) => self
                .search(query_or_url.trim(), 1)
                .await?
                .into_iter()
                .next()
                .map(Resolved::Track)
                .ok_or_else(|| SourceError::NotFound(query_or_url.to_string())),
        }
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackReference>, SourceError> {
        SoundCloudClient::search(self, query, limit).await
    }
}

#[async_trait]
impl StreamProvider for SoundCloudClient {
    /// Fetches the track again for a fresh `track_authorization` and maps its transcodings.
    async fn stream_candidates(&self, track: &TrackReference) -> Result<Vec<StreamCandidate>, SourceError> {
        let api_track = self.fetch_track(track.id()).await?;
        let transcodings = api_track.media.map(|m| m.transcodings).unwrap_or_default();

        let mut candidates = Vec::with_capacity(transcodings.len());
        for transcoding in transcodings {
            let mut api_url = match Url::parse(&transcoding.url) {
                Ok(url) => url,
                Err(e) => {
                    log::warn!("Skipping transcoding with bad URL {:?}: {}", transcoding.url, e);
                    continue;
                }
            };
            if let Some(auth) = &api_track.track_authorization {
                api_url.query_pairs_mut().append_pair("track_authorization", auth);
            }
            candidates.push(StreamCandidate::from_soundcloud_transcoding(
                transcoding.preset.as_deref(),
                transcoding.quality.as_deref(),
                &transcoding.format.protocol,
                &transcoding.format.mime_type,
                api_url,
            ));
        }
        Ok(candidates)
    }

    async fn resolve_stream_url(&self, track: &TrackReference, api_url: &Url) -> Result<Url, SourceError> {
        let stream: ApiStreamUrl = self.get_json(api_url.clone(), &[]).await?;
        Url::parse(&stream.url).map_err(|e| {
            SourceError::Decode(format!("stream URL for track {} is invalid: {}", track.id(), e))
        })
    }
}
