//! Track sources: resolving user input to tracks and tracks to streams.
//!
//! The pipeline only talks to the [`TrackResolver`] and [`StreamProvider`]
//! traits. [`LinkResolver`] routes raw input (links or free text) to the
//! right platform.

pub mod client_id;
pub mod soundcloud;
pub mod spotify;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::core::types::TrackReference;
use crate::download::selector::StreamCandidate;

pub use soundcloud::SoundCloudClient;
pub use spotify::SpotifyLinkResolver;

/// Queries shorter than this match half of SoundCloud.
const MIN_QUERY_CHARS: usize = 2;

/// Failure of a platform lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("nothing found for {0:?}")]
    NotFound(String),

    #[error("query {0:?} is too vague to pick a track")]
    AmbiguousQuery(String),

    #[error("rate limited by the platform")]
    RateLimited { retry_after: Option<Duration> },

    #[error("platform rejected the client credentials")]
    Unauthorized,

    #[error("unsupported link: {0}")]
    Unsupported(String),

    #[error("platform request failed: {0}")]
    Http(String),

    #[error("unexpected platform response: {0}")]
    Decode(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::RateLimited { .. } | SourceError::Http(_))
    }
}

/// What a query or link resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Track(TrackReference),
    Playlist { title: String, tracks: Vec<TrackReference> },
}

/// Turns user input into tracks.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resolves a link or free-text query. Free text resolves to the best search hit.
    async fn resolve(&self, query_or_url: &str) -> Result<Resolved, SourceError>;

    /// Up to `limit` tracks matching `query`, best first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackReference>, SourceError>;
}

/// Lists and resolves the streams of a track.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    async fn stream_candidates(&self, track: &TrackReference) -> Result<Vec<StreamCandidate>, SourceError>;

    /// Exchanges the API URL of an indirect candidate for its media URL.
    async fn resolve_stream_url(&self, track: &TrackReference, api_url: &Url) -> Result<Url, SourceError>;
}

/// Kind of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    SoundCloud(Url),
    Spotify(Url),
    OtherUrl(Url),
    Text(String),
}

impl Input {
    pub fn classify(raw: &str) -> Self {
        let trimmed = raw.trim();
        let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Url::parse(trimmed).ok()
        } else if trimmed.contains("soundcloud.com/") || trimmed.contains("spotify.com/") {
            Url::parse(&format!("https://{}", trimmed)).ok()
        } else {
            None
        };

        match candidate {
            Some(url) if soundcloud::is_soundcloud_url(&url) => Input::SoundCloud(url),
            Some(url) if spotify::is_spotify_url(&url) => Input::Spotify(url),
            Some(url) => Input::OtherUrl(url),
            None => Input::Text(trimmed.to_string()),
        }
    }
}

/// Finds every link in a message, in order.
pub fn extract_links(text: &str) -> Vec<Url> {
    text.split_whitespace()
        .map(|word| word.trim_matches(|c: char| matches!(c, '<' | '>' | '(' | ')' | '"' | '\'' | ',')))
        .filter(|word| word.starts_with("http://") || word.starts_with("https://"))
        .filter_map(|word| Url::parse(word).ok())
        .collect()
}

/// Routes input to SoundCloud directly, or through Spotify metadata to a SoundCloud search.
pub struct LinkResolver {
    soundcloud: Arc<SoundCloudClient>,
    spotify: SpotifyLinkResolver,
}

impl LinkResolver {
    pub fn new(soundcloud: Arc<SoundCloudClient>, spotify: SpotifyLinkResolver) -> Self {
        Self { soundcloud, spotify }
    }

    async fn best_match(&self, query: &str) -> Result<TrackReference, SourceError> {
        if query.chars().count() < MIN_QUERY_CHARS {
            return Err(SourceError::AmbiguousQuery(query.to_string()));
        }
        self.soundcloud
            .search(query, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::NotFound(query.to_string()))
    }
}

#[async_trait]
impl TrackResolver for LinkResolver {
    async fn resolve(&self, query_or_url: &str) -> Result<Resolved, SourceError> {
        match Input::classify(query_or_url) {
            Input::SoundCloud(url) => self.soundcloud.resolve_url(&url).await,
            Input::Spotify(url) => {
                let query = self.spotify.search_query(&url).await?;
                log::info!("Spotify link {} -> SoundCloud search {:?}", url, query);
                self.best_match(&query).await.map(Resolved::Track)
            }
            Input::OtherUrl(url) => Err(SourceError::Unsupported(url.to_string())),
            Input::Text(query) => self.best_match(&query).await.map(Resolved::Track),
        }
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackReference>, SourceError> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_CHARS {
            return Ok(Vec::new());
        }
        self.soundcloud.search(query, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_input() {
        assert!(matches!(
            Input::classify("https://soundcloud.com/artist/track"),
            Input::SoundCloud(_)
        ));
        assert!(matches!(Input::classify("soundcloud.com/artist/track"), Input::SoundCloud(_)));
        assert!(matches!(
            Input::classify("https://on.soundcloud.com/AbCdE"),
            Input::SoundCloud(_)
        ));
        assert!(matches!(
            Input::classify("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC"),
            Input::Spotify(_)
        ));
        assert!(matches!(Input::classify("https://example.com/x.mp3"), Input::OtherUrl(_)));
        assert_eq!(
            Input::classify("  daft punk around the world "),
            Input::Text("daft punk around the world".into())
        );
    }

    #[test]
    fn test_extract_links() {
        let links = extract_links("listen: https://soundcloud.com/a/b and (https://open.spotify.com/track/x), ok");
        assert_eq!(
            links.iter().map(Url::as_str).collect::<Vec<_>>(),
            vec!["https://soundcloud.com/a/b", "https://open.spotify.com/track/x"]
        );
        assert!(extract_links("no links here").is_empty());
    }

    #[test]
    fn test_retryable_source_errors() {
        assert!(SourceError::Http("boom".into()).is_retryable());
        assert!(!SourceError::Unauthorized.is_retryable());
        assert!(!SourceError::NotFound("x".into()).is_retryable());
    }
}
