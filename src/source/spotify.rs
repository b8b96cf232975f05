//! Spotify track links.
//!
//! Spotify audio is not fetched. The public track page is scraped for its
//! OpenGraph tags and the result becomes a SoundCloud search query.

use lazy_regex::{regex_captures, regex_is_match, regex_replace_all};
use reqwest::Client;
use url::Url;

use crate::core::config;
use crate::source::SourceError;

pub fn is_spotify_url(url: &Url) -> bool {
    matches!(url.host_str(), Some("open.spotify.com" | "spotify.link"))
}

/// True for `open.spotify.com/track/<id>` links (locale prefixes such as `/intl-de/` allowed).
pub fn is_spotify_track_url(url: &Url) -> bool {
    url.host_str() == Some("open.spotify.com") && regex_is_match!(r"^(?:/intl-[a-z-]+)?/track/[A-Za-z0-9]+/?$", url.path())
}

/// Title and artist scraped from a track page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotifyMetadata {
    pub title: String,
    pub artist: String,
}

impl SpotifyMetadata {
    /// Extracts `og:title` and the first artist from `og:description`
    /// ("Artist A, Artist B · Album · Song · 2021").
    pub fn from_html(html: &str) -> Option<Self> {
        let (_, title) = regex_captures!(r#"<meta property="og:title" content="([^"]+)""#, html)?;
        let (_, description) = regex_captures!(r#"<meta property="og:description" content="([^"]+)""#, html)?;

        let description = decode_entities(description.trim());
        let separator = if description.contains(", ") { ", " } else { " · " };
        let artist = description.split(separator).next()?.trim().to_string();

        let title = decode_entities(title.trim());
        if title.is_empty() || artist.is_empty() {
            return None;
        }
        Some(Self { title, artist })
    }

    /// "artist title" with featuring credits, bracketed tags and a trailing
    /// "- Single"-style suffix removed from the title.
    pub fn search_query(&self) -> String {
        let title = regex_replace_all!(r"\s*\(feat\.[^)]*\)", &self.title, "");
        let title = regex_replace_all!(r"\s*\[.*?\]", &title, "");
        let title = regex_replace_all!(r"\s*-\s*\w+\s*$", &title, "");
        format!("{} {}", self.artist.trim(), title.trim())
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Turns Spotify track links into SoundCloud search queries.
#[derive(Debug, Clone)]
pub struct SpotifyLinkResolver {
    http: Client,
}

impl SpotifyLinkResolver {
    pub fn new() -> reqwest::Result<Self> {
        let http = Client::builder()
            .timeout(config::network::api_timeout())
            .user_agent(config::network::USER_AGENT)
            .build()?;
        Ok(Self { http })
    }

    /// Fetches the track page and scrapes its metadata.
    pub async fn metadata(&self, url: &Url) -> Result<SpotifyMetadata, SourceError> {
        let mut page = url.clone();
        page.set_query(None);
        page.set_fragment(None);

        if !is_spotify_track_url(&page) {
            return Err(SourceError::Unsupported(format!("{} is not a Spotify track link", url)));
        }

        let response = self
            .http
            .get(page.clone())
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Err(SourceError::NotFound(page.to_string()));
        }
        if status.as_u16() == 429 {
            return Err(SourceError::RateLimited { retry_after: None });
        }
        if !status.is_success() {
            return Err(SourceError::Http(format!("HTTP {} from {}", status, page)));
        }

        let html = response.text().await.map_err(|e| SourceError::Http(e.to_string()))?;
        let metadata = SpotifyMetadata::from_html(&html)
            .ok_or_else(|| SourceError::Decode(format!("no track metadata on {}", page)))?;
        log::info!("Spotify {}: '{}' by '{}'", page, metadata.title, metadata.artist);
        Ok(metadata)
    }

    /// Search query for the SoundCloud side.
    pub async fn search_query(&self, url: &Url) -> Result<String, SourceError> {
        self.metadata(url).await.map(|m| m.search_query())
    }
}
