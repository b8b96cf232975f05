//! Shared domain types: track references, platforms and cache fingerprints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// Music platform a track was resolved from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    SoundCloud,
    Spotify,
}

/// A resolved, immutable track.
///
/// Built once by a resolver through [`TrackReference::builder`]; there are no
/// setters afterwards.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
#[builder(on(String, into))]
pub struct TrackReference {
    platform: Platform,
    id: String,
    url: Url,
    title: String,
    artist: String,
    duration_secs: Option<u32>,
    artwork_url: Option<Url>,
}

impl TrackReference {
    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn duration_secs(&self) -> Option<u32> {
        self.duration_secs
    }

    pub fn artwork_url(&self) -> Option<&Url> {
        self.artwork_url.as_ref()
    }

    /// Cache key for this track.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::for_track(self.platform, &self.id)
    }

    /// "Artist - Title", used for captions, file names and search fallbacks.
    pub fn display_name(&self) -> String {
        if self.artist.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.artist, self.title)
        }
    }
}

/// Stable cache key derived from track identity.
///
/// SHA-256 over `"<platform>:<id>"`, hex encoded, truncated to 32 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    const LEN: usize = 32;

    pub fn for_track(platform: Platform, id: &str) -> Self {
        let digest = Sha256::digest(format!("{}:{}", platform, id).as_bytes());
        let mut encoded = hex::encode(digest);
        encoded.truncate(Self::LEN);
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == Self::LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(format!("invalid fingerprint: {}", s))
        }
    }
}

/// Parses "SS", "MM:SS" or "HH:MM:SS" into seconds.
///
/// Returns `None` for empty input, non-numeric parts, more than three parts or
/// minute/second components of 60 and above (except in the leading position).
pub fn parse_duration(text: &str) -> Option<u32> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() > 3 {
        return None;
    }

    let mut total: u32 = 0;
    for (index, part) in parts.iter().enumerate() {
        let value: u32 = part.trim().parse().ok()?;
        if index > 0 && value >= 60 {
            return None;
        }
        total = total.checked_mul(60)?.checked_add(value)?;
    }
    Some(total)
}

/// Converts a millisecond duration (as SoundCloud reports it) into whole seconds, rounded.
pub fn millis_to_secs(millis: u64) -> u32 {
    u32::try_from((millis + 500) / 1000).unwrap_or(u32::MAX)
}

/// Formats seconds as "M:SS" or "H:MM:SS".
pub fn format_duration(secs: u32) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
