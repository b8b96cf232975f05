//! Cover art for delivered audio.
//!
//! Telegram only accepts thumbnails as fresh uploads (JPEG, at most 320px
//! and 200 kB), so the artwork is downloaded and attached as bytes.

use bytes::Bytes;
use reqwest::Client;
use url::Url;

use crate::download::http::fetch_bytes;

/// Upper bound Telegram puts on an audio thumbnail
pub const MAX_THUMBNAIL_BYTES: u64 = 200 * 1024;

/// The 300px rendition of a SoundCloud artwork URL; other URLs pass through.
pub fn thumbnail_url(artwork: &Url) -> Url {
    let raw = artwork.as_str();
    for size in ["-t500x500.", "-t1080x1080.", "-original.", "-large."] {
        if raw.contains(size) {
            if let Ok(url) = Url::parse(&raw.replacen(size, "-t300x300.", 1)) {
                return url;
            }
        }
    }
    artwork.clone()
}

/// Downloads the thumbnail for `artwork`. Failures only cost the cover.
pub async fn fetch_thumbnail(client: &Client, artwork: &Url) -> Option<Bytes> {
    let url = thumbnail_url(artwork);
    match fetch_bytes(client, &url, MAX_THUMBNAIL_BYTES).await {
        Ok(bytes) if !bytes.is_empty() => {
            log::debug!("Fetched thumbnail {} ({} bytes)", url, bytes.len());
            Some(bytes)
        }
        Ok(_) => None,
        Err(e) => {
            log::warn!("Sending audio without artwork, {} failed: {}", url, e);
            None
        }
    }
}
