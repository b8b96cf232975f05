//! SoundCloud `client_id` management.
//!
//! A configured id is used as long as SoundCloud accepts it. Without one, or
//! once it is rejected, an id is scraped from the JavaScript bundles that
//! soundcloud.com serves to browsers and kept until it is rejected in turn.

use lazy_regex::regex;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::source::SourceError;

pub const SITE_BASE: &str = "https://soundcloud.com/";

/// Bundles larger than this are skipped
const MAX_SCRIPT_BYTES: usize = 8 * 1024 * 1024;

pub struct ClientIdProvider {
    http: Client,
    site_base: Url,
    current: RwLock<Option<SecretString>>,
    refreshing: Mutex<()>,
}

impl ClientIdProvider {
    /// An empty `configured` id counts as none.
    pub fn new(http: Client, site_base: Url, configured: SecretString) -> Self {
        let configured = (!configured.expose_secret().trim().is_empty()).then_some(configured);
        Self {
            http,
            site_base,
            current: RwLock::new(configured),
            refreshing: Mutex::new(()),
        }
    }

    pub fn set_site_base(&mut self, site_base: Url) {
        self.site_base = site_base;
    }

    /// The id to use now, scraping one on first use if none is configured.
    pub async fn current(&self) -> Result<SecretString, SourceError> {
        if let Some(id) = self.current.read().await.clone() {
            return Ok(id);
        }
        self.replace(None).await
    }

    /// Replaces `rejected` with a freshly scraped id.
    ///
    /// Concurrent callers that saw the same rejected id share one scrape.
    /// Fails with `Unauthorized` when no other id can be found.
    pub async fn refresh(&self, rejected: &SecretString) -> Result<SecretString, SourceError> {
        let fresh = self.replace(Some(rejected)).await?;
        if fresh.expose_secret() == rejected.expose_secret() {
            return Err(SourceError::Unauthorized);
        }
        Ok(fresh)
    }

    async fn replace(&self, rejected: Option<&SecretString>) -> Result<SecretString, SourceError> {
        let _guard = self.refreshing.lock().await;

        // someone else refreshed while we waited
        if let Some(id) = self.current.read().await.clone() {
            let stale = rejected.is_some_and(|r| r.expose_secret() == id.expose_secret());
            if !stale {
                return Ok(id);
            }
        }

        let scraped = match scrape_client_id(&self.http, &self.site_base).await {
            Ok(id) => id,
            Err(e) => {
                log::error!("Could not obtain a SoundCloud client_id: {}", e);
                return Err(SourceError::Unauthorized);
            }
        };
        log::info!("Using client_id scraped from {}", self.site_base);
        let scraped = SecretString::from(scraped);
        *self.current.write().await = Some(scraped.clone());
        Ok(scraped)
    }
}

async fn get_text(http: &Client, url: &Url) -> Result<String, SourceError> {
    let response = http
        .get(url.clone())
        .send()
        .await
        .map_err(|e| SourceError::Http(e.to_string()))?;
    if !response.status().is_success() {
        return Err(SourceError::Http(format!("HTTP {} from {}", response.status(), url)));
    }
    response.text().await.map_err(|e| SourceError::Http(e.to_string()))
}

/// Script URLs referenced by the homepage, resolved against `site_base`.
pub fn script_urls(html: &str, site_base: &Url) -> Vec<Url> {
    regex!(r#"<script[^>]+src="([^"]+\.js)""#)
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .filter_map(|src| site_base.join(src.as_str()).ok())
        .collect()
}

/// First `client_id` literal found in a script.
pub fn find_client_id(script: &str) -> Option<String> {
    regex!(r#"[{,(\s?&]"?client_?[iI][dD]"?\s*[:=]\s*"?([a-zA-Z0-9]{20,40})"#)
        .captures(script)
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
}

/// Fetches the homepage and searches its scripts, last first, for a `client_id`.
pub async fn scrape_client_id(http: &Client, site_base: &Url) -> Result<String, SourceError> {
    let html = get_text(http, site_base).await?;
    let scripts = script_urls(&html, site_base);
    if scripts.is_empty() {
        return Err(SourceError::Decode("no scripts on the SoundCloud homepage".into()));
    }

    // the app bundle carrying the id is loaded last
    for script in scripts.iter().rev() {
        let body = match get_text(http, script).await {
            Ok(body) if body.len() <= MAX_SCRIPT_BYTES => body,
            Ok(_) => continue,
            Err(e) => {
                log::debug!("Skipping script {}: {}", script, e);
                continue;
            }
        };
        if let Some(id) = find_client_id(&body) {
            log::debug!("Found client_id in {}", script);
            return Ok(id);
        }
    }
    Err(SourceError::Decode(format!(
        "none of {} scripts contains a client_id",
        scripts.len()
    )))
}
