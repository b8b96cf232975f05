use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use secrecy::SecretString;

use crate::core::retry::RetryConfig;
use crate::download::selector::{Codec, ScoringWeights};

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<SecretString> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_default()
        .into()
});

/// SoundCloud API client id
/// Read from SOUNDCLOUD_CLIENT_ID environment variable
pub static SOUNDCLOUD_CLIENT_ID: Lazy<SecretString> =
    Lazy::new(|| env::var("SOUNDCLOUD_CLIENT_ID").unwrap_or_default().into());

/// Chat used to mint file ids for audio that has to end up in inline messages
/// Read from STORAGE_CHAT_ID environment variable
pub static STORAGE_CHAT_ID: Lazy<Option<i64>> =
    Lazy::new(|| env::var("STORAGE_CHAT_ID").ok().and_then(|v| v.trim().parse().ok()));

/// Audio cache database path
/// Read from CACHE_DATABASE_PATH environment variable
/// Default: soundgrab_cache.sqlite
pub static CACHE_DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("CACHE_DATABASE_PATH").unwrap_or_else(|_| "soundgrab_cache.sqlite".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: soundgrab.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "soundgrab.log".to_string()));

/// Optional TOML file with pipeline settings
/// Read from SOUNDGRAB_CONFIG environment variable
/// Default: soundgrab.toml
pub static SETTINGS_FILE: Lazy<String> =
    Lazy::new(|| env::var("SOUNDGRAB_CONFIG").unwrap_or_else(|_| "soundgrab.toml".to_string()));

/// Network configuration
pub mod network {
    use super::Duration;

    /// Per-attempt timeout for a single HLS segment (in seconds)
    pub const SEGMENT_TIMEOUT_SECS: u64 = 30;

    /// Per-attempt timeout for a progressive download (in seconds)
    pub const DIRECT_TIMEOUT_SECS: u64 = 120;

    /// Timeout for SoundCloud/Spotify API calls (in seconds)
    pub const API_TIMEOUT_SECS: u64 = 15;

    pub const USER_AGENT: &str = concat!("soundgrab/", env!("CARGO_PKG_VERSION"));

    /// Timeout for Bot API requests, uploads included (in seconds)
    pub const BOT_TIMEOUT_SECS: u64 = 300;

    pub fn api_timeout() -> Duration {
        Duration::from_secs(API_TIMEOUT_SECS)
    }

    pub fn bot_timeout() -> Duration {
        Duration::from_secs(BOT_TIMEOUT_SECS)
    }
}

/// Download configuration
pub mod download {
    /// Upper bound on a single track, matching the Bot API upload limit
    pub const MAX_DOWNLOAD_BYTES: u64 = 50 * 1024 * 1024;

    /// Attempts per segment / direct download, first try included
    pub const FETCH_ATTEMPTS: u32 = 3;

    /// Segments fetched concurrently for one HLS stream
    pub const SEGMENT_CONCURRENCY: usize = 4;

    /// Playlists are truncated to this many tracks
    pub const MAX_PLAYLIST_TRACKS: usize = 50;

    /// Results returned for an inline search
    pub const INLINE_SEARCH_LIMIT: usize = 10;

    /// Quiet period before an inline query is searched (in milliseconds)
    pub const INLINE_DEBOUNCE_MS: u64 = 500;

    /// How long inline search answers are reused (in seconds)
    pub const INLINE_RESULTS_TTL_SECS: u64 = 120;
}

/// Cache configuration
pub mod cache {
    use super::Duration;

    /// Entries older than this are treated as misses (7 days)
    pub const TTL_SECS: u64 = 7 * 24 * 60 * 60;

    /// Byte budget of the in-memory layer
    pub const HOT_CAPACITY_BYTES: u64 = 512 * 1024 * 1024;

    pub fn ttl() -> Duration {
        Duration::from_secs(TTL_SECS)
    }
}

/// Validation configuration
pub mod validation {
    /// Files smaller than this are rejected outright
    pub const MIN_BYTES: usize = 1024;

    /// Absolute duration tolerance (in seconds)
    pub const TOLERANCE_SECS: f64 = 5.0;

    /// Relative duration tolerance
    pub const TOLERANCE_RATIO: f64 = 0.05;
}

/// Retry policy for segment and direct fetches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts including the first one
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: download::FETCH_ATTEMPTS,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetrySettings {
    /// Rejects values the backoff arithmetic cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(format!(
                "retry.backoff_multiplier must be a finite number >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(format!(
                "retry.max_delay_ms ({}) is below retry.initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            ));
        }
        Ok(())
    }

    pub fn to_retry_config(&self) -> RetryConfig {
        let config = RetryConfig::new()
            .max_retries(self.attempts.saturating_sub(1))
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .backoff_multiplier(self.backoff_multiplier);
        if self.jitter {
            config
        } else {
            config.no_jitter()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    pub min_bytes: usize,
    pub tolerance_secs: f64,
    pub tolerance_ratio: f64,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            min_bytes: validation::MIN_BYTES,
            tolerance_secs: validation::TOLERANCE_SECS,
            tolerance_ratio: validation::TOLERANCE_RATIO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub hot_capacity_bytes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: cache::TTL_SECS,
            hot_capacity_bytes: cache::HOT_CAPACITY_BYTES,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Tunables of the download pipeline.
///
/// Loaded from built-in defaults, then an optional TOML file, then
/// `SOUNDGRAB_`-prefixed environment variables (nested keys use `__`, e.g.
/// `SOUNDGRAB_RETRY__ATTEMPTS=5`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub retry: RetrySettings,
    pub scoring: ScoringWeights,
    pub allowed_codecs: Vec<Codec>,
    pub segment_concurrency: usize,
    pub max_download_bytes: u64,
    pub segment_timeout_secs: u64,
    pub direct_timeout_secs: u64,
    pub validation: ValidationSettings,
    pub cache: CacheSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            scoring: ScoringWeights::default(),
            allowed_codecs: vec![Codec::Mp3, Codec::Aac],
            segment_concurrency: download::SEGMENT_CONCURRENCY,
            max_download_bytes: download::MAX_DOWNLOAD_BYTES,
            segment_timeout_secs: network::SEGMENT_TIMEOUT_SECS,
            direct_timeout_secs: network::DIRECT_TIMEOUT_SECS,
            validation: ValidationSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl PipelineSettings {
    /// Loads settings from defaults, `path` (if it exists) and the environment.
    ///
    /// Values that parse but make no sense (negative backoff, tolerances
    /// below zero) are rejected here rather than at first use.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        let settings: Self = Self::figment(path).extract()?;
        settings.validate().map_err(figment::Error::from)?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.retry.validate()?;
        let tolerances = [self.validation.tolerance_secs, self.validation.tolerance_ratio];
        if tolerances.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err("validation tolerances must be finite and not negative".to_string());
        }
        if self.segment_concurrency == 0 {
            return Err("segment_concurrency must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SOUNDGRAB_").split("__"))
    }

    pub fn segment_timeout(&self) -> Duration {
        Duration::from_secs(self.segment_timeout_secs)
    }

    pub fn direct_timeout(&self) -> Duration {
        Duration::from_secs(self.direct_timeout_secs)
    }
}
