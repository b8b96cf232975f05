//! Logging initialization and startup diagnostics
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - A startup summary of the environment configuration

use anyhow::Result;
use secrecy::ExposeSecret;
use simplelog::*;
use std::fs::File;

use crate::core::config::{self, PipelineSettings};

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Failed to initialize logger
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Info, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs which parts of the environment are configured at startup.
///
/// Secrets are never printed, only whether they are present.
pub fn log_startup_configuration(settings: &PipelineSettings) {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("Configuration");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if config::BOT_TOKEN.expose_secret().is_empty() {
        log::error!("❌ BOT_TOKEN: not set");
    } else {
        log::info!("✅ BOT_TOKEN: set");
    }

    if config::SOUNDCLOUD_CLIENT_ID.expose_secret().is_empty() {
        log::warn!("⚠️ SOUNDCLOUD_CLIENT_ID: not set, one will be scraped from soundcloud.com");
    } else {
        log::info!("✅ SOUNDCLOUD_CLIENT_ID: set");
    }

    match *config::STORAGE_CHAT_ID {
        Some(chat_id) => log::info!("✅ STORAGE_CHAT_ID: {}", chat_id),
        None => log::warn!("⚠️  STORAGE_CHAT_ID: not set, inline results can only use cached file ids"),
    }

    log::info!("Cache database: {}", *config::CACHE_DATABASE_PATH);
    log::info!(
        "Pipeline: {} attempts per fetch, {} concurrent segments, {} MiB cap, codecs {:?}",
        settings.retry.attempts,
        settings.segment_concurrency,
        settings.max_download_bytes / (1024 * 1024),
        settings.allowed_codecs
    );
    log::info!("Cache TTL: {}s", settings.cache.ttl_secs);
}
