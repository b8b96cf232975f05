use anyhow::Result;
use dotenvy::dotenv;
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::update_listeners::Polling;
use tokio::time::interval;

use soundgrab::cli::{CacheAction, Cli, Commands};
use soundgrab::core::config::{self, PipelineSettings};
use soundgrab::core::retry::{retry, RetryConfig};
use soundgrab::core::{init_logger, log_startup_configuration, metrics};
use soundgrab::download::{FileValidator, TrackPipeline};
use soundgrab::source::{LinkResolver, Resolved, SoundCloudClient, SpotifyLinkResolver, TrackResolver};
use soundgrab::storage::{create_pool, CacheManager, SqliteCacheStore};
use soundgrab::telegram::captions;
use soundgrab::telegram::{
    create_bot, schema, setup_bot_commands, DeliveryReconciler, HandlerDeps, TelegramTransport,
};

/// How often expired cache entries are pruned while the bot runs
const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Main entry point for the Telegram bot
///
/// Parses CLI arguments and dispatches to appropriate subcommand.
///
/// # Errors
/// Returns an error if initialization fails (logging, settings, database, bot creation).
#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Set up global panic handler so panics in spawned deliveries end up in the log
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
        if let Some(msg) = panic_info.payload().downcast_ref::<&str>() {
            log::error!("Panic message: {}", msg);
        }
    }));

    // Load environment variables from .env if present
    let _ = dotenv();

    // Initialize logger (console + file)
    init_logger(&config::LOG_FILE_PATH)?;

    let settings = PipelineSettings::load(config::SETTINGS_FILE.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid settings in {}: {}", config::SETTINGS_FILE.as_str(), e))?;

    match cli.command {
        Some(Commands::Run { no_persist }) => run_bot(settings, no_persist).await,
        Some(Commands::Fetch { query, output }) => run_fetch(settings, query, output).await,
        Some(Commands::Cache { action }) => run_cache(settings, action).await,
        None => {
            // No command specified - default to running the bot
            log::info!("No command specified, running bot in default mode");
            run_bot(settings, false).await
        }
    }
}

fn build_sources() -> Result<(Arc<SoundCloudClient>, Arc<LinkResolver>)> {
    let client_id = SecretString::from(config::SOUNDCLOUD_CLIENT_ID.expose_secret().to_string());
    let soundcloud = Arc::new(SoundCloudClient::new(client_id)?);
    let resolver = Arc::new(LinkResolver::new(Arc::clone(&soundcloud), SpotifyLinkResolver::new()?));
    Ok((soundcloud, resolver))
}

fn build_cache(settings: &PipelineSettings, persist: bool) -> Result<CacheManager> {
    let validator = FileValidator::from_settings(&settings.validation);
    if !persist {
        log::info!("Audio cache is in-memory only");
        return Ok(CacheManager::in_memory(&settings.cache, validator));
    }

    let pool = create_pool(&config::CACHE_DATABASE_PATH)
        .map_err(|e| anyhow::anyhow!("Failed to open cache database {}: {}", config::CACHE_DATABASE_PATH.as_str(), e))?;
    Ok(CacheManager::new(
        Arc::new(SqliteCacheStore::new(pool)),
        &settings.cache,
        validator,
    ))
}

/// Runs the bot with long polling until Ctrl+C.
async fn run_bot(settings: PipelineSettings, no_persist: bool) -> Result<()> {
    log::info!("Starting soundgrab {}", env!("CARGO_PKG_VERSION"));
    log_startup_configuration(&settings);
    metrics::init_metrics();

    let bot = create_bot()?;

    // The Bot API may still be starting up (local server); retry transient failures
    let startup_retry = RetryConfig::default().max_retries(10).max_delay(Duration::from_secs(10));
    let bot_ref = &bot;
    let bot_info = retry(&startup_retry, || async move { bot_ref.get_me().await })
        .await
        .into_result()
        .map_err(|e| anyhow::anyhow!("Failed to connect to Bot API: {}", e))?;
    let bot_username = bot_info.username.clone();
    let bot_id = bot_info.id;
    log::info!("Bot username: {:?}, Bot ID: {}", bot_username, bot_id);

    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to set bot commands: {}", e);
    }

    let (soundcloud, resolver) = build_sources()?;
    let pipeline = Arc::new(TrackPipeline::from_settings(soundcloud.clone(), &settings)?);
    let cache = build_cache(&settings, !no_persist)?;

    // Periodic cleanup of expired entries
    let maintenance = cache.clone();
    tokio::spawn(async move {
        let mut ticker = interval(PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = maintenance.prune_expired().await {
                log::warn!("Cache prune failed: {}", e);
            }
            let stats = maintenance.stats().await;
            log::info!(
                "Cache: {} hits, {} misses, {} coalesced, {} in flight, hit rate {:.0}%",
                stats.hits,
                stats.misses,
                stats.coalesced,
                stats.in_flight,
                stats.hit_rate() * 100.0
            );
        }
    });

    let storage_chat = config::STORAGE_CHAT_ID.map(ChatId);
    let transport = Arc::new(TelegramTransport::new(bot.clone(), storage_chat)?);
    let reconciler = Arc::new(DeliveryReconciler::new(transport, cache, pipeline));

    let deps = HandlerDeps::new(resolver, soundcloud, reconciler, bot_username, bot_id);
    let handler = schema(deps);

    log::info!("================================================");
    log::info!("📡 Ready to receive updates (long polling)");
    log::info!("================================================");

    // Create polling listener that drops pending updates on start
    let listener = Polling::builder(bot.clone()).drop_pending_updates().build();

    Dispatcher::builder(bot, handler)
        .dependencies(DependencyMap::new())
        .enable_ctrlc_handler()
        .build()
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("An error from the update listener"),
        )
        .await;

    log::info!("Dispatcher shutdown gracefully");
    log::debug!("Final metrics:\n{}", metrics::gather_text());
    Ok(())
}

/// Resolves, downloads and validates one track, then writes it to disk.
async fn run_fetch(settings: PipelineSettings, query: String, output: Option<PathBuf>) -> Result<()> {
    let (soundcloud, resolver) = build_sources()?;

    let track = match resolver.resolve(&query).await? {
        Resolved::Track(track) => track,
        Resolved::Playlist { title, tracks } => {
            let first = tracks
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("Playlist {:?} has no downloadable tracks", title))?;
            log::info!("{:?} is a playlist, fetching its first track", title);
            first
        }
    };
    log::info!("Resolved {:?} to {}", query, track.display_name());

    let pipeline = Arc::new(TrackPipeline::from_settings(soundcloud, &settings)?);
    let cache = build_cache(&settings, true)?;

    let fetcher = Arc::clone(&pipeline);
    let owned = track.clone();
    let cached = cache
        .get_or_fetch(&track.fingerprint(), move || async move { fetcher.fetch(&owned).await })
        .await?;

    // A file id alone is no use outside Telegram
    let audio = match cached.audio {
        Some(audio) => audio,
        None => pipeline.fetch(&track).await?,
    };

    let path = output.unwrap_or_else(|| PathBuf::from(captions::file_name(&track, audio.format())));
    fs_err::tokio::write(&path, audio.bytes()).await?;

    println!(
        "{} → {} ({}, {:.1}s, {} bytes)",
        track.display_name(),
        path.display(),
        audio.format(),
        audio.duration().as_secs_f64(),
        audio.len()
    );
    Ok(())
}

async fn run_cache(settings: PipelineSettings, action: CacheAction) -> Result<()> {
    let cache = build_cache(&settings, true)?;
    match action {
        CacheAction::Stats => {
            let stats = cache.stats().await;
            println!("Database: {}", config::CACHE_DATABASE_PATH.as_str());
            match stats.persisted {
                Some(count) => println!("Entries:  {}", count),
                None => println!("Entries:  unavailable"),
            }
            println!("TTL:      {} days", settings.cache.ttl().as_secs() / 86_400);
        }
        CacheAction::Prune => {
            let removed = cache.prune_expired().await?;
            println!("Removed {} expired entr{}", removed, if removed == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}
