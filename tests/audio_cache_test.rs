//! Integration tests for the coalescing audio cache
//!
//! Run with: cargo test --test audio_cache_test

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use common::{init_test_logger, track, CountingFetcher, UnavailableStore};
use futures_util::future::join_all;
use pretty_assertions::assert_eq;
use soundgrab::core::config::CacheSettings;
use soundgrab::download::{AudioFormat, DownloadError, FileValidator, TrackFetcher, ValidatedAudio};
use soundgrab::storage::{create_pool, CacheManager, CacheRecord, CacheStore, MemoryCacheStore, SqliteCacheStore};
use soundgrab::{CachedAudio, DownloadResult, TrackReference};

fn manager(store: Arc<dyn CacheStore>) -> CacheManager {
    CacheManager::new(store, &CacheSettings::default(), FileValidator::default())
}

/// Runs `get_or_fetch` for `track` through `fetcher`.
async fn fetch_through(cache: &CacheManager, fetcher: &Arc<CountingFetcher>, track: &TrackReference) -> DownloadResult {
    let fetcher = Arc::clone(fetcher);
    let owned = track.clone();
    cache
        .get_or_fetch(&track.fingerprint(), move || async move { fetcher.fetch(&owned).await })
        .await
}

fn duration_of(entry: &CachedAudio) -> f64 {
    entry.audio.as_ref().map(|a| a.duration().as_secs_f64()).unwrap_or_default()
}

// ============================================================================
// Coalescing
// ============================================================================

#[tokio::test]
async fn test_concurrent_misses_share_one_fetch() {
    init_test_logger();
    let cache = manager(Arc::new(MemoryCacheStore::new()));
    let fetcher = Arc::new(CountingFetcher::new().with_delay(Duration::from_millis(200)));
    let track = track("100", Some(20));

    let results = join_all((0..8).map(|_| fetch_through(&cache, &fetcher, &track))).await;

    assert_eq!(fetcher.calls(), 1);
    let first = results[0].as_ref().unwrap().clone();
    for result in &results {
        assert_eq!(result.as_ref().unwrap(), &first);
    }
    assert!((duration_of(&first) - 20.0).abs() < 0.1);

    let stats = cache.stats().await;
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits + stats.coalesced, 7);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_fetch_failure_reaches_every_waiter_and_is_not_cached() {
    let cache = manager(Arc::new(MemoryCacheStore::new()));
    let error = DownloadError::NoPlayableStream { candidates: 2 };
    let fetcher = Arc::new(
        CountingFetcher::new()
            .with_delay(Duration::from_millis(100))
            .failing(error.clone()),
    );
    let track = track("101", Some(20));

    let results = join_all((0..4).map(|_| fetch_through(&cache, &fetcher, &track))).await;

    assert_eq!(fetcher.calls(), 1);
    for result in results {
        assert_eq!(result.unwrap_err(), error);
    }
    assert!(cache.get(&track.fingerprint()).await.is_none());

    // the next request starts a fresh fetch
    let _ = fetch_through(&cache, &fetcher, &track).await;
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_abandoned_caller_does_not_cancel_the_fetch() {
    let cache = manager(Arc::new(MemoryCacheStore::new()));
    let fetcher = Arc::new(CountingFetcher::new().with_delay(Duration::from_millis(300)));
    let track = track("102", Some(10));

    let task = {
        let cache = cache.clone();
        let fetcher = Arc::clone(&fetcher);
        let track = track.clone();
        tokio::spawn(async move { fetch_through(&cache, &fetcher, &track).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    let mut cached = None;
    for _ in 0..40 {
        cached = cache.get(&track.fingerprint()).await;
        if cached.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let cached = cached.expect("fetch should finish without its caller");
    assert!((duration_of(&cached) - 10.0).abs() < 0.1);

    let again = fetch_through(&cache, &fetcher, &track).await.unwrap();
    assert_eq!(again.audio, cached.audio);
    assert_eq!(fetcher.calls(), 1);
}

async fn exploding_fetch() -> Result<ValidatedAudio, DownloadError> {
    panic!("decoder blew up")
}

#[tokio::test]
async fn test_panicking_fetch_frees_the_slot_for_the_next_request() {
    init_test_logger();
    let cache = manager(Arc::new(MemoryCacheStore::new()));
    let fetcher = Arc::new(CountingFetcher::new());
    let track = track("103", Some(12));

    let first = cache.get_or_fetch(&track.fingerprint(), exploding_fetch).await;
    assert!(matches!(first, Err(DownloadError::Internal(_))), "{:?}", first);
    assert_eq!(cache.stats().await.in_flight, 0);

    let second = fetch_through(&cache, &fetcher, &track).await.unwrap();
    assert!((duration_of(&second) - 12.0).abs() < 0.1);
    assert_eq!(fetcher.calls(), 1);

    let stats = cache.stats().await;
    assert_eq!((stats.misses, stats.in_flight), (2, 0));
}

#[tokio::test]
async fn test_file_id_does_not_resurrect_invalidated_bytes() {
    let cache = manager(Arc::new(MemoryCacheStore::new()));
    let fetcher = Arc::new(CountingFetcher::new());
    let track = track("104", Some(8));
    let fingerprint = track.fingerprint();

    let fetched = fetch_through(&cache, &fetcher, &track).await.unwrap();
    assert!(fetched.audio.is_some());

    cache.invalidate(&fingerprint).await;
    cache.record_file_id(&fingerprint, "AgAD-late").await;

    let entry = cache.get(&fingerprint).await.unwrap();
    assert_eq!(entry.file_id.as_deref(), Some("AgAD-late"));
    assert!(entry.audio.is_none());
}

#[tokio::test]
async fn test_file_id_is_added_to_a_hot_entry() {
    let cache = manager(Arc::new(UnavailableStore));
    let fetcher = Arc::new(CountingFetcher::new());
    let track = track("105", Some(8));

    fetch_through(&cache, &fetcher, &track).await.unwrap();
    cache.record_file_id(&track.fingerprint(), "AgAD-hot").await;

    let entry = cache.get(&track.fingerprint()).await.unwrap();
    assert_eq!(entry.file_id.as_deref(), Some("AgAD-hot"));
    assert!(entry.audio.is_some());
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_entries_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("cache.sqlite");
    let db_path = db_path.to_str().unwrap();
    let fetcher = Arc::new(CountingFetcher::new());
    let track = track("103", Some(15));

    {
        let cache = manager(Arc::new(SqliteCacheStore::new(create_pool(db_path).unwrap())));
        fetch_through(&cache, &fetcher, &track).await.unwrap();
        cache.record_file_id(&track.fingerprint(), "AgAD-103").await;
    }

    let cache = manager(Arc::new(SqliteCacheStore::new(create_pool(db_path).unwrap())));
    let hit = fetch_through(&cache, &fetcher, &track).await.unwrap();

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(hit.file_id.as_deref(), Some("AgAD-103"));
    assert!((duration_of(&hit) - 15.0).abs() < 0.1);
    assert_eq!(cache.stats().await.persisted, Some(1));
}

#[tokio::test]
async fn test_corrupt_persisted_blob_is_dropped() {
    init_test_logger();
    let store = Arc::new(MemoryCacheStore::new());
    let track = track("104", Some(12));
    store
        .save(&CacheRecord {
            fingerprint: track.fingerprint(),
            file_id: None,
            blob: Some(Bytes::from(vec![0x42u8; 4096])),
            format: Some(AudioFormat::Mp3),
            duration_secs: Some(12.0),
            validated_at: Utc::now(),
        })
        .await
        .unwrap();

    let cache = manager(store.clone());
    assert!(cache.get(&track.fingerprint()).await.is_none());
    assert_eq!(store.count().await.unwrap(), 0);

    let fetcher = Arc::new(CountingFetcher::new());
    let refetched = fetch_through(&cache, &fetcher, &track).await.unwrap();
    assert_eq!(fetcher.calls(), 1);
    assert!((duration_of(&refetched) - 12.0).abs() < 0.1);
}

#[tokio::test]
async fn test_unavailable_store_degrades_to_pass_through() {
    init_test_logger();
    let cache = manager(Arc::new(UnavailableStore));
    let fetcher = Arc::new(CountingFetcher::new());
    let track = track("105", Some(8));

    let first = fetch_through(&cache, &fetcher, &track).await.unwrap();
    assert!((duration_of(&first) - 8.0).abs() < 0.1);

    // the in-process layer still serves repeats
    let second = fetch_through(&cache, &fetcher, &track).await.unwrap();
    assert_eq!(second.audio, first.audio);
    assert_eq!(fetcher.calls(), 1);

    cache.record_file_id(&track.fingerprint(), "AgAD-105").await;
    cache.invalidate(&track.fingerprint()).await;
    assert!(cache.prune_expired().await.is_err());

    let stats = cache.stats().await;
    assert_eq!(stats.persisted, None);
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[tokio::test]
async fn test_prune_removes_only_expired_entries() {
    let store = Arc::new(MemoryCacheStore::new());
    let fresh = track("106", Some(5));
    let old = track("107", Some(5));
    store
        .set_file_id(&fresh.fingerprint(), "AgAD-fresh", Utc::now())
        .await
        .unwrap();
    store
        .set_file_id(&old.fingerprint(), "AgAD-old", Utc::now() - chrono::Duration::days(30))
        .await
        .unwrap();

    let cache = manager(store.clone());
    assert_eq!(cache.prune_expired().await.unwrap(), 1);
    assert_eq!(store.count().await.unwrap(), 1);
    assert!(cache.get(&fresh.fingerprint()).await.is_some());
}
