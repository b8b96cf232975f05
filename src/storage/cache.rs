//! Coalescing audio cache.
//!
//! Lookups go hot layer (`moka`, byte-weighted, TTL) → persisted
//! [`CacheStore`]. On a miss the fetch function runs on a spawned task and
//! its shared future is parked in an in-flight map, so concurrent callers
//! for one fingerprint await the same download and a caller that goes away
//! does not cancel it. Store failures are logged and degrade to a miss or a
//! skipped write.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use moka::future::Cache;
use moka::ops::compute::Op;

use crate::core::config::CacheSettings;
use crate::core::metrics;
use crate::core::types::Fingerprint;
use crate::download::error::{DownloadError, DownloadResult};
use crate::download::validate::{FileValidator, ValidatedAudio};
use crate::storage::store::{is_fresh, CacheRecord, CacheStore, MemoryCacheStore, StoreError};

type SharedFetch = Shared<BoxFuture<'static, DownloadResult>>;

/// A cache hit: a reusable file id, validated bytes, or both.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAudio {
    pub fingerprint: Fingerprint,
    pub file_id: Option<String>,
    pub audio: Option<ValidatedAudio>,
    pub validated_at: DateTime<Utc>,
}

impl CachedAudio {
    fn weight(&self) -> u32 {
        let bytes = self.audio.as_ref().map_or(0, ValidatedAudio::len)
            + self.file_id.as_ref().map_or(0, String::len)
            + 64;
        u32::try_from(bytes).unwrap_or(u32::MAX)
    }

    fn to_record(&self) -> CacheRecord {
        CacheRecord {
            fingerprint: self.fingerprint.clone(),
            file_id: self.file_id.clone(),
            blob: self.audio.as_ref().map(|a| a.bytes().clone()),
            format: self.audio.as_ref().map(ValidatedAudio::format),
            duration_secs: self.audio.as_ref().map(|a| a.duration().as_secs_f64()),
            validated_at: self.validated_at,
        }
    }
}

/// Counters since startup plus current sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub in_flight: usize,
    pub hot_entries: u64,
    pub hot_bytes: u64,
    /// `None` when the store could not be counted
    pub persisted: Option<usize>,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

struct Inner {
    hot: Cache<Fingerprint, CachedAudio>,
    in_flight: DashMap<Fingerprint, SharedFetch>,
    store: Arc<dyn CacheStore>,
    validator: FileValidator,
    ttl: Duration,
    counters: Counters,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn CacheStore>, settings: &CacheSettings, validator: FileValidator) -> Self {
        let hot = Cache::builder()
            .max_capacity(settings.hot_capacity_bytes)
            .weigher(|_key: &Fingerprint, value: &CachedAudio| value.weight())
            .time_to_live(settings.ttl())
            .build();

        Self {
            inner: Arc::new(Inner {
                hot,
                in_flight: DashMap::new(),
                store,
                validator,
                ttl: settings.ttl(),
                counters: Counters::default(),
            }),
        }
    }

    /// Cache without persistence.
    pub fn in_memory(settings: &CacheSettings, validator: FileValidator) -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()), settings, validator)
    }

    /// Returns the cached entry, or runs `fetch` once for all concurrent callers.
    ///
    /// Only validated audio is stored. Fetch errors are handed to every waiter
    /// unchanged and nothing is cached for them.
    pub async fn get_or_fetch<F, Fut>(&self, fingerprint: &Fingerprint, fetch: F) -> DownloadResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ValidatedAudio, DownloadError>> + Send + 'static,
    {
        loop {
            if let Some(hit) = self.inner.lookup(fingerprint).await {
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup("hit");
                return Ok(hit);
            }

            let shared = match self.inner.in_flight.entry(fingerprint.clone()) {
                Entry::Occupied(slot) => {
                    self.inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    metrics::record_cache_lookup("coalesced");
                    log::debug!("Joining in-flight fetch for {}", fingerprint);
                    slot.get().clone()
                }
                Entry::Vacant(slot) => {
                    // a fetch finished between our lookup and here
                    if self.inner.hot.contains_key(fingerprint) {
                        drop(slot);
                        continue;
                    }
                    self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                    metrics::record_cache_lookup("miss");
                    let shared = Inner::spawn_fetch(&self.inner, fingerprint.clone(), fetch());
                    slot.insert(shared.clone());
                    shared
                }
            };
            return shared.await;
        }
    }

    /// Lookup without fetching.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<CachedAudio> {
        self.inner.lookup(fingerprint).await
    }

    /// Drops the entry from both layers.
    pub async fn invalidate(&self, fingerprint: &Fingerprint) {
        self.inner.hot.invalidate(fingerprint).await;
        if let Err(e) = self.inner.store.remove(fingerprint).await {
            degrade("remove", e);
        }
        log::info!("Invalidated cache entry {}", fingerprint);
    }

    /// Remembers the platform file id minted by a successful delivery.
    pub async fn record_file_id(&self, fingerprint: &Fingerprint, file_id: &str) {
        let now = Utc::now();
        // only amends an entry that is still present; never re-creates one
        self.inner
            .hot
            .entry(fingerprint.clone())
            .and_compute_with(|current| async move {
                match current {
                    Some(entry) => {
                        let mut entry = entry.into_value();
                        entry.file_id = Some(file_id.to_string());
                        Op::Put(entry)
                    }
                    None => Op::Nop,
                }
            })
            .await;
        if let Err(e) = self.inner.store.set_file_id(fingerprint, file_id, now).await {
            degrade("set_file_id", e);
        }
    }

    /// Deletes persisted entries older than the TTL.
    pub async fn prune_expired(&self) -> Result<usize, StoreError> {
        self.inner.hot.run_pending_tasks().await;
        let cutoff = match chrono::Duration::from_std(self.inner.ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        {
            Some(cutoff) => cutoff,
            None => return Ok(0),
        };
        let removed = self.inner.store.prune(cutoff).await?;
        log::info!("Pruned {} expired cache entries", removed);
        Ok(removed)
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.hot.run_pending_tasks().await;
        let persisted = match self.inner.store.count().await {
            Ok(count) => Some(count),
            Err(e) => {
                degrade("count", e);
                None
            }
        };
        CacheStats {
            hits: self.inner.counters.hits.load(Ordering::Relaxed),
            misses: self.inner.counters.misses.load(Ordering::Relaxed),
            coalesced: self.inner.counters.coalesced.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.len(),
            hot_entries: self.inner.hot.entry_count(),
            hot_bytes: self.inner.hot.weighted_size(),
            persisted,
        }
    }
}

impl Inner {
    async fn lookup(&self, fingerprint: &Fingerprint) -> Option<CachedAudio> {
        let now = Utc::now();
        if let Some(entry) = self.hot.get(fingerprint).await {
            if is_fresh(entry.validated_at, self.ttl, now) {
                return Some(entry);
            }
            self.hot.invalidate(fingerprint).await;
        }

        let record = match self.store.load(fingerprint).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                degrade("load", e);
                return None;
            }
        };

        if !record.is_fresh(self.ttl, now) {
            log::debug!("Cache entry {} expired", fingerprint);
            if let Err(e) = self.store.remove(fingerprint).await {
                degrade("remove", e);
            }
            return None;
        }

        let audio = match record.blob {
            Some(blob) => {
                let expected = record.duration_secs.map(Duration::from_secs_f64);
                match self.validator.validate_blocking(blob, expected).await {
                    Ok(audio) => Some(audio),
                    Err(e) => {
                        log::warn!("Persisted audio for {} is corrupt ({}), dropping it", fingerprint, e);
                        metrics::record_cache_lookup("corrupt");
                        if let Err(e) = self.store.remove(fingerprint).await {
                            degrade("remove", e);
                        }
                        return None;
                    }
                }
            }
            None => None,
        };
        if audio.is_none() && record.file_id.is_none() {
            return None;
        }

        let entry = CachedAudio {
            fingerprint: fingerprint.clone(),
            file_id: record.file_id,
            audio,
            validated_at: record.validated_at,
        };
        self.hot.insert(fingerprint.clone(), entry.clone()).await;
        Some(entry)
    }

    fn spawn_fetch<Fut>(inner: &Arc<Self>, fingerprint: Fingerprint, fetch: Fut) -> SharedFetch
    where
        Fut: Future<Output = Result<ValidatedAudio, DownloadError>> + Send + 'static,
    {
        let guard = InFlightGuard::new(Arc::clone(inner), fingerprint);

        let handle = tokio::spawn(async move {
            let outcome = match fetch.await {
                Ok(audio) => Ok(guard.inner.store_fetched(&guard.fingerprint, audio).await),
                Err(e) => Err(e),
            };
            drop(guard);
            outcome
        });

        async move {
            handle
                .await
                .map_err(|e| DownloadError::Internal(format!("fetch task failed: {}", e)))?
        }
        .boxed()
        .shared()
    }

    async fn store_fetched(&self, fingerprint: &Fingerprint, audio: ValidatedAudio) -> CachedAudio {
        let entry = CachedAudio {
            fingerprint: fingerprint.clone(),
            file_id: None,
            audio: Some(audio),
            validated_at: Utc::now(),
        };
        if let Err(e) = self.store.save(&entry.to_record()).await {
            degrade("save", e);
        }
        self.hot.insert(fingerprint.clone(), entry.clone()).await;
        entry
    }
}

/// Frees the in-flight slot when the fetch task ends, panics included.
struct InFlightGuard {
    inner: Arc<Inner>,
    fingerprint: Fingerprint,
}

impl InFlightGuard {
    fn new(inner: Arc<Inner>, fingerprint: Fingerprint) -> Self {
        metrics::FETCHES_IN_FLIGHT.inc();
        Self { inner, fingerprint }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.fingerprint);
        metrics::FETCHES_IN_FLIGHT.dec();
    }
}

fn degrade(operation: &str, err: StoreError) {
    let err = DownloadError::CacheUnavailable(err.to_string());
    log::warn!("{} during {}, continuing without the store", err, operation);
    metrics::record_store_error(operation);
}
