//! Debounced inline search.
//!
//! Telegram sends an inline query per keystroke. Each user's query waits a
//! short quiet period and is dropped if a newer one arrived meanwhile;
//! answers are kept briefly so repeated queries skip the platform API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::future::Cache;
use teloxide::types::UserId;

use crate::core::config;
use crate::core::types::TrackReference;
use crate::source::{Input, Resolved, SourceError, TrackResolver};

const RESULTS_CAPACITY: u64 = 1_000;

pub struct InlineSearch {
    resolver: Arc<dyn TrackResolver>,
    debounce: Duration,
    limit: usize,
    latest: DashMap<UserId, u64>,
    next_ticket: AtomicU64,
    results: Cache<String, Vec<TrackReference>>,
}

impl InlineSearch {
    pub fn new(resolver: Arc<dyn TrackResolver>) -> Self {
        Self::with_timing(
            resolver,
            Duration::from_millis(config::download::INLINE_DEBOUNCE_MS),
            Duration::from_secs(config::download::INLINE_RESULTS_TTL_SECS),
        )
    }

    pub fn with_timing(resolver: Arc<dyn TrackResolver>, debounce: Duration, results_ttl: Duration) -> Self {
        Self {
            resolver,
            debounce,
            limit: config::download::INLINE_SEARCH_LIMIT,
            latest: DashMap::new(),
            next_ticket: AtomicU64::new(0),
            results: Cache::builder()
                .max_capacity(RESULTS_CAPACITY)
                .time_to_live(results_ttl)
                .build(),
        }
    }

    /// Tracks to offer for `query`, or `None` when `user` typed on since.
    pub async fn search(&self, user: UserId, query: &str) -> Option<Result<Vec<TrackReference>, SourceError>> {
        let key = query.trim().to_lowercase();
        if let Some(hit) = self.results.get(&key).await {
            return Some(Ok(hit));
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.latest.insert(user, ticket);
        tokio::time::sleep(self.debounce).await;
        if self.latest.get(&user).map(|t| *t) != Some(ticket) {
            log::debug!("Inline query {:?} from {} superseded", query, user);
            return None;
        }
        self.latest.remove_if(&user, |_, t| *t == ticket);

        let outcome = self.candidates(query.trim()).await;
        if let Ok(tracks) = &outcome {
            self.results.insert(key, tracks.clone()).await;
        }
        Some(outcome)
    }

    /// The linked track(s), or search hits for free text.
    async fn candidates(&self, query: &str) -> Result<Vec<TrackReference>, SourceError> {
        match Input::classify(query) {
            Input::Text(text) => self.resolver.search(&text, self.limit).await,
            _ => match self.resolver.resolve(query).await? {
                Resolved::Track(track) => Ok(vec![track]),
                Resolved::Playlist { tracks, .. } => Ok(tracks.into_iter().take(self.limit).collect()),
            },
        }
    }
}
