//! Handler types and dependencies

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use teloxide::types::UserId;

use crate::core::types::TrackReference;
use crate::source::{SoundCloudClient, TrackResolver};
use crate::telegram::inline_search::InlineSearch;
use crate::telegram::DeliveryReconciler;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Inline results the user might still pick, keyed by result id
const INLINE_RESULTS_CAPACITY: u64 = 10_000;
const INLINE_RESULTS_TTL: Duration = Duration::from_secs(15 * 60);

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub resolver: Arc<dyn TrackResolver>,
    /// Re-resolves chosen inline results that fell out of `inline_tracks`
    pub soundcloud: Arc<SoundCloudClient>,
    pub reconciler: Arc<DeliveryReconciler>,
    pub inline_tracks: Cache<String, TrackReference>,
    pub inline_search: Arc<InlineSearch>,
    pub bot_username: Option<String>,
    pub bot_id: UserId,
}

impl HandlerDeps {
    /// Create new handler dependencies
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        soundcloud: Arc<SoundCloudClient>,
        reconciler: Arc<DeliveryReconciler>,
        bot_username: Option<String>,
        bot_id: UserId,
    ) -> Self {
        Self {
            inline_search: Arc::new(InlineSearch::new(Arc::clone(&resolver))),
            resolver,
            soundcloud,
            reconciler,
            inline_tracks: Cache::builder()
                .max_capacity(INLINE_RESULTS_CAPACITY)
                .time_to_live(INLINE_RESULTS_TTL)
                .build(),
            bot_username,
            bot_id,
        }
    }
}

/// Result id of an inline search hit: `"<track id>_<position>"`.
pub fn inline_result_id(track: &TrackReference, index: usize) -> String {
    format!("{}_{}", track.id(), index)
}

/// Track id encoded by [`inline_result_id`].
pub fn track_id_from_result_id(result_id: &str) -> Option<&str> {
    let (track_id, index) = result_id.rsplit_once('_')?;
    if track_id.is_empty() || index.parse::<usize>().is_err() {
        return None;
    }
    Some(track_id)
}
