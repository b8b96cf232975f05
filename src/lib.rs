//! soundgrab - Telegram bot that delivers validated SoundCloud audio
//!
//! The core of the crate is the download pipeline: pick the best stream for a
//! resolved track, fetch it (progressive or HLS), validate the bytes, cache the
//! result and then swap a placeholder message for the real audio.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, retry, metrics and shared types
//! - `download`: stream selection, fetchers, validation and the track pipeline
//! - `storage`: the coalescing cache manager and its persisted store
//! - `source`: SoundCloud API client and Spotify link resolution
//! - `telegram`: messaging transport, delivery reconciler and dispatcher schema

pub mod cli;
pub mod core;
pub mod download;
pub mod source;
pub mod storage;
pub mod telegram;

// Re-export commonly used types for convenience
pub use core::types::{Fingerprint, Platform, TrackReference};
pub use core::{config, AppError, AppResult};
pub use download::{DownloadError, DownloadResult, TrackPipeline};
pub use storage::{CacheManager, CachedAudio};
pub use telegram::{DeliveryReconciler, DeliveryReport, DeliveryState};
