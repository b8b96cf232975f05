//! Common test utilities
//!
//! This module is shared across all integration tests

pub mod fixtures;
pub mod helpers;
pub mod recorder;

#[allow(unused_imports)]
pub use fixtures::{CountingFetcher, FixedProvider, UnavailableStore};
#[allow(unused_imports)]
pub use helpers::{fmp4, init_test_logger, media_playlist, mp3, test_client, track, wav, wav_chunks};
#[allow(unused_imports)]
pub use recorder::{RecordedCall, RecordingTransport};
