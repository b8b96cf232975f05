//! Download pipeline: stream selection, HLS and progressive fetching, validation

pub mod direct;
pub mod error;
pub mod hls;
pub mod http;
pub mod pipeline;
pub mod selector;
pub mod validate;

// Re-exports for convenience
pub use error::{DownloadError, DownloadResult};
pub use pipeline::{TrackFetcher, TrackPipeline};
pub use selector::{StreamCandidate, StreamSelector};
pub use validate::{AudioFormat, FileValidator, InvalidReason, ValidatedAudio};
