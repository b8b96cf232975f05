//! Structural validation of downloaded audio.
//!
//! The container is opened with symphonia and every packet of the audio
//! track is walked (demux only, nothing is decoded) to measure the duration
//! that is actually present. That measured duration is compared with the
//! duration the container header declares and with the duration the caller
//! expects.

use std::io::{Cursor, ErrorKind};
use std::time::Duration;

use bytes::Bytes;
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::core::config::ValidationSettings;
use crate::core::metrics;
use crate::download::error::DownloadError;

/// Anything shorter than this is not a track.
const MIN_DURATION_SECS: f64 = 0.1;

/// Why a buffer was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum InvalidReason {
    Empty,
    TooSmall,
    UnparsableHeader,
    NoAudioTrack,
    ZeroDuration,
    Truncated,
    DurationMismatch,
}

/// Container format, sniffed from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Mp4,
    Aac,
    Ogg,
    Wav,
    Unknown,
}

impl AudioFormat {
    pub fn sniff(data: &[u8]) -> Self {
        match data {
            [b'I', b'D', b'3', ..] => AudioFormat::Mp3,
            [_, _, _, _, b'f', b't', b'y', b'p', ..] | [_, _, _, _, b's', b't', b'y', b'p', ..] => AudioFormat::Mp4,
            [b'O', b'g', b'g', b'S', ..] => AudioFormat::Ogg,
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => AudioFormat::Wav,
            // ADTS: 12-bit sync word, layer bits 00
            [0xFF, b1, ..] if b1 & 0xF6 == 0xF0 => AudioFormat::Aac,
            // MPEG audio frame sync with a non-reserved layer
            [0xFF, b1, ..] if b1 & 0xE0 == 0xE0 && b1 & 0x06 != 0 => AudioFormat::Mp3,
            _ => AudioFormat::Unknown,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Mp4 => "m4a",
            AudioFormat::Aac => "aac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Wav => "wav",
            AudioFormat::Unknown => "bin",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Mp4 => "audio/mp4",
            AudioFormat::Aac => "audio/aac",
            AudioFormat::Ogg => "audio/ogg",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Unknown => "application/octet-stream",
        }
    }
}

/// Audio that passed validation.
///
/// There is no public constructor: the only way to obtain one is
/// [`FileValidator::validate`], so anything holding a `ValidatedAudio` holds
/// bytes the validator accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedAudio {
    bytes: Bytes,
    duration: Duration,
    format: AudioFormat,
}

impl ValidatedAudio {
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Checks downloaded bytes for playability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileValidator {
    min_bytes: usize,
    tolerance_secs: f64,
    tolerance_ratio: f64,
}

impl Default for FileValidator {
    fn default() -> Self {
        Self::from_settings(&ValidationSettings::default())
    }
}

impl FileValidator {
    pub fn from_settings(settings: &ValidationSettings) -> Self {
        Self {
            min_bytes: settings.min_bytes,
            tolerance_secs: settings.tolerance_secs,
            tolerance_ratio: settings.tolerance_ratio,
        }
    }

    /// Allowed deviation around `reference` seconds: max(absolute, relative).
    fn tolerance(&self, reference: f64) -> f64 {
        self.tolerance_secs.max(reference * self.tolerance_ratio)
    }

    /// Validates `bytes`, optionally against the duration the source reported.
    ///
    /// CPU bound; async callers should use [`FileValidator::validate_blocking`].
    pub fn validate(&self, bytes: Bytes, expected: Option<Duration>) -> Result<ValidatedAudio, InvalidReason> {
        let result = self.inspect(bytes, expected);
        if let Err(reason) = &result {
            metrics::record_validation_failure(reason.as_ref());
        }
        result
    }

    /// Runs [`FileValidator::validate`] on the blocking pool.
    pub async fn validate_blocking(
        &self,
        bytes: Bytes,
        expected: Option<Duration>,
    ) -> Result<ValidatedAudio, DownloadError> {
        let validator = *self;
        tokio::task::spawn_blocking(move || validator.validate(bytes, expected))
            .await
            .map_err(|e| DownloadError::Internal(format!("validation task failed: {}", e)))?
            .map_err(|reason| DownloadError::ValidationFailed { reason })
    }

    fn inspect(&self, bytes: Bytes, expected: Option<Duration>) -> Result<ValidatedAudio, InvalidReason> {
        if bytes.is_empty() {
            return Err(InvalidReason::Empty);
        }
        if bytes.len() < self.min_bytes {
            return Err(InvalidReason::TooSmall);
        }

        let format = AudioFormat::sniff(&bytes);
        let mut hint = Hint::new();
        if format != AudioFormat::Unknown {
            hint.with_extension(format.extension());
        }

        let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.clone())), Default::default());
        let opened = symphonia::default::get_probe()
            .format(&hint, source, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| {
                log::debug!("No container recognised: {}", e);
                InvalidReason::UnparsableHeader
            })?;
        let mut reader = opened.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(InvalidReason::NoAudioTrack)?;
        let track_id = track.id;
        let params = track.codec_params.clone();
        let time_base = params
            .time_base
            .or_else(|| params.sample_rate.map(|rate| TimeBase::new(1, rate)))
            .ok_or(InvalidReason::UnparsableHeader)?;
        let declared = params.n_frames.map(|frames| seconds(time_base.calc_time(frames)));

        let mut end_ts: u64 = 0;
        loop {
            match reader.next_packet() {
                Ok(packet) => {
                    if packet.track_id() == track_id {
                        end_ts = end_ts.max(packet.ts().saturating_add(packet.dur()));
                    }
                }
                Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    // Damaged data past this point; what was scanned so far is what plays
                    log::debug!("Packet scan stopped early: {}", e);
                    break;
                }
            }
        }
        let scanned = seconds(time_base.calc_time(end_ts));

        if scanned < MIN_DURATION_SECS {
            return Err(InvalidReason::ZeroDuration);
        }
        if let Some(declared) = declared {
            if declared - scanned > self.tolerance(declared) {
                log::warn!("Audio truncated: header declares {:.1}s, found {:.1}s", declared, scanned);
                return Err(InvalidReason::Truncated);
            }
        }
        if let Some(expected) = expected {
            let expected = expected.as_secs_f64();
            if (scanned - expected).abs() > self.tolerance(expected) {
                log::warn!("Duration mismatch: expected {:.1}s, found {:.1}s", expected, scanned);
                return Err(InvalidReason::DurationMismatch);
            }
        }

        Ok(ValidatedAudio {
            bytes,
            duration: Duration::from_secs_f64(scanned),
            format,
        })
    }
}

fn seconds(time: Time) -> f64 {
    time.seconds as f64 + time.frac
}
