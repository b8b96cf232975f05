//! Stream selection: score candidate audio streams and pick the best one.
//!
//! Scoring is pure. The same candidate list always yields the same choice,
//! and ties go to the candidate listed first.

use itertools::Itertools;
use lazy_regex::regex_captures;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::download::error::DownloadError;

/// Delivery protocol of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Protocol {
    Progressive,
    Hls,
    EncryptedHls,
}

impl Protocol {
    /// Maps a SoundCloud `format.protocol` value.
    pub fn from_soundcloud(protocol: &str) -> Self {
        match protocol {
            "progressive" => Protocol::Progressive,
            "hls" => Protocol::Hls,
            // "encrypted-hls", "ctr-encrypted-hls", "cbc-encrypted-hls", ...
            _ => Protocol::EncryptedHls,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Codec {
    Mp3,
    Aac,
    Opus,
    Other,
}

impl Codec {
    /// Codec from a container mime type such as `audio/ogg; codecs="opus"`.
    pub fn from_mime(mime_type: &str) -> Self {
        let mime = mime_type.to_ascii_lowercase();
        if mime.contains("opus") {
            Codec::Opus
        } else if mime.starts_with("audio/mpeg") || mime.starts_with("audio/mp3") {
            Codec::Mp3
        } else if mime.starts_with("audio/mp4") || mime.starts_with("audio/aac") || mime.contains("mp4a") {
            Codec::Aac
        } else {
            Codec::Other
        }
    }

    /// Bitrate assumed when the preset does not spell one out.
    pub fn default_bitrate_kbps(self, tier: QualityTier) -> Option<u32> {
        match (self, tier) {
            (Codec::Mp3, _) => Some(128),
            (Codec::Aac, QualityTier::High) => Some(160),
            (Codec::Aac, QualityTier::Standard) => Some(96),
            (Codec::Opus, _) => Some(64),
            (Codec::Other, _) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum QualityTier {
    Standard,
    High,
}

impl QualityTier {
    /// "hq" is high, anything else ("sq", missing) is standard.
    pub fn from_soundcloud(quality: Option<&str>) -> Self {
        match quality {
            Some("hq") => QualityTier::High,
            _ => QualityTier::Standard,
        }
    }
}

/// Where the bytes of a candidate live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLocation {
    /// Media URL (progressive file or HLS manifest)
    Direct(Url),
    /// API URL that has to be exchanged for the media URL first
    Indirect(Url),
}

/// One way of getting the audio of a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCandidate {
    pub protocol: Protocol,
    pub codec: Codec,
    pub mime_type: String,
    pub bitrate_kbps: Option<u32>,
    pub tier: QualityTier,
    pub preset: Option<String>,
    pub location: StreamLocation,
}

impl StreamCandidate {
    /// Builds a candidate from the fields of a SoundCloud transcoding.
    ///
    /// The codec comes from the preset prefix ("mp3_0_0", "aac_160k",
    /// "opus_0_0") with the mime type as fallback; the bitrate from an explicit
    /// "<n>k" preset suffix, else the codec default for the tier.
    pub fn from_soundcloud_transcoding(
        preset: Option<&str>,
        quality: Option<&str>,
        protocol: &str,
        mime_type: &str,
        api_url: Url,
    ) -> Self {
        let tier = QualityTier::from_soundcloud(quality);
        let codec = preset
            .and_then(codec_from_preset)
            .unwrap_or_else(|| Codec::from_mime(mime_type));
        let bitrate_kbps = preset
            .and_then(bitrate_from_preset)
            .or_else(|| codec.default_bitrate_kbps(tier));

        Self {
            protocol: Protocol::from_soundcloud(protocol),
            codec,
            mime_type: mime_type.to_string(),
            bitrate_kbps,
            tier,
            preset: preset.map(str::to_string),
            location: StreamLocation::Indirect(api_url),
        }
    }
}

fn codec_from_preset(preset: &str) -> Option<Codec> {
    let prefix = preset.split('_').next()?.to_ascii_lowercase();
    match prefix.as_str() {
        "mp3" => Some(Codec::Mp3),
        "aac" => Some(Codec::Aac),
        "opus" => Some(Codec::Opus),
        _ => None,
    }
}

fn bitrate_from_preset(preset: &str) -> Option<u32> {
    let (_, kbps) = regex_captures!(r"_(\d+)k(?:_|$)", preset)?;
    kbps.parse().ok()
}

/// Weights of the scoring formula
/// `protocol bonus + bitrate * bitrate_weight + tier bonus`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub progressive_bonus: f64,
    pub hls_bonus: f64,
    pub bitrate_weight: f64,
    pub high_tier_bonus: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            progressive_bonus: 10.0,
            hls_bonus: 0.0,
            bitrate_weight: 0.5,
            high_tier_bonus: 20.0,
        }
    }
}

/// Picks the best stream among the candidates of one track.
#[derive(Debug, Clone)]
pub struct StreamSelector {
    weights: ScoringWeights,
    allowed_codecs: Vec<Codec>,
}

impl Default for StreamSelector {
    fn default() -> Self {
        Self::new(ScoringWeights::default(), vec![Codec::Mp3, Codec::Aac])
    }
}

impl StreamSelector {
    pub fn new(weights: ScoringWeights, allowed_codecs: Vec<Codec>) -> Self {
        Self { weights, allowed_codecs }
    }

    /// Score of a candidate, `None` when it is not playable at all.
    pub fn score(&self, candidate: &StreamCandidate) -> Option<f64> {
        let protocol_bonus = match candidate.protocol {
            Protocol::Progressive => self.weights.progressive_bonus,
            Protocol::Hls => self.weights.hls_bonus,
            Protocol::EncryptedHls => return None,
        };
        if !self.allowed_codecs.contains(&candidate.codec) {
            return None;
        }

        let bitrate = f64::from(candidate.bitrate_kbps.unwrap_or(0)) * self.weights.bitrate_weight;
        let tier_bonus = match candidate.tier {
            QualityTier::High => self.weights.high_tier_bonus,
            QualityTier::Standard => 0.0,
        };
        Some(protocol_bonus + bitrate + tier_bonus)
    }

    /// All playable candidates, best first. Equal scores keep declaration order.
    pub fn rank<'a>(&self, candidates: &'a [StreamCandidate]) -> Vec<(&'a StreamCandidate, f64)> {
        candidates
            .iter()
            .filter_map(|c| self.score(c).map(|score| (c, score)))
            .sorted_by(|a, b| b.1.total_cmp(&a.1))
            .collect()
    }

    /// The single best candidate.
    pub fn select<'a>(&self, candidates: &'a [StreamCandidate]) -> Result<&'a StreamCandidate, DownloadError> {
        self.rank(candidates)
            .into_iter()
            .next()
            .map(|(candidate, _)| candidate)
            .ok_or(DownloadError::NoPlayableStream {
                candidates: candidates.len(),
            })
    }
}
