//! Integration tests for HLS/direct fetching and the track pipeline
//!
//! Run with: cargo test --test download_pipeline_test

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{fmp4, init_test_logger, media_playlist, mp3, test_client, track, wav, wav_chunks, FixedProvider};
use pretty_assertions::assert_eq;
use soundgrab::core::retry::RetryConfig;
use soundgrab::download::direct::DirectFetcher;
use soundgrab::download::hls::SegmentFetcher;
use soundgrab::download::{
    AudioFormat, DownloadError, FileValidator, InvalidReason, StreamCandidate, StreamSelector, TrackPipeline,
};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MAX_BYTES: u64 = 16 * 1024 * 1024;

/// Serves `audio` as an HLS stream of `segments` parts under `/hls/`.
async fn mount_hls(server: &MockServer, audio: &[u8], segments: usize, segment_secs: f64) {
    Mock::given(method("GET"))
        .and(path("/hls/playlist.m3u8"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/vnd.apple.mpegurl")
                .set_body_string(media_playlist(segments, segment_secs)),
        )
        .mount(server)
        .await;

    for (i, chunk) in wav_chunks(audio, segments).into_iter().enumerate() {
        Mock::given(method("GET"))
            .and(path(format!("/hls/seg{}.ts", i)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(chunk))
            .mount(server)
            .await;
    }
}

/// Serves an fMP4 stream under `/hls/`: `init.mp4` through `EXT-X-MAP`,
/// then `seg0.m4s`, `seg1.m4s`, ...
async fn mount_fmp4_hls(server: &MockServer, seconds: f64, segments: usize) {
    let (init, media) = fmp4(seconds, segments);
    let segment_secs = seconds / segments as f64;

    let mut playlist = format!(
        "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:{}\n#EXT-X-MEDIA-SEQUENCE:0\n\
         #EXT-X-MAP:URI=\"init.mp4\"\n",
        segment_secs.ceil() as u64
    );
    for i in 0..segments {
        playlist.push_str(&format!("#EXTINF:{:.3},\nseg{}.m4s\n", segment_secs, i));
    }
    playlist.push_str("#EXT-X-ENDLIST\n");

    Mock::given(method("GET"))
        .and(path("/hls/playlist.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(playlist))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hls/init.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(init))
        .expect(1)
        .mount(server)
        .await;
    for (i, segment) in media.into_iter().enumerate() {
        Mock::given(method("GET"))
            .and(path(format!("/hls/seg{}.m4s", i)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(segment))
            .expect(1)
            .mount(server)
            .await;
    }
}

fn joined(init: Vec<u8>, segments: Vec<Vec<u8>>) -> Vec<u8> {
    std::iter::once(init).chain(segments).flatten().collect()
}

fn manifest_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}/hls/playlist.m3u8", server.uri())).unwrap()
}

fn pipeline(provider: FixedProvider, retry: RetryConfig) -> TrackPipeline {
    let client = test_client();
    TrackPipeline::new(
        Arc::new(provider),
        StreamSelector::default(),
        SegmentFetcher::new(client.clone(), retry.clone(), 4, MAX_BYTES),
        DirectFetcher::new(client, retry, MAX_BYTES),
        FileValidator::default(),
    )
}

fn candidate(protocol: &str) -> StreamCandidate {
    StreamCandidate::from_soundcloud_transcoding(
        Some("mp3_0_0"),
        Some("sq"),
        protocol,
        "audio/mpeg",
        Url::parse("https://api-v2.soundcloud.com/media/soundcloud:tracks:1/abc/stream").unwrap(),
    )
}

// ============================================================================
// HLS Segment Fetcher Tests
// ============================================================================

#[tokio::test]
async fn test_segments_are_joined_in_manifest_order() {
    init_test_logger();
    let server = MockServer::start().await;
    let audio = wav(10.0, 8_000);

    Mock::given(method("GET"))
        .and(path("/hls/playlist.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(media_playlist(5, 2.0)))
        .mount(&server)
        .await;
    // later segments answer first
    for (i, chunk) in wav_chunks(&audio, 5).into_iter().enumerate() {
        let delay = Duration::from_millis(60 * (5 - i as u64));
        Mock::given(method("GET"))
            .and(path(format!("/hls/seg{}.ts", i)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(chunk).set_delay(delay))
            .expect(1)
            .mount(&server)
            .await;
    }

    let fetcher = SegmentFetcher::new(test_client(), RetryConfig::immediate(0), 5, MAX_BYTES);
    let bytes = fetcher.fetch(&manifest_url(&server)).await.unwrap();

    assert_eq!(bytes.len(), audio.len());
    assert!(bytes == Bytes::from(audio));

    let validated = FileValidator::default().validate(bytes, None).unwrap();
    assert!((validated.duration().as_secs_f64() - 10.0).abs() < 0.1);
}

#[tokio::test]
async fn test_failing_segment_fails_the_whole_download() {
    init_test_logger();
    let server = MockServer::start().await;
    let audio = wav(5.0, 8_000);

    Mock::given(method("GET"))
        .and(path("/hls/playlist.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(media_playlist(5, 1.0)))
        .mount(&server)
        .await;
    for (i, chunk) in wav_chunks(&audio, 5).into_iter().enumerate() {
        let response = if i == 2 {
            ResponseTemplate::new(500)
        } else {
            ResponseTemplate::new(200).set_body_bytes(chunk)
        };
        let mock = Mock::given(method("GET"))
            .and(path(format!("/hls/seg{}.ts", i)))
            .respond_with(response);
        // the third segment is tried once plus two retries
        let mock = if i == 2 { mock.expect(3) } else { mock };
        mock.mount(&server).await;
    }

    let fetcher = SegmentFetcher::new(test_client(), RetryConfig::immediate(2), 2, MAX_BYTES);
    let err = fetcher.fetch(&manifest_url(&server)).await.unwrap_err();

    match err {
        DownloadError::SegmentFetch {
            segment,
            attempts,
            retryable,
            ..
        } => {
            assert_eq!(segment, Some(2));
            assert_eq!(attempts, 3);
            assert!(retryable);
        }
        other => panic!("expected a segment failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_manifest_is_a_segment_fetch_error_without_index() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = SegmentFetcher::new(test_client(), RetryConfig::immediate(3), 2, MAX_BYTES);
    let err = fetcher.fetch(&manifest_url(&server)).await.unwrap_err();
    assert!(matches!(
        err,
        DownloadError::SegmentFetch {
            segment: None,
            retryable: false,
            ..
        }
    ));
}

#[tokio::test]
async fn test_size_cap_applies_to_the_joined_stream() {
    let server = MockServer::start().await;
    mount_hls(&server, &wav(4.0, 8_000), 4, 1.0).await;

    // every segment fits, all four together do not
    let fetcher = SegmentFetcher::new(test_client(), RetryConfig::immediate(0), 1, 40_000);
    let err = fetcher.fetch(&manifest_url(&server)).await.unwrap_err();
    assert_eq!(err, DownloadError::TooLarge { limit: 40_000 });
}

// ============================================================================
// Track Pipeline Tests
// ============================================================================

#[tokio::test]
async fn test_pipeline_without_candidates_fails_before_any_request() {
    let provider = FixedProvider {
        candidates: Vec::new(),
        media_url: Url::parse("http://127.0.0.1:9/unused").unwrap(),
    };

    let err = pipeline(provider, RetryConfig::immediate(0))
        .fetch(&track("1", Some(205)))
        .await
        .unwrap_err();
    assert_eq!(err, DownloadError::NoPlayableStream { candidates: 0 });
}

#[tokio::test]
async fn test_pipeline_fetches_and_validates_hls_track() {
    init_test_logger();
    let server = MockServer::start().await;
    mount_hls(&server, &wav(205.0, 8_000), 5, 41.0).await;

    let provider = FixedProvider {
        candidates: vec![candidate("hls")],
        media_url: manifest_url(&server),
    };
    let audio = pipeline(provider, RetryConfig::immediate(1))
        .fetch(&track("205", Some(205)))
        .await
        .unwrap();

    assert!((audio.duration().as_secs_f64() - 205.0).abs() < 1.0);
    assert_eq!(audio.format().extension(), "wav");
}

#[tokio::test]
async fn test_pipeline_fetches_progressive_track() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/track.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(wav(205.0, 8_000)))
        .expect(1)
        .mount(&server)
        .await;

    let provider = FixedProvider {
        candidates: vec![candidate("hls"), candidate("progressive")],
        media_url: Url::parse(&format!("{}/media/track.mp3", server.uri())).unwrap(),
    };
    let audio = pipeline(provider, RetryConfig::immediate(0))
        .fetch(&track("2", Some(205)))
        .await
        .unwrap();

    assert!((audio.duration().as_secs_f64() - 205.0).abs() < 1.0);
}

#[tokio::test]
async fn test_pipeline_segment_failure_skips_validation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hls/playlist.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(media_playlist(5, 1.0)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hls/seg2.ts"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]))
        .mount(&server)
        .await;

    let provider = FixedProvider {
        candidates: vec![candidate("hls")],
        media_url: manifest_url(&server),
    };
    let err = pipeline(provider, RetryConfig::immediate(2))
        .fetch(&track("3", Some(5)))
        .await
        .unwrap_err();

    assert!(
        matches!(err, DownloadError::SegmentFetch { segment: Some(2), .. }),
        "unexpected error: {:?}",
        err
    );
}

#[tokio::test]
async fn test_pipeline_rejects_duration_mismatch() {
    let server = MockServer::start().await;
    mount_hls(&server, &wav(30.0, 8_000), 3, 10.0).await;

    let provider = FixedProvider {
        candidates: vec![candidate("hls")],
        media_url: manifest_url(&server),
    };
    // metadata says 3:25, the stream is a 30 second preview
    let err = pipeline(provider, RetryConfig::immediate(0))
        .fetch(&track("4", Some(205)))
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::ValidationFailed { .. }), "unexpected error: {:?}", err);
}

#[tokio::test]
async fn test_pipeline_fetches_fmp4_hls_track() {
    init_test_logger();
    let server = MockServer::start().await;
    mount_fmp4_hls(&server, 36.0, 4).await;

    let aac = StreamCandidate::from_soundcloud_transcoding(
        Some("aac_160k"),
        Some("hq"),
        "hls",
        "audio/mp4; codecs=\"mp4a.40.2\"",
        Url::parse("https://api-v2.soundcloud.com/media/soundcloud:tracks:6/def/stream").unwrap(),
    );
    let provider = FixedProvider {
        candidates: vec![aac],
        media_url: manifest_url(&server),
    };
    let audio = pipeline(provider, RetryConfig::immediate(0))
        .fetch(&track("6", Some(36)))
        .await
        .unwrap();

    assert_eq!(audio.format(), AudioFormat::Mp4);
    assert!((audio.duration().as_secs_f64() - 36.0).abs() < 0.1);
}

#[tokio::test]
async fn test_pipeline_fetches_progressive_mp3() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/track.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(mp3(45.0)))
        .mount(&server)
        .await;

    let provider = FixedProvider {
        candidates: vec![candidate("progressive")],
        media_url: Url::parse(&format!("{}/media/track.mp3", server.uri())).unwrap(),
    };
    let audio = pipeline(provider, RetryConfig::immediate(0))
        .fetch(&track("7", Some(45)))
        .await
        .unwrap();

    assert_eq!(audio.format(), AudioFormat::Mp3);
    assert_eq!(audio.format().mime_type(), "audio/mpeg");
}

// ============================================================================
// Container Validation Tests
// ============================================================================

#[test]
fn test_mp3_duration_comes_from_its_frames() {
    init_test_logger();
    let audio = FileValidator::default()
        .validate(Bytes::from(mp3(30.0)), Some(Duration::from_secs(30)))
        .unwrap();

    assert_eq!(audio.format(), AudioFormat::Mp3);
    assert!((audio.duration().as_secs_f64() - 30.0).abs() < 0.1);
}

#[test]
fn test_truncated_mp3_is_rejected() {
    let data = mp3(30.0);
    // cut mid-frame, half the frames the Xing header announces are gone
    let cut = Bytes::copy_from_slice(&data[..data.len() / 2 + 7]);

    let reason = FileValidator::default().validate(cut, None).unwrap_err();
    assert!(
        matches!(reason, InvalidReason::Truncated | InvalidReason::UnparsableHeader),
        "unexpected reason: {:?}",
        reason
    );
}

#[test]
fn test_fmp4_init_and_segments_validate_as_one_stream() {
    let (init, segments) = fmp4(12.0, 3);

    let audio = FileValidator::default()
        .validate(Bytes::from(joined(init, segments)), Some(Duration::from_secs(12)))
        .unwrap();

    assert_eq!(audio.format(), AudioFormat::Mp4);
    assert!((audio.duration().as_secs_f64() - 12.0).abs() < 0.1);
}

#[test]
fn test_fmp4_segments_without_init_are_unparsable() {
    let (_, segments) = fmp4(12.0, 3);
    let media: Vec<u8> = segments.into_iter().flatten().collect();

    assert_eq!(
        FileValidator::default().validate(Bytes::from(media), None),
        Err(InvalidReason::UnparsableHeader)
    );
}

#[test]
fn test_truncated_fmp4_is_rejected() {
    let (init, segments) = fmp4(60.0, 3);
    let mut data = joined(init, segments);
    data.truncate(data.len() / 2);

    let reason = FileValidator::default().validate(Bytes::from(data), None).unwrap_err();
    assert!(
        matches!(reason, InvalidReason::Truncated | InvalidReason::UnparsableHeader),
        "unexpected reason: {:?}",
        reason
    );
}
