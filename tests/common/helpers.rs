//! Builders for tracks, audio and manifests

#![allow(dead_code)]

use std::time::Duration;

use reqwest::Client;
use soundgrab::download::http;
use soundgrab::{Platform, TrackReference};
use url::Url;

/// Routes `log` output to the test harness; later calls are no-ops.
pub fn init_test_logger() {
    let _ = simplelog::TestLogger::init(simplelog::LevelFilter::Debug, simplelog::Config::default());
}

pub fn test_client() -> Client {
    http::build_client(Duration::from_secs(10)).unwrap()
}

/// SoundCloud track with a known duration.
pub fn track(id: &str, duration_secs: Option<u32>) -> TrackReference {
    TrackReference::builder()
        .platform(Platform::SoundCloud)
        .id(id)
        .url(Url::parse(&format!("https://soundcloud.com/artist/track-{}", id)).unwrap())
        .title(format!("Track {}", id))
        .artist("Test Artist")
        .maybe_duration_secs(duration_secs)
        .build()
}

/// 16-bit mono PCM WAV holding a square wave.
pub fn wav(seconds: f64, sample_rate: u32) -> Vec<u8> {
    let samples = (seconds * f64::from(sample_rate)) as u32;
    let data_len = samples * 2;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..samples {
        let sample: i16 = if (i / 20) % 2 == 0 { 8000 } else { -8000 };
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// MPEG-1 Layer III frame header: 32 kbps, 48 kHz, mono, no CRC.
const MP3_HEADER: [u8; 4] = [0xFF, 0xFB, 0x14, 0xC4];
const MP3_FRAME_LEN: usize = 96;
const MP3_FRAME_SAMPLES: f64 = 1152.0;
/// Side info of a mono MPEG-1 frame precedes the Xing tag
const MP3_SIDE_INFO_LEN: usize = 17;

/// CBR MP3 of silent frames led by a Xing frame that declares the frame count.
pub fn mp3(seconds: f64) -> Vec<u8> {
    let frames = (seconds * 48_000.0 / MP3_FRAME_SAMPLES).round() as u32;
    let mut out = Vec::with_capacity((frames as usize + 1) * MP3_FRAME_LEN);

    let mut xing = vec![0u8; MP3_FRAME_LEN];
    let tag = 4 + MP3_SIDE_INFO_LEN;
    xing[..4].copy_from_slice(&MP3_HEADER);
    xing[tag..tag + 4].copy_from_slice(b"Xing");
    // flags: frame count present
    xing[tag + 4..tag + 8].copy_from_slice(&1u32.to_be_bytes());
    xing[tag + 8..tag + 12].copy_from_slice(&frames.to_be_bytes());
    out.extend_from_slice(&xing);

    for _ in 0..frames {
        out.extend_from_slice(&MP3_HEADER);
        out.resize(out.len() + MP3_FRAME_LEN - 4, 0);
    }
    out
}

const FMP4_RATE: u32 = 48_000;
const AAC_FRAME_SAMPLES: u32 = 1024;
const AAC_FRAME_LEN: usize = 24;

fn mp4_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(&(8 + body.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

fn mp4_full_box(kind: &[u8; 4], version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + body.len());
    payload.push(version);
    payload.extend_from_slice(&flags.to_be_bytes()[1..]);
    payload.extend_from_slice(body);
    mp4_box(kind, &payload)
}

fn be(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

/// Fragmented MP4 (AAC-LC, 48 kHz mono) as an init segment plus `segments`
/// media segments of silent frames, the way HLS serves `EXT-X-MAP` streams.
pub fn fmp4(seconds: f64, segments: usize) -> (Vec<u8>, Vec<Vec<u8>>) {
    let frames = (seconds * f64::from(FMP4_RATE) / f64::from(AAC_FRAME_SAMPLES)).round() as u32;
    let per_segment = frames / segments as u32;

    let mut media = Vec::with_capacity(segments);
    let mut decode_time = 0u64;
    for i in 0..segments {
        let count = if i + 1 == segments {
            frames - per_segment * (segments as u32 - 1)
        } else {
            per_segment
        };
        media.push(fmp4_segment(i as u32 + 1, decode_time, count));
        decode_time += u64::from(count * AAC_FRAME_SAMPLES);
    }
    (fmp4_init(u64::from(frames * AAC_FRAME_SAMPLES)), media)
}

fn fmp4_init(duration: u64) -> Vec<u8> {
    let ftyp = mp4_box(b"ftyp", b"iso6\0\0\0\0iso6mp41");

    let mut mvhd = be(&[0, 0, FMP4_RATE, duration as u32, 0x0001_0000]);
    mvhd.extend_from_slice(&[0x01, 0x00]);
    mvhd.resize(92, 0);
    mvhd.extend_from_slice(&2u32.to_be_bytes());
    let mvhd = mp4_full_box(b"mvhd", 0, 0, &mvhd);

    let mut tkhd = be(&[0, 0, 1, 0, duration as u32, 0, 0]);
    tkhd.extend_from_slice(&[0, 0, 0, 0, 0x01, 0x00, 0, 0]);
    tkhd.resize(80, 0);
    let tkhd = mp4_full_box(b"tkhd", 0, 3, &tkhd);

    let mut mdhd = be(&[0, 0, FMP4_RATE, duration as u32]);
    // "und", no predefined
    mdhd.extend_from_slice(&[0x55, 0xC4, 0, 0]);
    let mdhd = mp4_full_box(b"mdhd", 0, 0, &mdhd);

    let mut hdlr = be(&[0]);
    hdlr.extend_from_slice(b"soun");
    hdlr.extend_from_slice(&[0; 12]);
    hdlr.extend_from_slice(b"SoundHandler\0");
    let hdlr = mp4_full_box(b"hdlr", 0, 0, &hdlr);

    let smhd = mp4_full_box(b"smhd", 0, 0, &[0; 4]);
    let dref = mp4_full_box(b"dref", 0, 0, &[be(&[1]), mp4_full_box(b"url ", 0, 1, &[])].concat());
    let dinf = mp4_box(b"dinf", &dref);
    let stbl = mp4_box(
        b"stbl",
        &[
            stsd_mp4a(),
            mp4_full_box(b"stts", 0, 0, &be(&[0])),
            mp4_full_box(b"stsc", 0, 0, &be(&[0])),
            mp4_full_box(b"stsz", 0, 0, &be(&[0, 0])),
            mp4_full_box(b"stco", 0, 0, &be(&[0])),
        ]
        .concat(),
    );
    let minf = mp4_box(b"minf", &[smhd, dinf, stbl].concat());
    let mdia = mp4_box(b"mdia", &[mdhd, hdlr, minf].concat());
    let trak = mp4_box(b"trak", &[tkhd, mdia].concat());

    // track 1, sample description 1, 1024-sample frames
    let trex = mp4_full_box(b"trex", 0, 0, &be(&[1, 1, AAC_FRAME_SAMPLES, 0, 0]));
    let mvex = mp4_box(b"mvex", &trex);

    [ftyp, mp4_box(b"moov", &[mvhd, trak, mvex].concat())].concat()
}

fn stsd_mp4a() -> Vec<u8> {
    // ES descriptor > decoder config (AAC, audio stream) > AudioSpecificConfig, SL config
    let asc = [0x05, 0x02, 0x11, 0x88];
    let mut dec_config = vec![0x04, 13 + asc.len() as u8, 0x40, 0x15, 0, 0, 0];
    dec_config.extend_from_slice(&be(&[128_000, 128_000]));
    dec_config.extend_from_slice(&asc);
    let sl_config = [0x06, 0x01, 0x02];
    let mut es = vec![0x03, (3 + dec_config.len() + sl_config.len()) as u8, 0x00, 0x01, 0x00];
    es.extend_from_slice(&dec_config);
    es.extend_from_slice(&sl_config);
    let esds = mp4_full_box(b"esds", 0, 0, &es);

    let mut mp4a = vec![0u8; 6];
    // data reference 1, sound entry version 0, reserved
    mp4a.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0, 0, 0]);
    // mono, 16 bit, no compression id or packet size
    mp4a.extend_from_slice(&[0, 1, 0, 16, 0, 0, 0, 0]);
    mp4a.extend_from_slice(&(FMP4_RATE << 16).to_be_bytes());
    mp4a.extend_from_slice(&esds);

    mp4_full_box(b"stsd", 0, 0, &[be(&[1]), mp4_box(b"mp4a", &mp4a)].concat())
}

fn fmp4_segment(sequence: u32, decode_time: u64, frames: u32) -> Vec<u8> {
    let moof = |data_offset: u32| {
        let mfhd = mp4_full_box(b"mfhd", 0, 0, &be(&[sequence]));
        // default-base-is-moof
        let tfhd = mp4_full_box(b"tfhd", 0, 0x02_0000, &be(&[1]));
        let tfdt = mp4_full_box(b"tfdt", 1, 0, &decode_time.to_be_bytes());
        let mut run = be(&[frames, data_offset]);
        run.extend(be(&vec![AAC_FRAME_LEN as u32; frames as usize]));
        // data offset and per-sample sizes present
        let trun = mp4_full_box(b"trun", 0, 0x0201, &run);
        mp4_box(b"moof", &[mfhd, mp4_box(b"traf", &[tfhd, tfdt, trun].concat())].concat())
    };
    let size = moof(0).len() as u32;
    let mdat = mp4_box(b"mdat", &vec![0u8; AAC_FRAME_LEN * frames as usize]);
    [moof(size + 8), mdat].concat()
}

/// Splits `data` into `parts` contiguous chunks (the last one takes the rest).
pub fn wav_chunks(data: &[u8], parts: usize) -> Vec<Vec<u8>> {
    let size = data.len() / parts;
    (0..parts)
        .map(|i| {
            let end = if i + 1 == parts { data.len() } else { (i + 1) * size };
            data[i * size..end].to_vec()
        })
        .collect()
}

/// VOD media playlist with `segments` relative URIs `seg0.ts`, `seg1.ts`, ...
pub fn media_playlist(segments: usize, segment_secs: f64) -> String {
    let mut out = format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:{}\n#EXT-X-MEDIA-SEQUENCE:0\n",
        segment_secs.ceil() as u64
    );
    for i in 0..segments {
        out.push_str(&format!("#EXTINF:{:.3},\nseg{}.ts\n", segment_secs, i));
    }
    out.push_str("#EXT-X-ENDLIST\n");
    out
}
