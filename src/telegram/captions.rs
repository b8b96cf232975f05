//! User-facing message texts (Telegram HTML).

use crate::core::types::{format_duration, TrackReference};
use crate::download::validate::AudioFormat;
use crate::source::SourceError;

/// Escapes `&`, `<`, `>` and quotes for HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Breaks auto-linking of URLs shown as plain text.
pub fn no_embed(text: &str) -> String {
    text.replace("://", ":/\u{200c}/")
}

fn track_link(track: &TrackReference) -> String {
    let name = if track.artist().is_empty() {
        format!("<b>{}</b>", escape_html(track.title()))
    } else {
        format!(
            "<b>{}</b> - <b>{}</b>",
            escape_html(track.title()),
            escape_html(track.artist())
        )
    };
    format!("♫ <a href=\"{}\">{}</a>", escape_html(track.url().as_str()), name)
}

/// Caption attached to the delivered audio.
pub fn track_caption(track: &TrackReference) -> String {
    match track.duration_secs() {
        Some(secs) => format!("{} · {}", track_link(track), format_duration(secs)),
        None => track_link(track),
    }
}

/// Text of the provisional message.
pub fn placeholder(track: &TrackReference) -> String {
    format!("⏳ <i>Downloading…</i>\n\n{}", track_link(track))
}

/// Text shown while a query is still being resolved.
pub fn searching(query: &str) -> String {
    format!("🔎 <i>Searching…</i>\n\n{}", query_line(query))
}

fn query_line(query: &str) -> String {
    format!("<b>Query:</b> <code>{}</code>", escape_html(&no_embed(query)))
}

/// Failure notice. Always carries the original query or link.
pub fn failure_notice(query: &str, track: Option<&TrackReference>, access: bool) -> String {
    let headline = if access {
        "❌ <b>I can't message you yet. Open a chat with me and press /start, then try again.</b>"
    } else {
        "❌ <b>Could not download this track. Please try again later.</b>"
    };
    match track {
        Some(track) => format!("{}\n\n{}\n{}", headline, track_link(track), query_line(query)),
        None => format!("{}\n\n{}", headline, query_line(query)),
    }
}

/// Notice for input that did not resolve to a track.
pub fn resolve_failure(query: &str, err: &SourceError) -> String {
    let headline = match err {
        SourceError::NotFound(_) => "🤷 <b>Nothing found.</b>",
        SourceError::AmbiguousQuery(_) => "🤔 <b>Please be more specific.</b>",
        SourceError::Unsupported(_) => "❌ <b>Only SoundCloud and Spotify track links are supported.</b>",
        SourceError::RateLimited { .. } => "⏳ <b>Too many requests right now. Please try again in a minute.</b>",
        SourceError::Unauthorized | SourceError::Http(_) | SourceError::Decode(_) => {
            "❌ <b>Could not look this up. Please try again later.</b>"
        }
    };
    format!("{}\n\n{}", headline, query_line(query))
}

/// Header posted before the tracks of a playlist.
pub fn playlist_header(title: &str, count: usize, query: &str) -> String {
    format!(
        "📃 <b>{}</b>: {} track(s)\n\n{}",
        escape_html(title),
        count,
        query_line(query)
    )
}

/// Text of an inline search result before the audio arrives.
pub fn inline_article(track: &TrackReference) -> String {
    placeholder(track)
}

/// Description line of an inline search result.
pub fn inline_description(track: &TrackReference) -> String {
    match track.duration_secs() {
        Some(secs) => format!("{} · {}", track.artist(), format_duration(secs)),
        None => track.artist().to_string(),
    }
}

/// "Artist - Title.ext" with path separators and control characters removed.
pub fn file_name(track: &TrackReference, format: AudioFormat) -> String {
    let stem: String = track
        .display_name()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let stem = stem.trim();
    let stem = if stem.is_empty() { "track" } else { stem };
    format!("{}.{}", stem, format.extension())
}
