//! Text and link requests sent to the bot in a chat

use teloxide::prelude::*;
use teloxide::types::ParseMode;

use super::types::HandlerDeps;
use crate::core::types::TrackReference;
use crate::source::{extract_links, Resolved};
use crate::telegram::captions;
use crate::telegram::reconciler::{DeliveryRequest, DeliveryTarget};
use crate::telegram::transport::{MessageHandle, TransportError};
use crate::telegram::Bot;

/// Links beyond this many in one message are ignored
pub const MAX_QUERIES_PER_MESSAGE: usize = 5;

/// Splits a message into queries: every link it contains, or the whole text.
pub fn request_queries(text: &str) -> Vec<String> {
    let links = extract_links(text);
    if links.is_empty() {
        let text = text.trim();
        if text.is_empty() {
            Vec::new()
        } else {
            vec![text.to_string()]
        }
    } else {
        links
            .into_iter()
            .take(MAX_QUERIES_PER_MESSAGE)
            .map(String::from)
            .collect()
    }
}

/// Resolves one query and delivers whatever it resolved to.
///
/// A "searching" message goes out first and becomes the placeholder of the
/// resolved track.
pub(super) async fn handle_query(bot: &Bot, deps: &HandlerDeps, chat: ChatId, query: &str) {
    let searching = match bot
        .send_message(chat, captions::searching(query))
        .parse_mode(ParseMode::Html)
        .await
    {
        Ok(message) => message,
        Err(e) => {
            let err = TransportError::from_request(&e);
            if err.is_access() {
                log::info!("Cannot message chat {}: {}", chat, err);
            } else {
                log::warn!("Failed to acknowledge {:?} in chat {}: {}", query, chat, err);
            }
            return;
        }
    };
    let handle = MessageHandle::Chat {
        chat_id: chat,
        message_id: searching.id,
    };

    match deps.resolver.resolve(query).await {
        Ok(Resolved::Track(track)) => {
            deliver(deps, query, track, DeliveryTarget::Existing(handle)).await;
        }
        Ok(Resolved::Playlist { title, tracks }) => {
            log::info!("Delivering playlist {:?} ({} tracks) to chat {}", title, tracks.len(), chat);
            if let Err(e) = bot
                .edit_message_text(chat, searching.id, captions::playlist_header(&title, tracks.len(), query))
                .parse_mode(ParseMode::Html)
                .await
            {
                log::warn!("Failed to post playlist header for {:?}: {}", query, e);
            }
            // one at a time keeps the chat in playlist order
            for track in tracks {
                let report = deliver(deps, query, track, DeliveryTarget::Chat(chat)).await;
                if report.is_access_failure() {
                    break;
                }
            }
        }
        Err(e) => {
            log::info!("Could not resolve {:?}: {}", query, e);
            if let Err(e) = bot
                .edit_message_text(chat, searching.id, captions::resolve_failure(query, &e))
                .parse_mode(ParseMode::Html)
                .await
            {
                log::warn!("Failed to post resolve failure for {:?}: {}", query, e);
            }
        }
    }
}

pub(super) async fn deliver(
    deps: &HandlerDeps,
    query: &str,
    track: TrackReference,
    target: DeliveryTarget,
) -> crate::telegram::DeliveryReport {
    deps.reconciler
        .deliver(DeliveryRequest {
            query: query.to_string(),
            track,
            target,
        })
        .await
}
