//! Inline mode: search results and chosen results

use teloxide::prelude::*;
use teloxide::types::{
    ChosenInlineResult, InlineKeyboardButton, InlineKeyboardMarkup, InlineQuery, InlineQueryResult,
    InlineQueryResultArticle, InputMessageContent, InputMessageContentText, ParseMode,
};

use super::requests::deliver;
use super::types::{inline_result_id, track_id_from_result_id, HandlerDeps, HandlerError};
use crate::core::types::TrackReference;
use crate::source::SourceError;
use crate::telegram::captions;
use crate::telegram::reconciler::DeliveryTarget;
use crate::telegram::transport::MessageHandle;
use crate::telegram::Bot;

fn article(track: &TrackReference, result_id: String) -> InlineQueryResult {
    let content = InputMessageContent::Text(
        InputMessageContentText::new(captions::inline_article(track)).parse_mode(ParseMode::Html),
    );
    // without a keyboard Telegram reports no inline_message_id for the chosen result
    let keyboard = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url(
        "♫ Open on SoundCloud",
        track.url().clone(),
    )]]);

    let mut article = InlineQueryResultArticle::new(result_id, track.display_name(), content)
        .description(captions::inline_description(track))
        .reply_markup(keyboard);
    if let Some(artwork) = track.artwork_url() {
        article = article.thumbnail_url(artwork.clone());
    }
    InlineQueryResult::Article(article)
}

pub(super) async fn handle_inline_query(bot: &Bot, deps: &HandlerDeps, query: InlineQuery) -> Result<(), HandlerError> {
    let text = query.query.trim().to_string();
    if text.is_empty() {
        bot.answer_inline_query(query.id, Vec::<InlineQueryResult>::new()).await?;
        return Ok(());
    }

    let tracks = match deps.inline_search.search(query.from.id, &text).await {
        // the user kept typing; a newer query will be answered
        None => return Ok(()),
        Some(Ok(tracks)) => tracks,
        Some(Err(e)) => {
            log::info!("Inline query {:?} found nothing: {}", text, e);
            Vec::new()
        }
    };

    let mut results = Vec::with_capacity(tracks.len());
    for (index, track) in tracks.into_iter().enumerate() {
        let result_id = inline_result_id(&track, index);
        results.push(article(&track, result_id.clone()));
        deps.inline_tracks.insert(result_id, track).await;
    }

    log::debug!("Answering inline query {:?} with {} result(s)", text, results.len());
    bot.answer_inline_query(query.id, results).await?;
    Ok(())
}

async fn chosen_track(deps: &HandlerDeps, result_id: &str) -> Result<TrackReference, SourceError> {
    if let Some(track) = deps.inline_tracks.get(result_id).await {
        return Ok(track);
    }
    let track_id = track_id_from_result_id(result_id)
        .ok_or_else(|| SourceError::Decode(format!("unexpected inline result id {:?}", result_id)))?;
    deps.soundcloud.track_by_id(track_id).await
}

pub(super) async fn handle_chosen_result(bot: &Bot, deps: &HandlerDeps, chosen: ChosenInlineResult) {
    let result_id = chosen.result_id.to_string();
    let Some(inline_message_id) = chosen.inline_message_id.as_ref().map(ToString::to_string) else {
        log::warn!("Chosen inline result {} carries no inline message id", result_id);
        return;
    };

    let track = match chosen_track(deps, &result_id).await {
        Ok(track) => track,
        Err(e) => {
            log::warn!("Could not recover the track of inline result {}: {}", result_id, e);
            let notice = captions::failure_notice(&chosen.query, None, false);
            if let Err(e) = bot
                .edit_message_text_inline(inline_message_id, notice)
                .parse_mode(ParseMode::Html)
                .await
            {
                log::debug!("Failed to post failure notice for inline result {}: {}", result_id, e);
            }
            return;
        }
    };

    let target = DeliveryTarget::Existing(MessageHandle::Inline { inline_message_id });
    deliver(deps, &chosen.query, track, target).await;
}
