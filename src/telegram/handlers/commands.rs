//! Command handler implementations (/start, /help)

use teloxide::prelude::*;
use teloxide::types::{Message, ParseMode};

use super::types::{HandlerDeps, HandlerError};
use crate::telegram::Bot;

const HELP_TEXT: &str = "🎧 <b>Send me a SoundCloud or Spotify track link</b>, or just the name of a song, \
and I'll send the audio back.\n\n\
Playlists and sets work too (up to 50 tracks).\n\n\
In any chat, type <code>@{bot} song name</code> to search inline.";

fn help_text(deps: &HandlerDeps) -> String {
    HELP_TEXT.replace("{bot}", deps.bot_username.as_deref().unwrap_or("this_bot"))
}

/// Handle /start command
pub(super) async fn handle_start_command(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    log::info!("/start from chat {}", msg.chat.id);
    let greeting = match msg.from.as_ref() {
        Some(user) => format!("👋 Hi, {}!\n\n{}", crate::telegram::captions::escape_html(&user.first_name), help_text(deps)),
        None => help_text(deps),
    };
    bot.send_message(msg.chat.id, greeting).parse_mode(ParseMode::Html).await?;
    Ok(())
}

/// Handle /help command
pub(super) async fn handle_help_command(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    bot.send_message(msg.chat.id, help_text(deps))
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}
