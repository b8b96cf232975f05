//! Dispatcher schema and handler chain builders

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::{ChosenInlineResult, InlineQuery, Message};

use super::commands::{handle_help_command, handle_start_command};
use super::inline::{handle_chosen_result, handle_inline_query};
use super::requests::{handle_query, request_queries};
use super::types::{HandlerDeps, HandlerError};
use crate::telegram::bot::{is_message_addressed_to_bot, Command};
use crate::telegram::Bot;

/// Creates the main dispatcher schema for the Telegram bot.
///
/// This function returns a handler tree that can be used with teloxide's Dispatcher.
///
/// # Arguments
/// * `deps` - Handler dependencies (resolver, delivery reconciler, inline result cache)
///
/// # Returns
/// The complete handler tree for the bot
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    let deps_commands = deps.clone();
    let deps_messages = deps.clone();
    let deps_inline = deps.clone();
    let deps_chosen = deps;

    dptree::entry()
        .branch(command_handler(deps_commands))
        // Message handler for links and text
        .branch(message_handler(deps_messages))
        .branch(inline_query_handler(deps_inline))
        .branch(chosen_inline_result_handler(deps_chosen))
}

fn command_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message().branch(dptree::entry().filter_command::<Command>().endpoint(
        move |bot: Bot, msg: Message, cmd: Command| {
            let deps = deps.clone();
            async move {
                log::info!("🎯 Received command: {:?} from chat {}", cmd, msg.chat.id);

                match cmd {
                    Command::Start => handle_start_command(&bot, &msg, &deps).await?,
                    Command::Help => handle_help_command(&bot, &msg, &deps).await?,
                }
                Ok(())
            }
        },
    ))
}

fn message_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    let bot_username = deps.bot_username.clone();
    let bot_id = deps.bot_id;

    Update::filter_message()
        .filter(move |msg: Message| is_message_addressed_to_bot(&msg, bot_username.as_deref(), bot_id))
        .filter(|msg: Message| msg.text().is_some_and(|text| !text.starts_with('/')))
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                let text = msg.text().unwrap_or_default();
                let mention = deps.bot_username.as_deref().map(|name| format!("@{}", name));
                let text = match &mention {
                    Some(mention) => text.replace(mention.as_str(), " "),
                    None => text.to_string(),
                };

                let queries = request_queries(&text);
                let chat = msg.chat.id;
                log::info!("Chat {} sent {} request(s)", chat, queries.len());

                // Deliveries outlive the update; the dispatcher moves on right away
                tokio::spawn(async move {
                    for query in queries {
                        handle_query(&bot, &deps, chat, &query).await;
                    }
                });
                Ok(())
            }
        })
}

fn inline_query_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_inline_query().endpoint(move |bot: Bot, query: InlineQuery| {
        let deps = deps.clone();
        async move {
            // debouncing needs the next keystroke to arrive while this one waits
            tokio::spawn(async move {
                if let Err(e) = handle_inline_query(&bot, &deps, query).await {
                    log::warn!("Failed to answer inline query: {}", e);
                }
            });
            Ok(())
        }
    })
}

fn chosen_inline_result_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_chosen_inline_result().endpoint(move |bot: Bot, chosen: ChosenInlineResult| {
        let deps = deps.clone();
        async move {
            tokio::spawn(async move {
                handle_chosen_result(&bot, &deps, chosen).await;
            });
            Ok(())
        }
    })
}
