//! Messaging transport: placeholders and their replacement.
//!
//! [`MessagingTransport`] is what the delivery reconciler talks to;
//! [`TelegramTransport`] implements it on the Bot API.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, InputMedia, InputMediaAudio, MessageId, ParseMode};
use teloxide::RequestError;
use thiserror::Error;
use url::Url;

use crate::core::config;
use crate::core::error::AppResult;
use crate::core::retry::{retry, RetryConfig};
use crate::download::http::build_client;
use crate::telegram::artwork::fetch_thumbnail;
use crate::telegram::Bot;

/// Where a placeholder lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageHandle {
    Chat { chat_id: ChatId, message_id: MessageId },
    /// Message created by Telegram for a chosen inline result
    Inline { inline_message_id: String },
}

/// Audio payload: a reusable file id or raw bytes to upload.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioPayload {
    FileId(String),
    Bytes { data: Bytes, file_name: String },
}

/// What a message should show. Text is HTML.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryContent {
    Text(String),
    Audio {
        payload: AudioPayload,
        caption: String,
        title: String,
        performer: String,
        duration_secs: Option<u32>,
        /// Cover art, attached as thumbnail when bytes are uploaded
        artwork: Option<Url>,
    },
}

/// Outcome of a successful update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// File id Telegram assigned to the delivered audio
    pub file_id: Option<String>,
}

/// Why the messaging platform refused a send or edit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The user blocked the bot, never started it, or the chat is gone
    #[error("no permission to message the user: {0}")]
    Permission(String),

    /// The placeholder no longer exists or can no longer be edited
    #[error("message expired: {0}")]
    Expired(String),

    /// A cached file id is not accepted any more
    #[error("stale file id: {0}")]
    StaleFile(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("network error: {0}")]
    Network(String),
}

const PERMISSION_PHRASES: &[&str] = &[
    "forbidden",
    "bot was blocked",
    "blocked by the user",
    "bot can't initiate conversation",
    "bot was kicked",
    "kicked by the user",
    "user is deactivated",
    "user is restricted",
    "user not found",
    "chat not found",
    "not enough rights",
    "chat write forbidden",
    "chat_write_forbidden",
    "have no rights to send",
    "access denied",
];

const EXPIRED_PHRASES: &[&str] = &[
    "message to edit not found",
    "message not found",
    "message can't be edited",
    "message_id_invalid",
    "message_id invalid",
];

const STALE_FILE_PHRASES: &[&str] = &[
    "wrong file identifier",
    "wrong remote file identifier",
    "file reference",
    "file_id_invalid",
    "failed to get http url content",
];

impl TransportError {
    /// Classifies an error description returned by the platform.
    pub fn classify(description: &str) -> Self {
        let lower = description.to_lowercase();
        let matches_any = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));

        if matches_any(PERMISSION_PHRASES) {
            TransportError::Permission(description.to_string())
        } else if matches_any(EXPIRED_PHRASES) {
            TransportError::Expired(description.to_string())
        } else if matches_any(STALE_FILE_PHRASES) {
            TransportError::StaleFile(description.to_string())
        } else {
            TransportError::Rejected(description.to_string())
        }
    }

    pub fn from_request(err: &RequestError) -> Self {
        match err {
            RequestError::Api(api) => Self::classify(&api.to_string()),
            RequestError::Network(e) => TransportError::Network(e.to_string()),
            RequestError::Io(e) => TransportError::Network(e.to_string()),
            RequestError::RetryAfter(after) => {
                TransportError::Network(format!("rate limited for {:?}", after.duration()))
            }
            other => TransportError::Rejected(other.to_string()),
        }
    }

    /// Access failures are the user's doing; everything else is ours.
    pub fn is_access(&self) -> bool {
        matches!(self, TransportError::Permission(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Permission(_) => "permission",
            TransportError::Expired(_) => "expired",
            TransportError::StaleFile(_) => "stale_file",
            TransportError::Rejected(_) => "rejected",
            TransportError::Network(_) => "network",
        }
    }
}

#[async_trait]
pub trait MessagingTransport: Send + Sync {
    /// Sends the provisional message.
    async fn send_placeholder(&self, chat: ChatId, content: &DeliveryContent) -> Result<MessageHandle, TransportError>;

    /// Replaces what `handle` shows with `content`.
    async fn update_message(
        &self,
        handle: &MessageHandle,
        content: &DeliveryContent,
    ) -> Result<DeliveryReceipt, TransportError>;
}

/// Bot API transport.
///
/// Inline messages cannot receive uploads, so audio bytes bound for an inline
/// message are first posted to the storage chat to mint a file id.
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
    http: Client,
    storage_chat: Option<ChatId>,
    retry: RetryConfig,
}

impl TelegramTransport {
    pub fn new(bot: Bot, storage_chat: Option<ChatId>) -> AppResult<Self> {
        Ok(Self {
            bot,
            http: build_client(config::network::api_timeout())?,
            storage_chat,
            retry: RetryConfig::default(),
        })
    }

    async fn send_audio(&self, chat: ChatId, content: &DeliveryContent) -> Result<Message, TransportError> {
        let DeliveryContent::Audio {
            payload,
            caption,
            title,
            performer,
            duration_secs,
            artwork,
        } = content
        else {
            return Err(TransportError::Rejected("not an audio payload".into()));
        };

        // a file id already carries its thumbnail
        let thumbnail = match (payload, artwork) {
            (AudioPayload::Bytes { .. }, Some(artwork)) => fetch_thumbnail(&self.http, artwork).await,
            _ => None,
        };
        let thumbnail = &thumbnail;

        let outcome = retry(&self.retry, || async move {
            let mut request = self
                .bot
                .send_audio(chat, input_file(payload))
                .caption(caption.clone())
                .parse_mode(ParseMode::Html)
                .title(title.clone())
                .performer(performer.clone());
            if let Some(secs) = duration_secs {
                request = request.duration(*secs);
            }
            if let Some(thumbnail) = thumbnail {
                request = request.thumbnail(InputFile::memory(thumbnail.to_vec()).file_name("thumbnail.jpg"));
            }
            request.await
        })
        .await;
        outcome.into_result().map_err(|e| TransportError::from_request(&e))
    }

    /// File id for an inline edit, uploading to the storage chat if needed.
    async fn file_id_for_inline(&self, content: &DeliveryContent) -> Result<String, TransportError> {
        let DeliveryContent::Audio { payload, .. } = content else {
            return Err(TransportError::Rejected("not an audio payload".into()));
        };
        if let AudioPayload::FileId(id) = payload {
            return Ok(id.clone());
        }

        let storage = self.storage_chat.ok_or_else(|| {
            TransportError::Rejected("STORAGE_CHAT_ID is required to deliver uploads into inline messages".into())
        })?;
        let message = self.send_audio(storage, content).await?;
        audio_file_id(&message).ok_or_else(|| TransportError::Rejected("storage upload returned no audio".into()))
    }
}

fn input_file(payload: &AudioPayload) -> InputFile {
    match payload {
        AudioPayload::FileId(id) => InputFile::file_id(FileId(id.clone())),
        AudioPayload::Bytes { data, file_name } => InputFile::memory(data.to_vec()).file_name(file_name.clone()),
    }
}

fn audio_file_id(message: &Message) -> Option<String> {
    message.audio().map(|a| a.file.id.0.clone())
}

#[async_trait]
impl MessagingTransport for TelegramTransport {
    async fn send_placeholder(&self, chat: ChatId, content: &DeliveryContent) -> Result<MessageHandle, TransportError> {
        let message = match content {
            DeliveryContent::Text(text) => {
                let outcome = retry(&self.retry, || async move {
                    self.bot
                        .send_message(chat, text.clone())
                        .parse_mode(ParseMode::Html)
                        .await
                })
                .await;
                outcome.into_result().map_err(|e| TransportError::from_request(&e))?
            }
            DeliveryContent::Audio { .. } => self.send_audio(chat, content).await?,
        };
        Ok(MessageHandle::Chat {
            chat_id: chat,
            message_id: message.id,
        })
    }

    async fn update_message(
        &self,
        handle: &MessageHandle,
        content: &DeliveryContent,
    ) -> Result<DeliveryReceipt, TransportError> {
        match (handle, content) {
            (MessageHandle::Chat { chat_id, message_id }, DeliveryContent::Text(text)) => {
                self.bot
                    .edit_message_text(*chat_id, *message_id, text.clone())
                    .parse_mode(ParseMode::Html)
                    .await
                    .map_err(|e| TransportError::from_request(&e))?;
                Ok(DeliveryReceipt::default())
            }
            (MessageHandle::Chat { chat_id, message_id }, DeliveryContent::Audio { .. }) => {
                // a text placeholder cannot become audio; send the audio and drop the placeholder
                let message = self.send_audio(*chat_id, content).await?;
                if let Err(e) = self.bot.delete_message(*chat_id, *message_id).await {
                    log::warn!("Failed to delete placeholder {} in {}: {}", message_id, chat_id, e);
                }
                Ok(DeliveryReceipt {
                    file_id: audio_file_id(&message),
                })
            }
            (MessageHandle::Inline { inline_message_id }, DeliveryContent::Text(text)) => {
                self.bot
                    .edit_message_text_inline(inline_message_id.clone(), text.clone())
                    .parse_mode(ParseMode::Html)
                    .await
                    .map_err(|e| TransportError::from_request(&e))?;
                Ok(DeliveryReceipt::default())
            }
            (MessageHandle::Inline { inline_message_id }, DeliveryContent::Audio { caption, .. }) => {
                let file_id = self.file_id_for_inline(content).await?;
                let media = InputMediaAudio::new(InputFile::file_id(FileId(file_id.clone())))
                    .caption(caption.clone())
                    .parse_mode(ParseMode::Html);
                self.bot
                    .edit_message_media_inline(inline_message_id.clone(), InputMedia::Audio(media))
                    .await
                    .map_err(|e| TransportError::from_request(&e))?;
                Ok(DeliveryReceipt { file_id: Some(file_id) })
            }
        }
    }
}
