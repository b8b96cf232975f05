//! Telegram surface: bot setup, dispatcher schema, message transport and delivery

pub mod artwork;
pub mod bot;
pub mod captions;
pub mod handlers;
pub mod inline_search;
pub mod reconciler;
pub mod transport;

pub type Bot = teloxide::Bot;

pub use bot::{create_bot, is_message_addressed_to_bot, setup_bot_commands, Command};
pub use handlers::{schema, HandlerDeps, HandlerError};
pub use reconciler::{DeliveryError, DeliveryReconciler, DeliveryReport, DeliveryRequest, DeliveryState, DeliveryTarget};
pub use transport::{
    AudioPayload, DeliveryContent, DeliveryReceipt, MessageHandle, MessagingTransport, TelegramTransport, TransportError,
};
