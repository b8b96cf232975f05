//! Telegram bot handler tree configuration
//!
//! This module provides the main dispatcher schema for the Telegram bot.
//! The handlers are organized in a testable way, allowing integration tests
//! to use the same handler tree as production code.

mod commands;
mod inline;
mod requests;
mod schema;
mod types;

pub use requests::{request_queries, MAX_QUERIES_PER_MESSAGE};
pub use schema::schema;
pub use types::{inline_result_id, track_id_from_result_id, HandlerDeps, HandlerError};
