//! In-process messaging transport that records every call

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use soundgrab::telegram::{
    AudioPayload, DeliveryContent, DeliveryReceipt, MessageHandle, MessagingTransport, TransportError,
};
use teloxide::types::{ChatId, MessageId};

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Placeholder { chat: ChatId, content: DeliveryContent },
    Update { handle: MessageHandle, content: DeliveryContent },
}

/// Fake transport.
///
/// Placeholders get increasing message ids. Audio updates succeed with a
/// minted file id unless an error was queued with [`RecordingTransport::fail_next_update`].
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<RecordedCall>>,
    placeholder_errors: Mutex<VecDeque<TransportError>>,
    update_errors: Mutex<VecDeque<TransportError>>,
    /// File ids in this list are rejected as stale
    stale_file_ids: Mutex<Vec<String>>,
    next_message_id: AtomicI32,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_placeholder(&self, error: TransportError) {
        self.placeholder_errors.lock().unwrap().push_back(error);
    }

    pub fn fail_next_update(&self, error: TransportError) {
        self.update_errors.lock().unwrap().push_back(error);
    }

    pub fn reject_file_id(&self, file_id: &str) {
        self.stale_file_ids.lock().unwrap().push(file_id.to_string());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Contents of all updates, in order.
    pub fn updates(&self) -> Vec<DeliveryContent> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Update { content, .. } => Some(content),
                RecordedCall::Placeholder { .. } => None,
            })
            .collect()
    }

    pub fn placeholders(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RecordedCall::Placeholder { .. }))
            .count()
    }
}

#[async_trait]
impl MessagingTransport for RecordingTransport {
    async fn send_placeholder(&self, chat: ChatId, content: &DeliveryContent) -> Result<MessageHandle, TransportError> {
        self.calls.lock().unwrap().push(RecordedCall::Placeholder {
            chat,
            content: content.clone(),
        });
        if let Some(error) = self.placeholder_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MessageHandle::Chat {
            chat_id: chat,
            message_id: MessageId(id),
        })
    }

    async fn update_message(
        &self,
        handle: &MessageHandle,
        content: &DeliveryContent,
    ) -> Result<DeliveryReceipt, TransportError> {
        self.calls.lock().unwrap().push(RecordedCall::Update {
            handle: handle.clone(),
            content: content.clone(),
        });
        if let Some(error) = self.update_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        match content {
            DeliveryContent::Text(_) => Ok(DeliveryReceipt::default()),
            DeliveryContent::Audio {
                payload: AudioPayload::FileId(file_id),
                ..
            } => {
                if self.stale_file_ids.lock().unwrap().contains(file_id) {
                    return Err(TransportError::StaleFile("wrong file identifier/HTTP URL specified".into()));
                }
                Ok(DeliveryReceipt {
                    file_id: Some(file_id.clone()),
                })
            }
            DeliveryContent::Audio {
                payload: AudioPayload::Bytes { file_name, .. },
                ..
            } => Ok(DeliveryReceipt {
                file_id: Some(format!("file-{}", file_name)),
            }),
        }
    }
}
