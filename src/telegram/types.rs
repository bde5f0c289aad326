//! Bot API payloads, limited to the fields the bot reads

use crate::state_machine::{InboundMessage, PhotoRef};
use serde::{Deserialize, Serialize};

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub edited_message: Option<Message>,
}

impl Update {
    /// The message carried by this update, new or edited
    pub fn into_message(self) -> Option<Message> {
        self.message.or(self.edited_message)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    /// Unix time the message was sent
    pub date: i64,
    pub chat: Chat,
    pub text: Option<String>,
    pub caption: Option<String>,
    /// Available sizes of a photo, smallest first
    pub photo: Option<Vec<PhotoSize>>,
}

impl Message {
    pub fn into_inbound(self) -> InboundMessage {
        let chat_id = self.chat.id;
        let photo = self
            .photo
            .and_then(|sizes| sizes.into_iter().last())
            .map(|largest| PhotoRef {
                file_id: largest.file_id,
                file_size: largest.file_size,
                chat_id,
                message_id: self.message_id,
                sent_at: self.date,
            });

        InboundMessage {
            chat_id,
            text: self.text.or(self.caption).unwrap_or_default(),
            photo,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub file_size: Option<u64>,
}

/// Result of `getFile`
#[derive(Debug, Clone, Deserialize)]
pub struct File {
    pub file_size: Option<u64>,
    pub file_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GetUpdatesRequest {
    pub offset: i64,
    pub timeout: u64,
    pub allowed_updates: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageRequest<'a> {
    pub chat_id: i64,
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
pub struct GetFileRequest<'a> {
    pub file_id: &'a str,
}
