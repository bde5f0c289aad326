//! Per-chat session state and the context it runs in

use super::graph::ConversationGraph;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub type ChatId = i64;

/// Conversation state for one chat
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Node currently blocking on user input
    pub awaiting: Option<String>,
    /// Captured answers keyed by node id
    pub answers: HashMap<String, String>,
    pub started: bool,
    /// Username accepted by the login step, not necessarily authenticated
    pub username: Option<String>,
    /// Set once the password matched; only cleared by a full reset
    pub authenticated: bool,
}

impl Session {
    /// Blank session that has already greeted the user, used after an end message
    pub fn restarted() -> Self {
        Self {
            started: true,
            ..Self::default()
        }
    }

    pub fn is_awaiting(&self, node_id: &str) -> bool {
        self.awaiting.as_deref() == Some(node_id)
    }

    pub fn bound_username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }
}

/// Provider reference to the canonical (largest) variant of a submitted photo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRef {
    pub file_id: String,
    /// Size reported by the provider, if any
    pub file_size: Option<u64>,
    pub chat_id: ChatId,
    pub message_id: i64,
    /// Unix timestamp of the message
    pub sent_at: i64,
}

/// Transport-independent view of an inbound chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub text: String,
    pub photo: Option<PhotoRef>,
}

impl InboundMessage {
    pub fn text(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            photo: None,
        }
    }

    #[allow(dead_code)] // Used by tests
    pub fn with_photo(mut self, photo: PhotoRef) -> Self {
        self.photo = Some(photo);
        self
    }
}

/// Immutable context shared by every transition of a chat
#[derive(Debug, Clone)]
pub struct ConvContext {
    pub chat_id: ChatId,
    pub graph: Arc<ConversationGraph>,
}

impl ConvContext {
    pub fn new(chat_id: ChatId, graph: Arc<ConversationGraph>) -> Self {
        Self { chat_id, graph }
    }
}
