//! In-memory chat session store

use crate::state_machine::{ChatId, Session};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Shared handle to one chat's session. Holding the lock for a whole turn
/// serializes messages of the same chat.
pub type SessionHandle = Arc<Mutex<Session>>;

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<ChatId, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing session for `chat_id`, or a blank one stored on first use
    pub async fn get_or_create(&self, chat_id: ChatId) -> SessionHandle {
        if let Some(handle) = self.sessions.read().await.get(&chat_id) {
            return handle.clone();
        }
        self.sessions
            .write()
            .await
            .entry(chat_id)
            .or_insert_with(|| {
                tracing::debug!(chat_id, "Creating session");
                Arc::new(Mutex::new(Session::default()))
            })
            .clone()
    }

    #[allow(dead_code)] // Inspection API
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    #[allow(dead_code)] // Inspection API
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
