//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::notifier::RedisNotifier;
use crate::state_machine::{ChatId, InboundMessage, PhotoRef};
use crate::telegram::{DownloadError, TelegramClient, TransportError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use crate::classifier::ImageClassifier;

/// Delivers text replies to a chat
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send_reply(&self, chat_id: ChatId, text: &str) -> Result<(), TransportError>;
}

/// Retrieves a submitted photo to local storage
#[async_trait]
pub trait PhotoFetcher: Send + Sync {
    async fn fetch_photo(&self, photo: &PhotoRef) -> Result<PathBuf, DownloadError>;
}

/// Best-effort publisher of processed-chat events; never fails the caller
#[async_trait]
pub trait EventNotifier: Send + Sync {
    async fn publish(&self, chat_id: ChatId, path: Option<&Path>);
}

/// One polled update, reduced to what the dispatcher needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolledUpdate {
    pub update_id: i64,
    pub message: Option<InboundMessage>,
}

/// Source of inbound updates for the polling loop
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn poll_updates(&self, offset: i64) -> Result<Vec<PolledUpdate>, TransportError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ReplySender + ?Sized> ReplySender for Arc<T> {
    async fn send_reply(&self, chat_id: ChatId, text: &str) -> Result<(), TransportError> {
        (**self).send_reply(chat_id, text).await
    }
}

#[async_trait]
impl<T: PhotoFetcher + ?Sized> PhotoFetcher for Arc<T> {
    async fn fetch_photo(&self, photo: &PhotoRef) -> Result<PathBuf, DownloadError> {
        (**self).fetch_photo(photo).await
    }
}

#[async_trait]
impl<T: EventNotifier + ?Sized> EventNotifier for Arc<T> {
    async fn publish(&self, chat_id: ChatId, path: Option<&Path>) {
        (**self).publish(chat_id, path).await;
    }
}

#[async_trait]
impl<T: UpdateSource + ?Sized> UpdateSource for Arc<T> {
    async fn poll_updates(&self, offset: i64) -> Result<Vec<PolledUpdate>, TransportError> {
        (**self).poll_updates(offset).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

#[async_trait]
impl ReplySender for TelegramClient {
    async fn send_reply(&self, chat_id: ChatId, text: &str) -> Result<(), TransportError> {
        self.send_message(chat_id, text).await
    }
}

#[async_trait]
impl PhotoFetcher for TelegramClient {
    async fn fetch_photo(&self, photo: &PhotoRef) -> Result<PathBuf, DownloadError> {
        self.download_photo(photo).await
    }
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn poll_updates(&self, offset: i64) -> Result<Vec<PolledUpdate>, TransportError> {
        let updates = self.get_updates(offset).await?;
        Ok(updates
            .into_iter()
            .map(|update| PolledUpdate {
                update_id: update.update_id,
                message: update.into_message().map(|m| m.into_inbound()),
            })
            .collect())
    }
}

#[async_trait]
impl EventNotifier for RedisNotifier {
    async fn publish(&self, chat_id: ChatId, path: Option<&Path>) {
        RedisNotifier::publish(self, chat_id, path).await;
    }
}
