//! Runtime for driving chat conversations
//!
//! `ChatRuntime` executes one message at a time against the state machine;
//! `UpdatePoller` feeds it from an update source until cancelled.

mod executor;
mod sessions;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{ChatRuntime, Collaborators};
pub use sessions::SessionStore;
pub use traits::*;

use crate::classifier::LoggingClassifier;
use crate::notifier::RedisNotifier;
use crate::state_machine::InboundMessage;
use crate::telegram::{TelegramClient, TransportError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Type alias for production runtime with concrete implementations
pub type ProductionRuntime = ChatRuntime<
    Arc<TelegramClient>,
    Arc<TelegramClient>,
    LoggingClassifier,
    Arc<RedisNotifier>,
>;

/// Anything that can consume inbound messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, message: InboundMessage);
}

#[async_trait]
impl<R, F, C, N> MessageHandler for ChatRuntime<R, F, C, N>
where
    R: ReplySender + 'static,
    F: PhotoFetcher + 'static,
    C: ImageClassifier + 'static,
    N: EventNotifier + 'static,
{
    async fn handle_message(&self, message: InboundMessage) {
        ChatRuntime::handle_message(self, message).await;
    }
}

#[async_trait]
impl<T: MessageHandler + ?Sized> MessageHandler for Arc<T> {
    async fn handle_message(&self, message: InboundMessage) {
        (**self).handle_message(message).await;
    }
}

/// Sequential ingestion loop: one update is fully handled before the next
pub struct UpdatePoller<U, H> {
    source: U,
    handler: H,
    retry_delay: Duration,
}

impl<U: UpdateSource, H: MessageHandler> UpdatePoller<U, H> {
    pub fn new(source: U, handler: H, retry_delay: Duration) -> Self {
        Self {
            source,
            handler,
            retry_delay,
        }
    }

    /// Fetch one batch and dispatch it, advancing `offset` past every update
    pub async fn poll_once(&self, offset: &mut i64) -> Result<usize, TransportError> {
        let updates = self.source.poll_updates(*offset).await?;
        let count = updates.len();

        for update in updates {
            *offset = (*offset).max(update.update_id + 1);
            match update.message {
                Some(message) => self.handler.handle_message(message).await,
                None => tracing::debug!(update_id = update.update_id, "Skipping update without message"),
            }
        }

        Ok(count)
    }

    /// Poll until `cancel` fires. Transport failures are retried forever after
    /// a fixed delay.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("Update poller started");
        let mut offset = 0;

        loop {
            let result = tokio::select! {
                () = cancel.cancelled() => break,
                result = self.poll_once(&mut offset) => result,
            };

            if let Err(e) = result {
                tracing::warn!(error = %e, offset, "Polling failed, retrying");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.retry_delay) => {}
                }
            }
        }

        tracing::info!(offset, "Update poller stopped");
    }
}
