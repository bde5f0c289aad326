//! Best-effort publisher of processed-chat events
//!
//! Events are JSON objects pushed with `RPUSH` onto a Redis list that the
//! dashboard consumes. Nothing here is allowed to fail a conversation turn:
//! every error is logged and dropped.

use crate::state_machine::ChatId;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

/// Wire shape consumed by the dashboard
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ChatEvent<'a> {
    pub chat_id: ChatId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<&'a str>,
}

impl<'a> ChatEvent<'a> {
    pub fn new(chat_id: ChatId, path: Option<&'a Path>) -> Self {
        Self {
            chat_id,
            path: path.and_then(Path::to_str),
        }
    }
}

pub struct RedisNotifier {
    addr: String,
    queue: String,
    timeout: Duration,
    /// Live connection, cleared after a failed push so the next publish reconnects
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisNotifier {
    pub fn new(addr: impl Into<String>, queue: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            queue: queue.into(),
            timeout,
            connection: Mutex::new(None),
        }
    }

    fn url(&self) -> String {
        if self.addr.contains("://") {
            self.addr.clone()
        } else {
            format!("redis://{}", self.addr)
        }
    }

    /// Startup connection check. An unreachable server is retried on the next publish.
    pub async fn init(&self) -> bool {
        self.connection().await.is_some()
    }

    /// Current connection, dialing a new one when none is held
    async fn connection(&self) -> Option<MultiplexedConnection> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Some(conn.clone());
        }

        match tokio::time::timeout(self.timeout, self.connect()).await {
            Ok(Ok(conn)) => {
                *slot = Some(conn.clone());
                Some(conn)
            }
            Ok(Err(e)) => {
                tracing::warn!(addr = %self.addr, error = %e, "Redis unavailable");
                None
            }
            Err(_) => {
                tracing::warn!(addr = %self.addr, "Redis connect timed out");
                None
            }
        }
    }

    async fn disconnect(&self) {
        self.connection.lock().await.take();
    }

    async fn connect(&self) -> redis::RedisResult<MultiplexedConnection> {
        let client = redis::Client::open(self.url())?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => tracing::info!(addr = %self.addr, queue = %self.queue, "Redis connected"),
            Err(e) => tracing::warn!(addr = %self.addr, error = %e, "Redis ping failed"),
        }
        Ok(conn)
    }

    pub async fn publish(&self, chat_id: ChatId, path: Option<&Path>) {
        let payload = match serde_json::to_string(&ChatEvent::new(chat_id, path)) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(chat_id, error = %e, "Chat event serialization failed");
                return;
            }
        };

        let Some(mut conn) = self.connection().await else {
            return;
        };

        let push = conn.rpush::<_, _, i64>(&self.queue, payload);
        match tokio::time::timeout(self.timeout, push).await {
            Ok(Ok(_)) => tracing::debug!(chat_id, queue = %self.queue, "Chat event published"),
            Ok(Err(e)) => {
                tracing::warn!(chat_id, error = %e, "Chat event publish failed");
                self.disconnect().await;
            }
            Err(_) => {
                tracing::warn!(chat_id, "Chat event publish timed out");
                self.disconnect().await;
            }
        }
    }
}
