//! Telegram Bot API client
//!
//! Long-polls for updates, sends text replies and downloads submitted photos
//! into the assets directory.

mod error;
pub mod types;

pub use error::{DownloadError, TransportError};

use crate::state_machine::{ChatId, PhotoRef};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use types::{
    ApiResponse, File, GetFileRequest, GetUpdatesRequest, SendMessageRequest, Update,
};

const DEFAULT_EXTENSION: &str = ".jpg";

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub token: String,
    pub api_base: String,
    pub poll_timeout: Duration,
    pub assets_dir: PathBuf,
    pub max_download_bytes: u64,
}

pub struct TelegramClient {
    client: Client,
    /// `{base}/bot{token}`, never logged
    method_base: String,
    /// `{base}/file/bot{token}`, never logged
    file_base: String,
    poll_timeout: Duration,
    assets_dir: PathBuf,
    max_download_bytes: u64,
}

impl TelegramClient {
    pub fn new(config: TelegramConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        let base = config.api_base.trim_end_matches('/');
        Ok(Self {
            client,
            method_base: format!("{base}/bot{}", config.token),
            file_base: format!("{base}/file/bot{}", config.token),
            poll_timeout: config.poll_timeout,
            assets_dir: config.assets_dir,
            max_download_bytes: config.max_download_bytes,
        })
    }

    async fn call<B, T>(&self, method: &str, body: &B, timeout: Option<Duration>) -> Result<T, TransportError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(format!("{}/{method}", self.method_base))
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        let envelope: ApiResponse<T> = match response.json().await {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(TransportError::Status {
                    status: status.as_u16(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if !envelope.ok {
            return Err(TransportError::Api {
                description: envelope
                    .description
                    .unwrap_or_else(|| format!("HTTP {status}")),
            });
        }
        envelope.result.ok_or(TransportError::EmptyResult)
    }

    /// Long-poll for updates starting at `offset`
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TransportError> {
        let request = GetUpdatesRequest {
            offset,
            timeout: self.poll_timeout.as_secs(),
            allowed_updates: vec!["message", "edited_message"],
        };
        // Leave room for the server to hold the poll open
        let timeout = self.poll_timeout + Duration::from_secs(15);
        self.call("getUpdates", &request, Some(timeout)).await
    }

    pub async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<(), TransportError> {
        let request = SendMessageRequest { chat_id, text };
        let _: serde_json::Value = self.call("sendMessage", &request, None).await?;
        Ok(())
    }

    async fn get_file(&self, file_id: &str) -> Result<File, TransportError> {
        self.call("getFile", &GetFileRequest { file_id }, None).await
    }

    /// Download `photo` into the assets directory, returning the stored path.
    ///
    /// Sizes reported by the message and by `getFile` are both checked against
    /// the cap before any bytes are fetched. The body is capped as it streams.
    pub async fn download_photo(&self, photo: &PhotoRef) -> Result<PathBuf, DownloadError> {
        DownloadError::check_size(photo.file_size, self.max_download_bytes)?;

        let file = match self.get_file(&photo.file_id).await {
            Ok(file) => file,
            Err(TransportError::Api { description }) => {
                tracing::warn!(file_id = %photo.file_id, %description, "getFile rejected");
                return Err(DownloadError::NotFound);
            }
            Err(e) => return Err(e.into()),
        };
        DownloadError::check_size(file.file_size, self.max_download_bytes)?;

        let remote_path = file
            .file_path
            .filter(|p| !p.is_empty())
            .ok_or(DownloadError::NotFound)?;

        let mut response = self
            .client
            .get(format!("{}/{remote_path}", self.file_base))
            .send()
            .await
            .map_err(TransportError::from)?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(DownloadError::NotFound),
            status if !status.is_success() => {
                return Err(TransportError::Status {
                    status: status.as_u16(),
                }
                .into())
            }
            _ => {}
        }

        DownloadError::check_size(response.content_length(), self.max_download_bytes)?;

        // Size may be unreported, so the cap is enforced while streaming
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(TransportError::from)? {
            bytes.extend_from_slice(&chunk);
            DownloadError::check_size(Some(bytes.len() as u64), self.max_download_bytes)?;
        }

        tokio::fs::create_dir_all(&self.assets_dir).await?;
        let path = self
            .assets_dir
            .join(photo_file_name(photo, Path::new(&remote_path)));
        tokio::fs::write(&path, &bytes).await?;

        tracing::info!(
            chat_id = photo.chat_id,
            path = %path.display(),
            bytes = bytes.len(),
            "Photo downloaded"
        );
        Ok(path)
    }
}

/// `{chat}_{message}_{date}{ext}`, with the extension taken from the remote path
fn photo_file_name(photo: &PhotoRef, remote_path: &Path) -> String {
    let ext = remote_path
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map_or_else(|| DEFAULT_EXTENSION.to_string(), |e| format!(".{e}"));
    format!(
        "{}_{}_{}{ext}",
        photo.chat_id, photo.message_id, photo.sent_at
    )
}
