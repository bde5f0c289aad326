//! Transport and photo retrieval errors

use thiserror::Error;

/// Failure talking to the Bot API
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),
    #[error("HTTP status {status}")]
    Status { status: u16 },
    #[error("Bot API error: {description}")]
    Api { description: String },
    #[error("Bot API returned ok without a result")]
    EmptyResult,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        // Request URLs embed the bot token
        Self::Http(e.without_url())
    }
}

/// Failure to obtain a submitted photo as a local file
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("photo not found on the provider")]
    NotFound,
    #[error("photo is {size} bytes, limit is {limit}")]
    Oversize { size: u64, limit: u64 },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("photo retrieval timed out")]
    Timeout,
    #[error("cannot store photo: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Reject `size` if it exceeds a non-zero `limit`
    pub fn check_size(size: Option<u64>, limit: u64) -> Result<(), Self> {
        match size {
            Some(size) if limit > 0 && size > limit => Err(Self::Oversize { size, limit }),
            _ => Ok(()),
        }
    }
}
