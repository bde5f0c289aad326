//! Startup configuration
//!
//! Everything here is read once before the poll loop starts. Failures are
//! fatal: the process refuses to start with a broken graph, credential table
//! or ledger.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Failure to read one of the configuration documents at startup
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed document {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid document {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

impl LoadError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn malformed(path: &Path, source: serde_json::Error) -> Self {
        Self::Malformed {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn invalid(path: &Path, reason: impl Into<String>) -> Self {
        Self::Invalid {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Read and parse a JSON document, mapping failures onto [`LoadError`]
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
    let data = std::fs::read(path).map_err(|e| LoadError::io(path, e))?;
    serde_json::from_slice(&data).map_err(|e| LoadError::malformed(path, e))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not set in environment")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Process configuration, sourced from the environment
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram_token: String,
    pub telegram_api_base: String,
    pub poll_timeout: Duration,
    pub conversation_path: PathBuf,
    pub auth_path: PathBuf,
    pub diagnosis_path: PathBuf,
    pub assets_dir: PathBuf,
    /// Photos the provider reports as larger than this are never downloaded.
    /// Zero disables the check.
    pub max_download_bytes: u64,
    pub redis_addr: String,
    pub chat_event_queue: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub auth_max_failures: u32,
    pub auth_window: Duration,
    pub timeouts: Timeouts,
}

/// Bounds applied to external calls made during a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub download: Duration,
    pub classify: Duration,
    pub notify: Duration,
    pub poll_retry: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            download: Duration::from_secs(30),
            classify: Duration::from_secs(90),
            notify: Duration::from_secs(2),
            poll_retry: Duration::from_secs(2),
        }
    }
}

pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 10 * 1024 * 1024;

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup (the environment in production)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let or = |name: &str, default: &str| var(name).unwrap_or_else(|| default.to_string());

        let telegram_token = var("TELEGRAM_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_TOKEN"))?;

        Ok(Self {
            telegram_token,
            telegram_api_base: or("TELEGRAM_API_BASE", "https://api.telegram.org"),
            poll_timeout: Duration::from_secs(parse_num(&var, "POLL_TIMEOUT_SECS", 30)?),
            conversation_path: PathBuf::from(or("CONVERSATION_PATH", "configs/conversation.json")),
            auth_path: PathBuf::from(or("AUTH_PATH", "configs/auth.json")),
            diagnosis_path: PathBuf::from(or("DIAGNOSIS_PATH", "configs/diagnosis.json")),
            assets_dir: PathBuf::from(or("ASSETS_DIR", "assets")),
            max_download_bytes: parse_num(&var, "MAX_DOWNLOAD_BYTES", DEFAULT_MAX_DOWNLOAD_BYTES)?,
            redis_addr: or("REDIS_ADDR", "localhost:6379"),
            chat_event_queue: or("CHAT_EVENT_QUEUE", "diagnosis:chat_events"),
            gemini_api_key: var("GEMINI_API_KEY"),
            gemini_model: or("GEMINI_MODEL", "gemini-2.0-flash-lite"),
            gemini_base_url: or("GEMINI_BASE_URL", "https://generativelanguage.googleapis.com"),
            auth_max_failures: parse_num(&var, "AUTH_MAX_FAILURES", 5)?,
            auth_window: Duration::from_secs(parse_num(&var, "AUTH_WINDOW_SECS", 300)?),
            timeouts: Timeouts::default(),
        })
    }
}

fn parse_num<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
