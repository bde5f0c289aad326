//! Events that drive a chat's conversation

use super::state::InboundMessage;
use std::path::PathBuf;

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A message arrived from the chat
    Message(InboundMessage),

    // Authentication results
    UsernameChecked {
        node_id: String,
        username: String,
        known: bool,
    },
    PasswordChecked {
        node_id: String,
        outcome: PasswordCheck,
    },

    // Photo pipeline results
    PhotoFetched {
        node_id: String,
        path: PathBuf,
    },
    /// Retrieval failed or the photo was rejected before download
    PhotoUnavailable {
        node_id: String,
    },
    PhotoClassified {
        node_id: String,
        path: PathBuf,
        is_positive: bool,
        rationale: String,
    },
    /// Cause already logged by the executor
    ClassificationFailed {
        node_id: String,
    },
}

/// Result of checking a password against the credential table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    Accepted,
    Rejected,
    /// Too many recent failures for this username
    Throttled,
}
