//! Effects produced by state transitions

use super::state::PhotoRef;
use std::path::PathBuf;

/// Effects to be executed after state transition, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send text to the chat
    Reply { text: String },

    /// Look the username up in the credential table
    CheckUsername { node_id: String, username: String },

    /// Check a password for an already accepted username
    VerifyPassword {
        node_id: String,
        username: String,
        password: String,
    },

    /// Retrieve the submitted photo to local storage
    FetchPhoto { node_id: String, photo: PhotoRef },

    /// Publish a processed-chat event to the downstream queue
    NotifyProcessed { path: Option<PathBuf> },

    /// Run the image classifier on a retrieved photo
    ClassifyPhoto { node_id: String, path: PathBuf },

    /// Append a diagnosis to the ledger
    RecordDiagnosis {
        username: String,
        path: PathBuf,
        verdict: bool,
        rationale: String,
    },

    /// Log-only condition, nothing is sent to the user
    Note(Notice),
}

/// Conditions worth logging that do not change what the user sees
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A transition or the awaited pointer names a node that does not exist
    UnknownNode { node_id: String },
    /// The selected edge is unset; the chat stalls until the next message
    NoTransition { node_id: String, success: bool },
    /// Auto-chaining stopped after too many steps
    ChainLimit { node_id: String, steps: usize },
    /// The message did not match anything the awaited node accepts
    Unhandled { awaiting: String },
    /// Classification succeeded but no username is bound to the session
    DiagnosisSkipped,
    /// A pipeline result arrived for a node the chat is no longer awaiting
    StaleResult { node_id: String },
}

impl Effect {
    pub fn reply(text: impl Into<String>) -> Self {
        Effect::Reply { text: text.into() }
    }

    pub fn note(notice: Notice) -> Self {
        Effect::Note(notice)
    }
}
