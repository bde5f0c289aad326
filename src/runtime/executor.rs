//! Chat runtime executor
//!
//! Runs pure transitions for one chat at a time and executes the effects they
//! produce. Effects that yield events feed them back through a FIFO queue
//! until the turn settles.

use super::sessions::SessionStore;
use super::traits::{EventNotifier, ImageClassifier, PhotoFetcher, ReplySender};
use crate::auth::CredentialTable;
use crate::classifier::ClassifierError;
use crate::config::Timeouts;
use crate::ledger::DiagnosisLedger;
use crate::state_machine::{
    transition, ChatId, ConvContext, ConversationGraph, Effect, Event, InboundMessage, Notice,
};
use crate::telegram::DownloadError;
use std::collections::VecDeque;
use std::sync::Arc;

/// External collaborators a runtime talks to
pub struct Collaborators<R, F, C, N> {
    pub replies: R,
    pub fetcher: F,
    pub classifier: C,
    pub notifier: N,
}

/// Conversation runtime, generic over its I/O so tests can swap in mocks
pub struct ChatRuntime<R, F, C, N>
where
    R: ReplySender,
    F: PhotoFetcher,
    C: ImageClassifier,
    N: EventNotifier,
{
    graph: Arc<ConversationGraph>,
    sessions: SessionStore,
    credentials: Arc<CredentialTable>,
    ledger: Arc<DiagnosisLedger>,
    replies: R,
    fetcher: F,
    classifier: C,
    notifier: N,
    timeouts: Timeouts,
    /// Zero disables the pre-flight size check
    max_download_bytes: u64,
}

impl<R, F, C, N> ChatRuntime<R, F, C, N>
where
    R: ReplySender,
    F: PhotoFetcher,
    C: ImageClassifier,
    N: EventNotifier,
{
    pub fn new(
        graph: Arc<ConversationGraph>,
        credentials: Arc<CredentialTable>,
        ledger: Arc<DiagnosisLedger>,
        collaborators: Collaborators<R, F, C, N>,
    ) -> Self {
        Self {
            graph,
            sessions: SessionStore::new(),
            credentials,
            ledger,
            replies: collaborators.replies,
            fetcher: collaborators.fetcher,
            classifier: collaborators.classifier,
            notifier: collaborators.notifier,
            timeouts: Timeouts::default(),
            max_download_bytes: 0,
        }
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_max_download_bytes(mut self, limit: u64) -> Self {
        self.max_download_bytes = limit;
        self
    }

    #[allow(dead_code)] // Used by tests
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Process one inbound message to completion.
    ///
    /// The chat's session stays locked for the whole turn, including external
    /// calls, so two messages of the same chat never interleave.
    pub async fn handle_message(&self, message: InboundMessage) {
        let chat_id = message.chat_id;
        let handle = self.sessions.get_or_create(chat_id).await;
        let mut session = handle.lock().await;
        let context = ConvContext::new(chat_id, self.graph.clone());

        let mut events = VecDeque::from([Event::Message(message)]);
        while let Some(event) = events.pop_front() {
            let result = transition(&session, &context, event);
            *session = result.session;

            for effect in result.effects {
                if let Some(next) = self.execute_effect(chat_id, effect).await {
                    events.push_back(next);
                }
            }
        }

        tracing::debug!(
            chat_id,
            awaiting = session.awaiting.as_deref().unwrap_or(""),
            authenticated = session.authenticated,
            "Turn complete"
        );
    }

    /// Execute an effect and optionally return a generated event
    async fn execute_effect(&self, chat_id: ChatId, effect: Effect) -> Option<Event> {
        match effect {
            Effect::Reply { text } => {
                if let Err(e) = self.replies.send_reply(chat_id, &text).await {
                    tracing::warn!(chat_id, error = %e, "Failed to send reply");
                }
                None
            }

            Effect::CheckUsername { node_id, username } => {
                let known = self.credentials.user_exists(&username);
                if !known {
                    tracing::info!(chat_id, username = %username, "Unknown username");
                }
                Some(Event::UsernameChecked {
                    node_id,
                    username,
                    known,
                })
            }

            Effect::VerifyPassword {
                node_id,
                username,
                password,
            } => {
                let outcome = self.credentials.verify(&username, &password);
                tracing::info!(chat_id, username = %username, ?outcome, "Password checked");
                Some(Event::PasswordChecked { node_id, outcome })
            }

            Effect::FetchPhoto { node_id, photo } => {
                if let Err(e) = DownloadError::check_size(photo.file_size, self.max_download_bytes) {
                    tracing::warn!(chat_id, file_id = %photo.file_id, error = %e, "Photo rejected before download");
                    return Some(Event::PhotoUnavailable { node_id });
                }

                let fetch = self.fetcher.fetch_photo(&photo);
                let result = match tokio::time::timeout(self.timeouts.download, fetch).await {
                    Ok(result) => result,
                    Err(_) => Err(DownloadError::Timeout),
                };

                match result {
                    Ok(path) => Some(Event::PhotoFetched { node_id, path }),
                    Err(e) => {
                        tracing::warn!(chat_id, file_id = %photo.file_id, error = %e, "Photo download failed");
                        Some(Event::PhotoUnavailable { node_id })
                    }
                }
            }

            Effect::NotifyProcessed { path } => {
                let publish = self.notifier.publish(chat_id, path.as_deref());
                if tokio::time::timeout(self.timeouts.notify, publish).await.is_err() {
                    tracing::warn!(chat_id, "Chat event publish timed out");
                }
                None
            }

            Effect::ClassifyPhoto { node_id, path } => {
                let classify = self.classifier.classify(&path);
                let result = match tokio::time::timeout(self.timeouts.classify, classify).await {
                    Ok(result) => result,
                    Err(_) => Err(ClassifierError::timeout(format!(
                        "classification exceeded {}s",
                        self.timeouts.classify.as_secs()
                    ))),
                };

                match result {
                    Ok(assessment) => Some(Event::PhotoClassified {
                        node_id,
                        path,
                        is_positive: assessment.is_positive,
                        rationale: assessment.rationale,
                    }),
                    Err(e) => {
                        tracing::warn!(chat_id, kind = ?e.kind, error = %e, "Classification failed");
                        Some(Event::ClassificationFailed { node_id })
                    }
                }
            }

            Effect::RecordDiagnosis {
                username,
                path,
                verdict,
                rationale,
            } => {
                if let Err(e) = self
                    .ledger
                    .record(&username, &path, verdict, &rationale)
                    .await
                {
                    tracing::error!(chat_id, username = %username, error = %e, "Failed to record diagnosis");
                }
                None
            }

            Effect::Note(notice) => {
                log_notice(chat_id, &notice);
                None
            }
        }
    }
}

fn log_notice(chat_id: ChatId, notice: &Notice) {
    match notice {
        Notice::UnknownNode { node_id } => {
            tracing::warn!(chat_id, node = %node_id, "Transition to unknown node, chat stalled");
        }
        Notice::NoTransition { node_id, success } => {
            tracing::info!(chat_id, node = %node_id, success, "No transition configured");
        }
        Notice::ChainLimit { node_id, steps } => {
            tracing::warn!(chat_id, node = %node_id, steps, "Auto-chain limit reached, chat stalled");
        }
        Notice::Unhandled { awaiting } => {
            tracing::info!(chat_id, awaiting = %awaiting, "Unhandled message");
        }
        Notice::DiagnosisSkipped => {
            tracing::warn!(chat_id, "No username bound, diagnosis not recorded");
        }
        Notice::StaleResult { node_id } => {
            tracing::debug!(chat_id, node = %node_id, "Ignoring result for a node no longer awaited");
        }
    }
}
