//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::executor::{ChatRuntime, Collaborators};
use super::traits::*;
use super::MessageHandler;
use crate::auth::CredentialTable;
use crate::classifier::{Assessment, ClassifierError};
use crate::config::Timeouts;
use crate::ledger::DiagnosisLedger;
use crate::state_machine::{
    ChatId, ConversationGraph, InboundMessage, Node, NodeKind, PhotoRef, Session,
};
use crate::telegram::{DownloadError, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Graph helpers
// ============================================================================

pub fn node(id: &str, kind: NodeKind, text: &str) -> Node {
    Node {
        id: id.to_string(),
        kind,
        text: text.to_string(),
        success_transition: None,
        fail_transition: None,
        expect_photo: false,
    }
}

/// Builder-style edge setters for test nodes
pub trait NodeExt {
    fn success(self, target: &str) -> Self;
    fn fail(self, target: &str) -> Self;
    fn expect_photo(self) -> Self;
}

impl NodeExt for Node {
    fn success(mut self, target: &str) -> Self {
        self.success_transition = Some(target.to_string());
        self
    }

    fn fail(mut self, target: &str) -> Self {
        self.fail_transition = Some(target.to_string());
        self
    }

    fn expect_photo(mut self) -> Self {
        self.expect_photo = true;
        self
    }
}

pub fn graph(nodes: Vec<Node>) -> Arc<ConversationGraph> {
    Arc::new(ConversationGraph::from_nodes(nodes).expect("test graph needs nodes"))
}

pub fn photo_ref(chat_id: ChatId, file_size: Option<u64>) -> PhotoRef {
    PhotoRef {
        file_id: format!("file-{chat_id}"),
        file_size,
        chat_id,
        message_id: 1,
        sent_at: 1_700_000_000,
    }
}

// ============================================================================
// Mock Reply Sender
// ============================================================================

/// Records every reply; optionally fails delivery after recording
#[derive(Default)]
pub struct RecordingReplies {
    sent: Mutex<Vec<(ChatId, String)>>,
    fail: bool,
}

impl RecordingReplies {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent_to(&self, chat_id: ChatId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == chat_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ReplySender for RecordingReplies {
    async fn send_reply(&self, chat_id: ChatId, text: &str) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        if self.fail {
            return Err(TransportError::Status { status: 502 });
        }
        Ok(())
    }
}

// ============================================================================
// Mock Photo Fetcher
// ============================================================================

/// Returns queued results, or a path derived from the file id when none are queued
#[derive(Default)]
pub struct MockPhotoFetcher {
    results: Mutex<VecDeque<Result<PathBuf, DownloadError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockPhotoFetcher {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn queue_error(&self, error: DownloadError) {
        self.results.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhotoFetcher for MockPhotoFetcher {
    async fn fetch_photo(&self, photo: &PhotoRef) -> Result<PathBuf, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.results.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(PathBuf::from(format!("assets/{}.jpg", photo.file_id))))
    }
}

// ============================================================================
// Mock Classifier
// ============================================================================

#[derive(Default)]
pub struct MockClassifier {
    results: Mutex<VecDeque<Result<Assessment, ClassifierError>>>,
    delay: Option<Duration>,
    pub classified: Mutex<Vec<PathBuf>>,
}

impl MockClassifier {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn queue_assessment(&self, is_positive: bool, rationale: &str) {
        self.results.lock().unwrap().push_back(Ok(Assessment {
            is_positive,
            rationale: rationale.to_string(),
        }));
    }

    pub fn queue_error(&self, error: ClassifierError) {
        self.results.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.classified.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageClassifier for MockClassifier {
    async fn classify(&self, path: &Path) -> Result<Assessment, ClassifierError> {
        self.classified.lock().unwrap().push(path.to_path_buf());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.results.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            Ok(Assessment {
                is_positive: false,
                rationale: "no findings".to_string(),
            })
        })
    }

    fn model_id(&self) -> &str {
        "mock-classifier"
    }
}

// ============================================================================
// Mock Notifier
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    pub published: Mutex<Vec<(ChatId, Option<PathBuf>)>>,
    delay: Option<Duration>,
}

impl RecordingNotifier {
    /// Records the event, then stalls before returning
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn published(&self) -> Vec<(ChatId, Option<PathBuf>)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventNotifier for RecordingNotifier {
    async fn publish(&self, chat_id: ChatId, path: Option<&Path>) {
        self.published
            .lock()
            .unwrap()
            .push((chat_id, path.map(Path::to_path_buf)));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

// ============================================================================
// Mock Update Source and Handler
// ============================================================================

/// Serves queued poll results; an empty queue yields empty batches
#[derive(Default)]
pub struct MockUpdateSource {
    batches: Mutex<VecDeque<Result<Vec<PolledUpdate>, TransportError>>>,
    pub offsets: Mutex<Vec<i64>>,
}

impl MockUpdateSource {
    pub fn queue_batch(&self, batch: Vec<PolledUpdate>) {
        self.batches.lock().unwrap().push_back(Ok(batch));
    }

    pub fn queue_error(&self, error: TransportError) {
        self.batches.lock().unwrap().push_back(Err(error));
    }

    pub fn offsets(&self) -> Vec<i64> {
        self.offsets.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpdateSource for MockUpdateSource {
    async fn poll_updates(&self, offset: i64) -> Result<Vec<PolledUpdate>, TransportError> {
        self.offsets.lock().unwrap().push(offset);
        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(batch) => batch,
            None => {
                // Stand-in for a long poll that returned nothing
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Vec::new())
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingHandler {
    pub handled: Mutex<Vec<InboundMessage>>,
}

impl RecordingHandler {
    pub fn handled(&self) -> Vec<InboundMessage> {
        self.handled.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle_message(&self, message: InboundMessage) {
        self.handled.lock().unwrap().push(message);
    }
}

pub fn update(update_id: i64, message: Option<InboundMessage>) -> PolledUpdate {
    PolledUpdate { update_id, message }
}

// ============================================================================
// Test Runtime
// ============================================================================

type MockRuntime = ChatRuntime<
    Arc<RecordingReplies>,
    Arc<MockPhotoFetcher>,
    Arc<MockClassifier>,
    Arc<RecordingNotifier>,
>;

/// A runtime wired to mocks plus a ledger in a temp directory
pub struct TestRuntime {
    pub runtime: MockRuntime,
    pub replies: Arc<RecordingReplies>,
    pub fetcher: Arc<MockPhotoFetcher>,
    pub classifier: Arc<MockClassifier>,
    pub notifier: Arc<RecordingNotifier>,
    pub ledger: Arc<DiagnosisLedger>,
    _dir: TempDir,
}

pub struct TestRuntimeBuilder {
    nodes: Vec<Node>,
    users: Vec<(String, String)>,
    auth_limits: Option<(u32, Duration)>,
    replies: RecordingReplies,
    fetcher: MockPhotoFetcher,
    classifier: MockClassifier,
    notifier: RecordingNotifier,
    timeouts: Timeouts,
    max_download_bytes: u64,
}

impl TestRuntime {
    pub fn builder(nodes: Vec<Node>) -> TestRuntimeBuilder {
        TestRuntimeBuilder {
            nodes,
            users: Vec::new(),
            auth_limits: None,
            replies: RecordingReplies::default(),
            fetcher: MockPhotoFetcher::default(),
            classifier: MockClassifier::default(),
            notifier: RecordingNotifier::default(),
            timeouts: Timeouts::default(),
            max_download_bytes: 0,
        }
    }

    pub async fn send_text(&self, chat_id: ChatId, text: &str) {
        self.runtime
            .handle_message(InboundMessage::text(chat_id, text))
            .await;
    }

    pub async fn send_photo(&self, chat_id: ChatId, file_size: Option<u64>) {
        let message = InboundMessage::text(chat_id, "").with_photo(photo_ref(chat_id, file_size));
        self.runtime.handle_message(message).await;
    }

    pub fn replies(&self, chat_id: ChatId) -> Vec<String> {
        self.replies.sent_to(chat_id)
    }

    pub async fn session(&self, chat_id: ChatId) -> Session {
        self.runtime
            .sessions()
            .get_or_create(chat_id)
            .await
            .lock()
            .await
            .clone()
    }
}

impl TestRuntimeBuilder {
    pub fn user(mut self, username: &str, password: &str) -> Self {
        self.users.push((username.to_string(), password.to_string()));
        self
    }

    pub fn auth_limits(mut self, max_failures: u32, window: Duration) -> Self {
        self.auth_limits = Some((max_failures, window));
        self
    }

    pub fn replies(mut self, replies: RecordingReplies) -> Self {
        self.replies = replies;
        self
    }

    pub fn fetcher(mut self, fetcher: MockPhotoFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn classifier(mut self, classifier: MockClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn notifier(mut self, notifier: RecordingNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn max_download_bytes(mut self, limit: u64) -> Self {
        self.max_download_bytes = limit;
        self
    }

    pub fn build(self) -> TestRuntime {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(DiagnosisLedger::load(dir.path().join("diagnosis.json")).unwrap());

        let mut credentials = CredentialTable::from_pairs(self.users);
        if let Some((max, window)) = self.auth_limits {
            credentials = credentials.with_limits(max, window);
        }

        let replies = Arc::new(self.replies);
        let fetcher = Arc::new(self.fetcher);
        let classifier = Arc::new(self.classifier);
        let notifier = Arc::new(self.notifier);

        let runtime = ChatRuntime::new(
            graph(self.nodes),
            Arc::new(credentials),
            ledger.clone(),
            Collaborators {
                replies: replies.clone(),
                fetcher: fetcher.clone(),
                classifier: classifier.clone(),
                notifier: notifier.clone(),
            },
        )
        .with_timeouts(self.timeouts)
        .with_max_download_bytes(self.max_download_bytes);

        TestRuntime {
            runtime,
            replies,
            fetcher,
            classifier,
            notifier,
            ledger,
            _dir: dir,
        }
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{LOGIN_PASSWORD_NODE, LOGIN_USERNAME_NODE};
    use crate::runtime::UpdatePoller;
    use crate::state_machine::transition::{
        ANALYSIS_FAILED, DISCLAIMER, PASSWORD_MISMATCH, PHOTO_REMINDER, TEXT_REMINDER,
        TOO_MANY_ATTEMPTS, UNKNOWN_USERNAME, VERDICT_POSITIVE,
    };
    use tokio_util::sync::CancellationToken;

    const CHAT: ChatId = 42;

    /// Greeting, login, photo upload, wrap-up, looping back to login
    fn triage_graph() -> Vec<Node> {
        vec![
            node("welcome", NodeKind::StartMessage, "Welcome to oral screening.")
                .success(LOGIN_USERNAME_NODE),
            node(LOGIN_USERNAME_NODE, NodeKind::Question, "Username?")
                .success(LOGIN_PASSWORD_NODE)
                .fail(LOGIN_USERNAME_NODE),
            node(LOGIN_PASSWORD_NODE, NodeKind::Question, "Password?")
                .success("photo")
                .fail(LOGIN_PASSWORD_NODE),
            node("photo", NodeKind::StartMessage, "Please send a photo of your mouth.")
                .success("wrap")
                .fail("photo")
                .expect_photo(),
            node("wrap", NodeKind::EndMessage, "Thanks, we're done."),
        ]
    }

    async fn logged_in(rt: &TestRuntime) {
        rt.send_text(CHAT, "hi").await;
        rt.send_text(CHAT, "pat1").await;
        rt.send_text(CHAT, "pw").await;
        assert_eq!(rt.session(CHAT).await.awaiting.as_deref(), Some("photo"));
    }

    #[tokio::test]
    async fn test_scenario_simple_question_loop() {
        let rt = TestRuntime::builder(vec![
            node("start", NodeKind::StartMessage, "Hi").success("q1"),
            node("q1", NodeKind::Question, "Name?").success("end"),
            node("end", NodeKind::EndMessage, "Bye"),
        ])
        .build();

        rt.send_text(CHAT, "hello").await;
        assert_eq!(rt.replies(CHAT), vec!["Hi", "Name?"]);
        assert_eq!(rt.session(CHAT).await.awaiting.as_deref(), Some("q1"));

        rt.send_text(CHAT, "Ada").await;
        assert_eq!(rt.replies(CHAT), vec!["Hi", "Name?", "Bye"]);
        assert_eq!(rt.session(CHAT).await, Session::restarted());
    }

    #[tokio::test]
    async fn test_scenario_unknown_usernames_retry() {
        let rt = TestRuntime::builder(triage_graph()).user("pat1", "pw").build();

        rt.send_text(CHAT, "hi").await;
        rt.send_text(CHAT, "ghost").await;
        rt.send_text(CHAT, "phantom").await;

        let session = rt.session(CHAT).await;
        assert!(session.username.is_none());
        assert_eq!(session.awaiting.as_deref(), Some(LOGIN_USERNAME_NODE));

        let replies = rt.replies(CHAT);
        assert_eq!(replies.iter().filter(|r| *r == UNKNOWN_USERNAME).count(), 2);
        assert!(rt.ledger.entries_for("ghost").await.is_empty());
        assert!(rt.ledger.entries_for("phantom").await.is_empty());
    }

    #[tokio::test]
    async fn test_scenario_positive_photo_recorded() {
        let rt = TestRuntime::builder(triage_graph()).user("pat1", "pw").build();
        rt.classifier.queue_assessment(true, "lesion pattern detected");

        logged_in(&rt).await;
        assert!(rt.session(CHAT).await.authenticated);
        let before = rt.replies(CHAT).len();

        rt.send_photo(CHAT, Some(2048)).await;

        let entries = rt.ledger.entries_for("pat1").await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].verdict);
        assert_eq!(entries[0].rationale, "lesion pattern detected");
        assert_eq!(entries[0].photo_path, format!("assets/file-{CHAT}.jpg"));

        assert_eq!(rt.notifier.published(), vec![(CHAT, None)]);

        let replies = rt.replies(CHAT);
        let new = replies.get(before..).unwrap();
        let verdicts: Vec<&String> = new
            .iter()
            .filter(|r| r.contains(VERDICT_POSITIVE))
            .collect();
        assert_eq!(verdicts.len(), 1);
        assert!(verdicts[0].contains("lesion pattern detected"));
        assert!(verdicts[0].contains(DISCLAIMER));
        assert_eq!(new.last().map(String::as_str), Some("Thanks, we're done."));

        // The end message reset the session
        assert_eq!(rt.session(CHAT).await, Session::restarted());
    }

    #[tokio::test]
    async fn test_wrong_password_loops_on_password() {
        let rt = TestRuntime::builder(triage_graph()).user("pat1", "pw").build();
        rt.send_text(CHAT, "hi").await;
        rt.send_text(CHAT, "pat1").await;
        rt.send_text(CHAT, "nope").await;

        let session = rt.session(CHAT).await;
        assert_eq!(session.username.as_deref(), Some("pat1"));
        assert!(!session.authenticated);
        assert_eq!(session.awaiting.as_deref(), Some(LOGIN_PASSWORD_NODE));
        assert!(rt.replies(CHAT).contains(&PASSWORD_MISMATCH.to_string()));
    }

    #[tokio::test]
    async fn test_password_attempts_are_throttled() {
        let rt = TestRuntime::builder(triage_graph())
            .user("pat1", "pw")
            .auth_limits(2, Duration::from_secs(300))
            .build();
        rt.send_text(CHAT, "hi").await;
        rt.send_text(CHAT, "pat1").await;
        rt.send_text(CHAT, "bad1").await;
        rt.send_text(CHAT, "bad2").await;
        rt.send_text(CHAT, "pw").await;

        let session = rt.session(CHAT).await;
        assert!(!session.authenticated);
        assert_eq!(session.awaiting.as_deref(), Some(LOGIN_PASSWORD_NODE));
        assert!(rt.replies(CHAT).contains(&TOO_MANY_ATTEMPTS.to_string()));
    }

    #[tokio::test]
    async fn test_oversize_photo_is_never_downloaded() {
        let rt = TestRuntime::builder(triage_graph())
            .user("pat1", "pw")
            .max_download_bytes(1000)
            .build();
        logged_in(&rt).await;
        let before = rt.session(CHAT).await;

        rt.send_photo(CHAT, Some(1001)).await;

        assert_eq!(rt.fetcher.calls(), 0);
        assert_eq!(rt.classifier.calls(), 0);
        assert_eq!(rt.replies(CHAT).last().map(String::as_str), Some(PHOTO_REMINDER));
        assert_eq!(rt.session(CHAT).await, before);
    }

    #[tokio::test]
    async fn test_download_failure_reminds_and_keeps_waiting() {
        let rt = TestRuntime::builder(triage_graph()).user("pat1", "pw").build();
        rt.fetcher.queue_error(DownloadError::NotFound);
        logged_in(&rt).await;

        rt.send_photo(CHAT, None).await;

        assert_eq!(rt.fetcher.calls(), 1);
        assert_eq!(rt.classifier.calls(), 0);
        assert!(rt.notifier.published().is_empty());
        assert_eq!(rt.replies(CHAT).last().map(String::as_str), Some(PHOTO_REMINDER));
        assert_eq!(rt.session(CHAT).await.awaiting.as_deref(), Some("photo"));

        // A retry with a working download goes through
        rt.send_photo(CHAT, None).await;
        assert_eq!(rt.classifier.calls(), 1);
    }

    #[tokio::test]
    async fn test_slow_download_times_out() {
        let rt = TestRuntime::builder(triage_graph())
            .user("pat1", "pw")
            .fetcher(MockPhotoFetcher::delayed(Duration::from_millis(200)))
            .timeouts(Timeouts {
                download: Duration::from_millis(20),
                ..Timeouts::default()
            })
            .build();
        logged_in(&rt).await;

        rt.send_photo(CHAT, None).await;

        assert_eq!(rt.classifier.calls(), 0);
        assert_eq!(rt.replies(CHAT).last().map(String::as_str), Some(PHOTO_REMINDER));
    }

    #[tokio::test]
    async fn test_classifier_timeout_takes_fail_path() {
        let rt = TestRuntime::builder(triage_graph())
            .user("pat1", "pw")
            .classifier(MockClassifier::delayed(Duration::from_millis(200)))
            .timeouts(Timeouts {
                classify: Duration::from_millis(20),
                ..Timeouts::default()
            })
            .build();
        logged_in(&rt).await;

        rt.send_photo(CHAT, None).await;

        let replies = rt.replies(CHAT);
        let tail = replies.get(replies.len() - 2..).unwrap();
        assert_eq!(tail, [ANALYSIS_FAILED, "Please send a photo of your mouth."]);
        assert!(rt.ledger.entries_for("pat1").await.is_empty());
        assert_eq!(rt.session(CHAT).await.awaiting.as_deref(), Some("photo"));
    }

    #[tokio::test]
    async fn test_slow_notifier_does_not_block_turn() {
        let rt = TestRuntime::builder(triage_graph())
            .user("pat1", "pw")
            .notifier(RecordingNotifier::delayed(Duration::from_millis(200)))
            .timeouts(Timeouts {
                notify: Duration::from_millis(20),
                ..Timeouts::default()
            })
            .build();
        rt.classifier.queue_assessment(true, "lesion pattern detected");
        logged_in(&rt).await;

        let started = std::time::Instant::now();
        rt.send_photo(CHAT, None).await;
        assert!(started.elapsed() < Duration::from_millis(200));

        assert_eq!(rt.notifier.published(), vec![(CHAT, None)]);
        assert_eq!(rt.classifier.calls(), 1);
        assert_eq!(rt.ledger.entries_for("pat1").await.len(), 1);
        let replies = rt.replies(CHAT);
        assert!(replies.iter().any(|r| r.contains(VERDICT_POSITIVE)));
        assert_eq!(replies.last().map(String::as_str), Some("Thanks, we're done."));
        assert_eq!(rt.session(CHAT).await, Session::restarted());
    }

    #[tokio::test]
    async fn test_classifier_error_takes_fail_path() {
        let rt = TestRuntime::builder(triage_graph()).user("pat1", "pw").build();
        rt.classifier
            .queue_error(ClassifierError::server_error("Server error: overloaded"));
        logged_in(&rt).await;

        rt.send_photo(CHAT, None).await;

        assert!(rt.replies(CHAT).contains(&ANALYSIS_FAILED.to_string()));
        assert!(rt.ledger.entries_for("pat1").await.is_empty());
        // The notifier fires once the photo is retrieved, before classification
        assert_eq!(rt.notifier.published().len(), 1);
    }

    #[tokio::test]
    async fn test_photo_on_plain_question_is_ignored() {
        let rt = TestRuntime::builder(triage_graph()).user("pat1", "pw").build();
        rt.send_text(CHAT, "hi").await;

        rt.send_photo(CHAT, Some(10)).await;

        assert_eq!(rt.fetcher.calls(), 0);
        assert_eq!(rt.classifier.calls(), 0);
        assert_eq!(rt.replies(CHAT).last().map(String::as_str), Some(TEXT_REMINDER));
        assert_eq!(
            rt.session(CHAT).await.awaiting.as_deref(),
            Some(LOGIN_USERNAME_NODE)
        );
    }

    #[tokio::test]
    async fn test_photo_without_login_is_not_recorded() {
        let rt = TestRuntime::builder(vec![
            node("photo", NodeKind::StartMessage, "Send a photo")
                .success("done")
                .expect_photo(),
            node("done", NodeKind::EndMessage, "Done"),
        ])
        .build();
        rt.classifier.queue_assessment(false, "healthy tissue");

        rt.send_text(CHAT, "hi").await;
        rt.send_photo(CHAT, None).await;

        assert_eq!(rt.classifier.calls(), 1);
        assert!(rt.replies(CHAT).iter().any(|r| r.contains("healthy tissue")));
        assert_eq!(rt.replies(CHAT).last().map(String::as_str), Some("Done"));
    }

    #[tokio::test]
    async fn test_reply_failures_do_not_stall_the_turn() {
        let rt = TestRuntime::builder(triage_graph())
            .user("pat1", "pw")
            .replies(RecordingReplies::failing())
            .build();
        rt.send_text(CHAT, "hi").await;
        rt.send_text(CHAT, "pat1").await;

        let session = rt.session(CHAT).await;
        assert_eq!(session.username.as_deref(), Some("pat1"));
        assert_eq!(session.awaiting.as_deref(), Some(LOGIN_PASSWORD_NODE));
    }

    #[tokio::test]
    async fn test_chats_are_independent() {
        let rt = TestRuntime::builder(triage_graph()).user("pat1", "pw").build();
        rt.send_text(1, "hi").await;
        rt.send_text(1, "pat1").await;
        rt.send_text(2, "hi").await;

        assert_eq!(rt.session(1).await.username.as_deref(), Some("pat1"));
        assert!(rt.session(2).await.username.is_none());
        assert_eq!(rt.replies(2), vec!["Welcome to oral screening.", "Username?"]);
    }

    #[tokio::test]
    async fn test_concurrent_messages_for_one_chat_are_serialized() {
        let rt = Arc::new(
            TestRuntime::builder(vec![
                node("start", NodeKind::StartMessage, "Hi").success("q1"),
                node("q1", NodeKind::Question, "One?").success("q2"),
                node("q2", NodeKind::Question, "Two?").success("q3"),
                node("q3", NodeKind::Question, "Three?"),
            ])
            .build(),
        );
        rt.send_text(CHAT, "hello").await;

        let a = {
            let rt = rt.clone();
            tokio::spawn(async move { rt.send_text(CHAT, "first").await })
        };
        let b = {
            let rt = rt.clone();
            tokio::spawn(async move { rt.send_text(CHAT, "second").await })
        };
        a.await.unwrap();
        b.await.unwrap();

        let session = rt.session(CHAT).await;
        assert_eq!(session.awaiting.as_deref(), Some("q3"));
        assert_eq!(session.answers.len(), 2);
    }

    // ========================================================================
    // Poller
    // ========================================================================

    #[tokio::test]
    async fn test_poll_once_advances_offset_past_every_update() {
        let source = Arc::new(MockUpdateSource::default());
        let handler = Arc::new(RecordingHandler::default());
        let poller = UpdatePoller::new(source.clone(), handler.clone(), Duration::from_millis(1));

        source.queue_batch(vec![
            update(5, Some(InboundMessage::text(CHAT, "a"))),
            update(6, None),
        ]);
        source.queue_error(TransportError::Status { status: 502 });
        source.queue_batch(vec![update(7, Some(InboundMessage::text(CHAT, "b")))]);

        let mut offset = 0;
        assert_eq!(poller.poll_once(&mut offset).await.unwrap(), 2);
        assert_eq!(offset, 7);

        assert!(poller.poll_once(&mut offset).await.is_err());
        assert_eq!(offset, 7);

        assert_eq!(poller.poll_once(&mut offset).await.unwrap(), 1);
        assert_eq!(offset, 8);

        assert_eq!(source.offsets(), vec![0, 7, 7]);
        let texts: Vec<String> = handler.handled().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_run_retries_after_failure_until_cancelled() {
        let source = Arc::new(MockUpdateSource::default());
        let handler = Arc::new(RecordingHandler::default());
        source.queue_error(TransportError::Status { status: 500 });
        source.queue_error(TransportError::Api {
            description: "Bad Gateway".to_string(),
        });
        source.queue_batch(vec![update(1, Some(InboundMessage::text(CHAT, "late")))]);

        let poller = Arc::new(UpdatePoller::new(
            source.clone(),
            handler.clone(),
            Duration::from_millis(5),
        ));
        let cancel = CancellationToken::new();
        let task = {
            let poller = poller.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.run(cancel).await })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while handler.handled().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(handler.handled().len(), 1);
        let offsets = source.offsets();
        assert_eq!(offsets.get(..3), Some([0, 0, 0].as_slice()));
        assert!(offsets.iter().skip(3).all(|o| *o == 2));
    }
}
