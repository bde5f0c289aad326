//! Pure state transition function
//!
//! Given a session, its context and an event, computes the next session and
//! the effects the runtime must execute. Auto-chaining edges are followed
//! iteratively inside a single transition, bounded by [`MAX_CHAIN_STEPS`].

use super::effect::{Effect, Notice};
use super::event::{Event, PasswordCheck};
use super::graph::{ConversationGraph, Node, NodeKind};
use super::state::{ConvContext, InboundMessage, Session};
use crate::auth::{LOGIN_PASSWORD_NODE, LOGIN_USERNAME_NODE};
use std::path::PathBuf;

/// Upper bound on nodes entered by one auto-chaining run
pub const MAX_CHAIN_STEPS: usize = 32;

pub const TEXT_REMINDER: &str = "Please reply with text so we can continue.";
pub const PHOTO_REMINDER: &str =
    "I need a clear photo of the inside of your mouth to continue. Please try sending an image.";
pub const UNKNOWN_USERNAME: &str = "I couldn't find that username. Please try again.";
pub const USERNAME_FIRST: &str = "Please provide your username before sending the password.";
pub const PASSWORD_MISMATCH: &str = "The password did not match. Please try again.";
pub const TOO_MANY_ATTEMPTS: &str =
    "Too many failed attempts. Please wait a few minutes and try again.";
pub const ANALYSIS_FAILED: &str =
    "I couldn't analyse that photo. Please try again with a clearer picture or lighting.";
pub const VERDICT_POSITIVE: &str = "Yes. The image may show signs consistent with oral cancer.";
pub const VERDICT_NEGATIVE: &str =
    "No. The image does not appear to show signs consistent with oral cancer.";
pub const DISCLAIMER: &str = "This is an AI assessment and not a medical diagnosis.\nPlease consult a qualified professional for concerns.";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub session: Session,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            effects: vec![],
        }
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

pub fn verdict_text(is_positive: bool) -> &'static str {
    if is_positive {
        VERDICT_POSITIVE
    } else {
        VERDICT_NEGATIVE
    }
}

pub fn assessment_reply(is_positive: bool, rationale: &str) -> String {
    format!(
        "Model's assessment: {}\n\nRationale: {rationale}\n\n{DISCLAIMER}",
        verdict_text(is_positive)
    )
}

/// Pure transition function: no I/O, same inputs always give the same outputs.
pub fn transition(session: &Session, context: &ConvContext, event: Event) -> TransitionResult {
    let mut turn = Turn::new(&context.graph, session.clone());

    match event {
        Event::Message(message) => turn.on_message(message),
        Event::UsernameChecked {
            node_id,
            username,
            known,
        } => turn.on_username_checked(&node_id, username, known),
        Event::PasswordChecked { node_id, outcome } => turn.on_password_checked(&node_id, outcome),
        Event::PhotoFetched { node_id, path } => turn.on_photo_fetched(node_id, path),
        Event::PhotoUnavailable { node_id } => turn.on_photo_unavailable(&node_id),
        Event::PhotoClassified {
            node_id,
            path,
            is_positive,
            rationale,
        } => turn.on_photo_classified(&node_id, path, is_positive, rationale),
        Event::ClassificationFailed { node_id } => turn.on_classification_failed(&node_id),
    }

    TransitionResult::new(turn.session).with_effects(turn.effects)
}

/// Working state of one transition
struct Turn<'a> {
    graph: &'a ConversationGraph,
    session: Session,
    effects: Vec<Effect>,
}

impl<'a> Turn<'a> {
    fn new(graph: &'a ConversationGraph, session: Session) -> Self {
        Self {
            graph,
            session,
            effects: Vec::new(),
        }
    }

    fn reply(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.effects.push(Effect::reply(text));
        }
    }

    fn note(&mut self, notice: Notice) {
        self.effects.push(Effect::note(notice));
    }

    // ============================================================
    // Inbound messages
    // ============================================================

    fn on_message(&mut self, message: InboundMessage) {
        let graph = self.graph;

        // The first message of a chat only bootstraps the conversation
        if !self.session.started {
            self.advance(graph.start_id());
            return;
        }

        let Some(awaiting) = self.session.awaiting.clone() else {
            // Idle after a start or end node without an outgoing edge
            self.advance(graph.start_id());
            return;
        };

        let Some(node) = graph.get(&awaiting) else {
            self.note(Notice::UnknownNode { node_id: awaiting });
            return;
        };

        if node.kind == NodeKind::Question {
            let text = message.text.trim();
            if text.is_empty() {
                self.reply(TEXT_REMINDER);
                return;
            }
            self.on_answer(awaiting, text.to_string());
            return;
        }

        if node.expect_photo {
            match message.photo {
                Some(photo) => self.effects.push(Effect::FetchPhoto {
                    node_id: awaiting,
                    photo,
                }),
                None => self.reply(PHOTO_REMINDER),
            }
            return;
        }

        self.note(Notice::Unhandled { awaiting });
    }

    /// Route a non-empty answer to the authentication gate or generic capture
    fn on_answer(&mut self, node_id: String, answer: String) {
        if node_id == LOGIN_USERNAME_NODE {
            self.effects.push(Effect::CheckUsername {
                node_id,
                username: answer,
            });
        } else if node_id == LOGIN_PASSWORD_NODE {
            match self.session.bound_username() {
                Some(username) => {
                    let username = username.to_string();
                    self.effects.push(Effect::VerifyPassword {
                        node_id,
                        username,
                        password: answer,
                    });
                }
                None => {
                    self.reply(USERNAME_FIRST);
                    self.apply_transition(&node_id, false);
                }
            }
        } else {
            self.session.answers.insert(node_id.clone(), answer);
            self.apply_transition(&node_id, true);
        }
    }

    // ============================================================
    // Authentication results
    // ============================================================

    fn on_username_checked(&mut self, node_id: &str, username: String, known: bool) {
        if !self.expecting(node_id) {
            return;
        }
        if known {
            self.session.username = Some(username);
            self.apply_transition(node_id, true);
        } else {
            self.reply(UNKNOWN_USERNAME);
            self.apply_transition(node_id, false);
        }
    }

    fn on_password_checked(&mut self, node_id: &str, outcome: PasswordCheck) {
        if !self.expecting(node_id) {
            return;
        }
        match outcome {
            PasswordCheck::Accepted => {
                self.session.authenticated = true;
                self.apply_transition(node_id, true);
            }
            PasswordCheck::Rejected => {
                self.reply(PASSWORD_MISMATCH);
                self.apply_transition(node_id, false);
            }
            PasswordCheck::Throttled => {
                self.reply(TOO_MANY_ATTEMPTS);
                self.apply_transition(node_id, false);
            }
        }
    }

    // ============================================================
    // Photo pipeline results
    // ============================================================

    fn on_photo_fetched(&mut self, node_id: String, path: PathBuf) {
        if !self.expecting(&node_id) {
            return;
        }
        self.effects.push(Effect::NotifyProcessed { path: None });
        self.effects.push(Effect::ClassifyPhoto { node_id, path });
    }

    fn on_photo_unavailable(&mut self, node_id: &str) {
        if !self.expecting(node_id) {
            return;
        }
        self.reply(PHOTO_REMINDER);
    }

    fn on_photo_classified(
        &mut self,
        node_id: &str,
        path: PathBuf,
        is_positive: bool,
        rationale: String,
    ) {
        if !self.expecting(node_id) {
            return;
        }

        self.session
            .answers
            .insert(node_id.to_string(), verdict_text(is_positive).to_string());

        let reply = assessment_reply(is_positive, &rationale);
        match self.session.bound_username() {
            Some(username) => {
                let username = username.to_string();
                self.effects.push(Effect::RecordDiagnosis {
                    username,
                    path,
                    verdict: is_positive,
                    rationale,
                });
            }
            None => self.note(Notice::DiagnosisSkipped),
        }

        self.reply(reply);
        self.apply_transition(node_id, true);
    }

    fn on_classification_failed(&mut self, node_id: &str) {
        if !self.expecting(node_id) {
            return;
        }
        self.reply(ANALYSIS_FAILED);
        self.apply_transition(node_id, false);
    }

    /// Pipeline results only apply while the chat still awaits their node
    fn expecting(&mut self, node_id: &str) -> bool {
        if self.session.is_awaiting(node_id) {
            true
        } else {
            self.note(Notice::StaleResult {
                node_id: node_id.to_string(),
            });
            false
        }
    }

    // ============================================================
    // Graph traversal
    // ============================================================

    /// Follow the success or fail edge of `node_id` after its input was judged
    fn apply_transition(&mut self, node_id: &str, success: bool) {
        if self.session.is_awaiting(node_id) {
            self.session.awaiting = None;
        }

        let graph = self.graph;
        let Some(node) = graph.get(node_id) else {
            self.note(Notice::UnknownNode {
                node_id: node_id.to_string(),
            });
            return;
        };

        match node.target(success) {
            Some(target) => self.advance(target),
            None => self.note(Notice::NoTransition {
                node_id: node_id.to_string(),
                success,
            }),
        }
    }

    /// Enter `node_id` and keep entering auto-chained successors
    fn advance(&mut self, node_id: &str) {
        let graph = self.graph;
        let mut next = Some(node_id);
        let mut steps = 0;

        while let Some(id) = next {
            if steps == MAX_CHAIN_STEPS {
                self.note(Notice::ChainLimit {
                    node_id: id.to_string(),
                    steps,
                });
                return;
            }
            steps += 1;

            let Some(node) = graph.get(id) else {
                self.note(Notice::UnknownNode {
                    node_id: id.to_string(),
                });
                return;
            };
            next = self.enter(node);
        }
    }

    /// Execute a node's behavior, returning the node to chain into, if any
    fn enter(&mut self, node: &'a Node) -> Option<&'a str> {
        match node.kind {
            NodeKind::StartMessage => {
                self.session.started = true;
                self.reply(node.text.as_str());
                if node.expect_photo {
                    self.session.awaiting = Some(node.id.clone());
                    return None;
                }
                self.session.awaiting = None;
                node.success_target()
            }
            NodeKind::Question => {
                self.session.awaiting = Some(node.id.clone());
                self.reply(node.text.as_str());
                None
            }
            NodeKind::EndMessage => {
                self.reply(node.text.as_str());
                self.session = Session::restarted();
                node.success_target()
            }
        }
    }
}
