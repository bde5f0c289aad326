//! Conversation state machine
//!
//! Elm-style: a pure transition function over per-chat sessions, producing
//! effects that the runtime executes.

mod effect;
pub mod event;
pub mod graph;
pub mod state;
pub(crate) mod transition;


pub use effect::{Effect, Notice};
pub use event::{Event, PasswordCheck};
pub use graph::{ConversationGraph, Node, NodeKind};
pub use state::{ChatId, ConvContext, InboundMessage, PhotoRef, Session};
pub use transition::transition;
