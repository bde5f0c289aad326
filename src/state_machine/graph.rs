//! Conversation graph: the scripted nodes a chat moves through

use crate::config::{read_json, LoadError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Kind of conversation step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    StartMessage,
    Question,
    EndMessage,
}

/// One step of the scripted conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub success_transition: Option<String>,
    #[serde(default)]
    pub fail_transition: Option<String>,
    #[serde(default)]
    pub expect_photo: bool,
}

impl Node {
    /// Target of the success edge, ignoring empty pointers
    pub fn success_target(&self) -> Option<&str> {
        self.success_transition.as_deref().filter(|t| !t.is_empty())
    }

    /// Target of the fail edge, ignoring empty pointers
    pub fn fail_target(&self) -> Option<&str> {
        self.fail_transition.as_deref().filter(|t| !t.is_empty())
    }

    pub fn target(&self, success: bool) -> Option<&str> {
        if success {
            self.success_target()
        } else {
            self.fail_target()
        }
    }
}

/// On-disk shape of the conversation document
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationFile {
    pub messages: Vec<Node>,
}

/// Immutable node map plus the selected start node
#[derive(Debug, Clone)]
pub struct ConversationGraph {
    nodes: HashMap<String, Node>,
    start_id: String,
}

impl ConversationGraph {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let file: ConversationFile = read_json(path)?;
        let graph = Self::from_nodes(file.messages)
            .ok_or_else(|| LoadError::invalid(path, "conversation defines no messages"))?;
        tracing::info!(
            path = %path.display(),
            nodes = graph.node_count(),
            start = %graph.start_id,
            "Conversation graph loaded"
        );
        Ok(graph)
    }

    /// Build a graph from nodes in document order.
    ///
    /// The start node is the first `start_message`, or the first node when
    /// there is none. A later node with a duplicate id replaces the earlier one.
    /// Returns `None` for an empty node list.
    pub fn from_nodes(nodes: Vec<Node>) -> Option<Self> {
        let start_id = nodes
            .iter()
            .find(|n| n.kind == NodeKind::StartMessage)
            .or_else(|| nodes.first())?
            .id
            .clone();

        let mut map = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if let Some(previous) = map.insert(node.id.clone(), node) {
                tracing::warn!(node = %previous.id, "Duplicate node id, later definition wins");
            }
        }

        Some(Self {
            nodes: map,
            start_id,
        })
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn start_id(&self) -> &str {
        &self.start_id
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
