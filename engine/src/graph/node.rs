//! The node set and edge table of the Workflow Graph (§4.5), modeled the same way as a
//! phase enum with an explicit per-phase transition allow-list: transitions not named
//! here are rejected, fail-closed, rather than silently permitted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    N0Ingest,
    N1Draft,
    N2Review,
    N3HumanEdit,
    N4File,
    N5Finalize,
    NError,
}

impl Node {
    pub fn as_str(self) -> &'static str {
        match self {
            Node::N0Ingest => "N0_Ingest",
            Node::N1Draft => "N1_Draft",
            Node::N2Review => "N2_Review",
            Node::N3HumanEdit => "N3_HumanEdit",
            Node::N4File => "N4_File",
            Node::N5Finalize => "N5_Finalize",
            Node::NError => "N_Error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Node::N5Finalize | Node::NError)
    }

    /// The allow-list of nodes this node may transition to (§4.5's edge table). "Paused"
    /// is not represented here: it is not a node but the cooperative interrupt that
    /// unwinds the stack before any of these transitions is recorded.
    pub fn valid_transitions(self) -> &'static [Node] {
        match self {
            Node::N0Ingest => &[Node::N1Draft],
            Node::N1Draft => &[Node::N2Review],
            Node::N2Review => &[Node::N3HumanEdit, Node::N1Draft, Node::NError],
            Node::N3HumanEdit => &[Node::N4File, Node::N5Finalize, Node::N1Draft, Node::NError],
            Node::N4File => &[Node::N5Finalize],
            Node::N5Finalize => &[],
            Node::NError => &[],
        }
    }

    pub fn can_transition_to(self, target: Node) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Parses a `next_node` string as persisted in [`crate::model::WorkflowState`] back
    /// into a `Node`. Returns `None` for anything not in the fixed node set (fail-closed).
    pub fn parse(s: &str) -> Option<Node> {
        match s {
            "N0_Ingest" => Some(Node::N0Ingest),
            "N1_Draft" => Some(Node::N1Draft),
            "N2_Review" => Some(Node::N2Review),
            "N3_HumanEdit" => Some(Node::N3HumanEdit),
            "N4_File" => Some(Node::N4File),
            "N5_Finalize" => Some(Node::N5Finalize),
            "N_Error" => Some(Node::NError),
            _ => None,
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recorded edge traversal, kept for forensic replay alongside the checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub from: Node,
    pub to: Node,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub reason: String,
}
