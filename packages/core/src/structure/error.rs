//! Structure Error Types
//!
//! Errors raised by the pure data layer (graph store and parent relation).
//! They carry no business meaning; the mutation protocol validates every
//! precondition first, so one of these after validation means the loaded
//! structure was malformed.

use thiserror::Error;

/// Label used for the root list in edge messages
pub(crate) fn describe_parent(parent: &Option<String>) -> String {
    match parent {
        Some(id) => format!("'{}'", id),
        None => "the root list".to_string(),
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    /// The edge (or link) already exists
    #[error("'{child}' is already linked under {}", describe_parent(.parent))]
    AlreadyLinked {
        parent: Option<String>,
        child: String,
    },

    /// The edge (or link) does not exist
    #[error("'{child}' is not linked under {}", describe_parent(.parent))]
    NotLinked {
        parent: Option<String>,
        child: String,
    },

    /// A node cannot be linked under itself
    #[error("'{node_id}' cannot be linked under itself")]
    SelfLink { node_id: String },

    /// A referenced node (sibling anchor, child) is unknown
    #[error("Unknown node '{node_id}'")]
    UnknownNode { node_id: String },

    /// Loaded or computed state violates a structural invariant
    #[error("Malformed structure: {0}")]
    MalformedStructure(String),
}

impl StructureError {
    pub fn already_linked(parent: Option<&str>, child: &str) -> Self {
        Self::AlreadyLinked {
            parent: parent.map(str::to_string),
            child: child.to_string(),
        }
    }

    pub fn not_linked(parent: Option<&str>, child: &str) -> Self {
        Self::NotLinked {
            parent: parent.map(str::to_string),
            child: child.to_string(),
        }
    }

    pub fn unknown_node(node_id: impl Into<String>) -> Self {
        Self::UnknownNode {
            node_id: node_id.into(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedStructure(msg.into())
    }
}
