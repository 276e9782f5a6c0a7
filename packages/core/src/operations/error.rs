//! Error types for the structural mutation protocol
//!
//! Every precondition of a mutation is checked before anything is changed, so
//! a returned error always leaves the tree exactly as it was.

use std::fmt;

use thiserror::Error;

use crate::models::ValidationError;
use crate::structure::StructureError;

/// What a `NotFound` error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Tree,
    Node,
    /// A node referenced as a parent
    Parent,
    /// A node referenced as the sibling to insert after
    Sibling,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::Tree => "Tree",
            EntityKind::Node => "Node",
            EntityKind::Parent => "Parent node",
            EntityKind::Sibling => "Sibling node",
        };
        f.write_str(label)
    }
}

/// Errors that can occur while applying a structural mutation
///
/// # Examples
///
/// ```rust
/// use codetree_core::operations::MutationError;
///
/// let err = MutationError::circular_reference("child", "grandchild");
/// assert_eq!(
///     err.to_string(),
///     "Circular reference: 'grandchild' is a descendant of 'child'"
/// );
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: EntityKind, id: String },

    /// Malformed input, or a request that can never succeed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Parent belongs to a different tree than the node
    #[error("Cannot link node '{node_id}' to '{parent_id}' in a different tree ('{parent_tree_id}')")]
    CrossTreeViolation {
        node_id: String,
        parent_id: String,
        parent_tree_id: String,
    },

    /// The new edge would make the node its own ancestor
    #[error("Circular reference: '{parent_id}' is a descendant of '{node_id}'")]
    CircularReference { node_id: String, parent_id: String },

    #[error("Node '{node_id}' is already linked to parent '{parent_id}'")]
    AlreadyLinked { node_id: String, parent_id: String },

    /// `parent_id` is `None` when the node has no parents at all
    #[error("{}", not_linked_message(.node_id, .parent_id))]
    NotLinked {
        node_id: String,
        parent_id: Option<String>,
    },

    /// Broken invariant in loaded or computed state
    #[error("Internal error: {0}")]
    Internal(String),
}

fn not_linked_message(node_id: &str, parent_id: &Option<String>) -> String {
    match parent_id {
        Some(parent) => format!("Node '{}' is not linked to parent '{}'", node_id, parent),
        None => format!("Node '{}' has no parent", node_id),
    }
}

impl MutationError {
    pub fn tree_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: EntityKind::Tree,
            id: id.into(),
        }
    }

    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: EntityKind::Node,
            id: id.into(),
        }
    }

    pub fn parent_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: EntityKind::Parent,
            id: id.into(),
        }
    }

    pub fn sibling_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: EntityKind::Sibling,
            id: id.into(),
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn cross_tree(node_id: &str, parent_id: &str, parent_tree_id: &str) -> Self {
        Self::CrossTreeViolation {
            node_id: node_id.to_string(),
            parent_id: parent_id.to_string(),
            parent_tree_id: parent_tree_id.to_string(),
        }
    }

    pub fn circular_reference(node_id: &str, parent_id: &str) -> Self {
        Self::CircularReference {
            node_id: node_id.to_string(),
            parent_id: parent_id.to_string(),
        }
    }

    pub fn already_linked(node_id: &str, parent_id: &str) -> Self {
        Self::AlreadyLinked {
            node_id: node_id.to_string(),
            parent_id: parent_id.to_string(),
        }
    }

    pub fn not_linked(node_id: &str, parent_id: Option<&str>) -> Self {
        Self::NotLinked {
            node_id: node_id.to_string(),
            parent_id: parent_id.map(str::to_string),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<StructureError> for MutationError {
    fn from(err: StructureError) -> Self {
        MutationError::Internal(err.to_string())
    }
}

impl From<ValidationError> for MutationError {
    fn from(err: ValidationError) -> Self {
        MutationError::InvalidArgument(err.to_string())
    }
}
