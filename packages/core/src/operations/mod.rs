//! Structural Mutation Protocol
//!
//! The six structural transitions of a node, applied to a [`TreeWorkspace`]:
//!
//! | Mutation      | Transition                         |
//! |---------------|------------------------------------|
//! | `Create`      | new node, root or attached         |
//! | `Move`        | `Attached(P)`/`Root` → `Attached(P')` |
//! | `Unlink`      | `Attached(..)` → `Root`            |
//! | `AddParent`   | gains one more incoming edge       |
//! | `RemoveParent`| loses one incoming edge            |
//! | `Delete`      | node and its downward closure removed |
//!
//! Each transition validates all of its preconditions before changing
//! anything and reports the first violated one as a [`MutationError`].
//!
//! [`TreeWorkspace`]: crate::structure::TreeWorkspace

pub mod error;
mod protocol;


pub use error::{EntityKind, MutationError};

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{NodeView, PersonProfile, Position};
use crate::structure::GenerationChange;

/// Parameters for creating a node
///
/// `parent_ids` may be empty (the node becomes a root). Otherwise the first
/// entry is the primary parent and the rest are linked as additional parents.
#[derive(Debug, Clone, Default)]
pub struct CreateNodeParams {
    /// Optional caller-chosen id; a UUID v4 is generated when absent
    pub id: Option<String>,
    pub parent_ids: Vec<String>,
    /// Sibling in the primary parent's list (or the root list) to insert after
    pub insert_after: Option<String>,
    pub profile: PersonProfile,
    pub position: Position,
    /// Free-form metadata, must be a JSON object when given
    pub properties: Option<Value>,
}

impl CreateNodeParams {
    pub fn new(profile: PersonProfile) -> Self {
        Self {
            profile,
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_ids.push(parent_id.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn insert_after(mut self, sibling_id: impl Into<String>) -> Self {
        self.insert_after = Some(sibling_id.into());
        self
    }
}

/// One structural transition
#[derive(Debug, Clone)]
pub enum Mutation {
    Create(CreateNodeParams),
    Move {
        node_id: String,
        new_parent_id: String,
        insert_after: Option<String>,
    },
    Unlink {
        node_id: String,
    },
    AddParent {
        node_id: String,
        parent_id: String,
    },
    RemoveParent {
        node_id: String,
        parent_id: String,
    },
    Delete {
        node_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Move,
    Unlink,
    AddParent,
    RemoveParent,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationKind::Create => "create",
            MutationKind::Move => "move",
            MutationKind::Unlink => "unlink",
            MutationKind::AddParent => "add_parent",
            MutationKind::RemoveParent => "remove_parent",
            MutationKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Create(_) => MutationKind::Create,
            Mutation::Move { .. } => MutationKind::Move,
            Mutation::Unlink { .. } => MutationKind::Unlink,
            Mutation::AddParent { .. } => MutationKind::AddParent,
            Mutation::RemoveParent { .. } => MutationKind::RemoveParent,
            Mutation::Delete { .. } => MutationKind::Delete,
        }
    }

    /// Every node id the mutation refers to
    ///
    /// Ids that are not part of the loaded tree must be resolved by the caller
    /// so cross-tree references can be told apart from missing ones.
    pub fn referenced_ids(&self) -> Vec<&str> {
        match self {
            Mutation::Create(params) => params
                .id
                .iter()
                .chain(params.parent_ids.iter())
                .chain(params.insert_after.iter())
                .map(String::as_str)
                .collect(),
            Mutation::Move {
                node_id,
                new_parent_id,
                insert_after,
            } => std::iter::once(node_id)
                .chain(std::iter::once(new_parent_id))
                .chain(insert_after.iter())
                .map(String::as_str)
                .collect(),
            Mutation::Unlink { node_id } | Mutation::Delete { node_id } => vec![node_id.as_str()],
            Mutation::AddParent { node_id, parent_id }
            | Mutation::RemoveParent { node_id, parent_id } => {
                vec![node_id.as_str(), parent_id.as_str()]
            }
        }
    }

    /// The node the mutation is about, if it already exists
    pub fn subject(&self) -> Option<&str> {
        match self {
            Mutation::Create(params) => params.id.as_deref(),
            Mutation::Move { node_id, .. }
            | Mutation::Unlink { node_id }
            | Mutation::AddParent { node_id, .. }
            | Mutation::RemoveParent { node_id, .. }
            | Mutation::Delete { node_id } => Some(node_id),
        }
    }
}

/// Result of a committed transition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationOutcome {
    /// The node after the mutation (before removal, for `Delete`)
    pub node: NodeView,
    /// Every node whose generation changed, in cascade order
    pub regenerated: Vec<GenerationChange>,
    /// Ids removed by a `Delete`, breadth-first from the deleted node
    pub deleted: Vec<String>,
}

impl MutationOutcome {
    pub(crate) fn of(node: NodeView) -> Self {
        Self {
            node,
            regenerated: Vec::new(),
            deleted: Vec::new(),
        }
    }
}
