//! Multi-Parent Consistency Layer
//!
//! [`ParentRelation`] is the set of `(node, parent)` pairs with the order in
//! which each pair was linked. On top of it, the functions in this module keep
//! a node's `primary_parent_id` consistent with the relation:
//!
//! - the primary parent is always one of the node's parents, or
//! - the node has no parents and no primary parent.
//!
//! When the primary link is removed the oldest remaining link becomes the new
//! primary, so repeated runs always derive the same generations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::StructureError;
use crate::models::Node;

/// One persisted `(node, parent)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentLink {
    pub node_id: String,
    pub parent_id: String,
    /// Link order within the tree; lower is older
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LinkEntry {
    parent_id: String,
    seq: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentRelation {
    /// Per node, its parents sorted oldest link first
    links: BTreeMap<String, Vec<LinkEntry>>,
    next_seq: u64,
}

impl ParentRelation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted links, rejecting self-links and duplicate pairs
    pub fn from_links(links: Vec<ParentLink>) -> Result<Self, StructureError> {
        let mut relation = Self::new();
        for link in links {
            if link.node_id == link.parent_id {
                return Err(StructureError::malformed(format!(
                    "node '{}' is linked as its own parent",
                    link.node_id
                )));
            }
            let entries = relation.links.entry(link.node_id.clone()).or_default();
            if entries.iter().any(|e| e.parent_id == link.parent_id) {
                return Err(StructureError::malformed(format!(
                    "duplicate parent link '{}' -> '{}'",
                    link.parent_id, link.node_id
                )));
            }
            entries.push(LinkEntry {
                parent_id: link.parent_id,
                seq: link.seq,
            });
            relation.next_seq = relation.next_seq.max(link.seq + 1);
        }
        for entries in relation.links.values_mut() {
            entries.sort_by_key(|e| e.seq);
        }
        Ok(relation)
    }

    /// All links, oldest first
    pub fn to_links(&self) -> Vec<ParentLink> {
        let mut links: Vec<ParentLink> = self
            .links
            .iter()
            .flat_map(|(node_id, entries)| {
                entries.iter().map(move |e| ParentLink {
                    node_id: node_id.clone(),
                    parent_id: e.parent_id.clone(),
                    seq: e.seq,
                })
            })
            .collect();
        links.sort_by_key(|l| l.seq);
        links
    }

    /// Parents of `node_id`, oldest link first
    pub fn parents_of(&self, node_id: &str) -> Vec<&str> {
        self.links
            .get(node_id)
            .map(|entries| entries.iter().map(|e| e.parent_id.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, node_id: &str, parent_id: &str) -> bool {
        self.links
            .get(node_id)
            .map(|entries| entries.iter().any(|e| e.parent_id == parent_id))
            .unwrap_or(false)
    }

    pub fn has_parents(&self, node_id: &str) -> bool {
        self.links.get(node_id).is_some_and(|e| !e.is_empty())
    }

    pub fn oldest_parent(&self, node_id: &str) -> Option<&str> {
        self.links
            .get(node_id)
            .and_then(|entries| entries.first())
            .map(|e| e.parent_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.links.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a new link. Fails with `AlreadyLinked` if the pair exists.
    pub fn add_parent(&mut self, node_id: &str, parent_id: &str) -> Result<u64, StructureError> {
        if node_id == parent_id {
            return Err(StructureError::SelfLink {
                node_id: node_id.to_string(),
            });
        }
        if self.contains(node_id, parent_id) {
            return Err(StructureError::already_linked(Some(parent_id), node_id));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.links
            .entry(node_id.to_string())
            .or_default()
            .push(LinkEntry {
                parent_id: parent_id.to_string(),
                seq,
            });
        Ok(seq)
    }

    /// Remove one link. Fails with `NotLinked` if the pair does not exist.
    pub fn remove_parent(&mut self, node_id: &str, parent_id: &str) -> Result<(), StructureError> {
        let entries = self
            .links
            .get_mut(node_id)
            .ok_or_else(|| StructureError::not_linked(Some(parent_id), node_id))?;
        let position = entries
            .iter()
            .position(|e| e.parent_id == parent_id)
            .ok_or_else(|| StructureError::not_linked(Some(parent_id), node_id))?;
        entries.remove(position);
        if entries.is_empty() {
            self.links.remove(node_id);
        }
        Ok(())
    }

    /// Remove every link of `node_id` as a child. Returns the removed parents.
    pub fn clear_parents(&mut self, node_id: &str) -> Vec<String> {
        self.links
            .remove(node_id)
            .map(|entries| entries.into_iter().map(|e| e.parent_id).collect())
            .unwrap_or_default()
    }

    /// Remove every link touching `node_id`, as child or as parent
    pub fn remove_node(&mut self, node_id: &str) {
        self.links.remove(node_id);
        for entries in self.links.values_mut() {
            entries.retain(|e| e.parent_id != node_id);
        }
        self.links.retain(|_, entries| !entries.is_empty());
    }
}

/// Outcome of removing a parent from a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryChange {
    pub previous: Option<String>,
    pub current: Option<String>,
}

impl PrimaryChange {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// Link `parent_id` to `node`. The link becomes primary if the node had none.
///
/// Returns true when the primary parent changed.
pub fn attach_parent(
    relation: &mut ParentRelation,
    node: &mut Node,
    parent_id: &str,
) -> Result<bool, StructureError> {
    relation.add_parent(&node.id, parent_id)?;
    if node.primary_parent_id.is_none() {
        node.primary_parent_id = Some(parent_id.to_string());
        return Ok(true);
    }
    Ok(false)
}

/// Unlink `parent_id` from `node`, re-deriving the primary parent if it was removed
pub fn detach_parent(
    relation: &mut ParentRelation,
    node: &mut Node,
    parent_id: &str,
) -> Result<PrimaryChange, StructureError> {
    relation.remove_parent(&node.id, parent_id)?;
    let previous = node.primary_parent_id.clone();
    if previous.as_deref() == Some(parent_id) {
        node.primary_parent_id = relation.oldest_parent(&node.id).map(str::to_string);
    }
    Ok(PrimaryChange {
        previous,
        current: node.primary_parent_id.clone(),
    })
}

/// Make an existing link the node's primary parent
pub fn promote_parent(
    relation: &ParentRelation,
    node: &mut Node,
    parent_id: &str,
) -> Result<(), StructureError> {
    if !relation.contains(&node.id, parent_id) {
        return Err(StructureError::not_linked(Some(parent_id), &node.id));
    }
    node.primary_parent_id = Some(parent_id.to_string());
    Ok(())
}

/// Remove all of a node's parents; it ends with no primary parent
pub fn detach_all(relation: &mut ParentRelation, node: &mut Node) -> Vec<String> {
    node.primary_parent_id = None;
    relation.clear_parents(&node.id)
}

/// Parent ids for display: primary first, then the rest oldest first
pub fn ordered_parent_ids(relation: &ParentRelation, node: &Node) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    if let Some(primary) = &node.primary_parent_id {
        ids.push(primary.clone());
    }
    for parent in relation.parents_of(&node.id) {
        if node.primary_parent_id.as_deref() != Some(parent) {
            ids.push(parent.to_string());
        }
    }
    ids
}
