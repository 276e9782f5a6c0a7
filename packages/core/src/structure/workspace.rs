//! In-memory working copy of one tree
//!
//! A [`TreeWorkspace`] holds everything the mutation protocol reads and writes
//! for a single tree: node records, the graph structure and the parent
//! relation. It also remembers which records changed so the storage layer
//! writes back only what is needed.
//!
//! Nodes that belong to other trees are never loaded as records. The service
//! registers their owning tree with [`TreeWorkspace::register_foreign`] so
//! cross-tree references are reported rather than treated as missing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::cycle;
use super::error::StructureError;
use super::graph::TreeStructure;
use super::parents::{self, ParentLink, ParentRelation};
use crate::models::{Node, NodeView};

/// Where an id lives relative to this workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local,
    /// Exists, but in the named tree
    Foreign(String),
    Missing,
}

/// Records touched since the last [`TreeWorkspace::take_changes`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub upserted: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    /// Structure or parent links changed
    pub structure: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty() && self.removed.is_empty() && !self.structure
    }
}

#[derive(Debug, Clone)]
pub struct TreeWorkspace {
    pub(crate) tree_id: String,
    pub(crate) nodes: BTreeMap<String, Node>,
    pub(crate) structure: TreeStructure,
    pub(crate) parents: ParentRelation,
    foreign: HashMap<String, String>,
    changes: ChangeSet,
}

impl TreeWorkspace {
    pub fn new(tree_id: impl Into<String>) -> Self {
        Self {
            tree_id: tree_id.into(),
            nodes: BTreeMap::new(),
            structure: TreeStructure::new(),
            parents: ParentRelation::new(),
            foreign: HashMap::new(),
            changes: ChangeSet::default(),
        }
    }

    /// Assemble a workspace from loaded records
    pub fn from_parts(
        tree_id: impl Into<String>,
        nodes: Vec<Node>,
        structure: TreeStructure,
        links: Vec<ParentLink>,
    ) -> Result<Self, StructureError> {
        let mut workspace = Self::new(tree_id);
        for node in nodes {
            if workspace.nodes.insert(node.id.clone(), node).is_some() {
                return Err(StructureError::malformed("duplicate node record"));
            }
        }
        workspace.structure = structure;
        workspace.parents = ParentRelation::from_links(links)?;
        Ok(workspace)
    }

    pub fn tree_id(&self) -> &str {
        &self.tree_id
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn nodes(&self) -> &BTreeMap<String, Node> {
        &self.nodes
    }

    pub fn structure(&self) -> &TreeStructure {
        &self.structure
    }

    pub fn parents(&self) -> &ParentRelation {
        &self.parents
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn locate(&self, node_id: &str) -> Location {
        if self.nodes.contains_key(node_id) {
            Location::Local
        } else if let Some(tree_id) = self.foreign.get(node_id) {
            Location::Foreign(tree_id.clone())
        } else {
            Location::Missing
        }
    }

    /// Remember that `node_id` exists in `tree_id`
    pub fn register_foreign(&mut self, node_id: impl Into<String>, tree_id: impl Into<String>) {
        let tree_id = tree_id.into();
        if tree_id != self.tree_id {
            self.foreign.insert(node_id.into(), tree_id);
        }
    }

    /// Node with its parent ids, primary parent first
    pub fn view(&self, node_id: &str) -> Option<NodeView> {
        let node = self.nodes.get(node_id)?;
        Some(NodeView {
            parent_ids: parents::ordered_parent_ids(&self.parents, node),
            node: node.clone(),
        })
    }

    /// Every node in creation order
    pub fn views(&self) -> Vec<NodeView> {
        let mut nodes: Vec<&Node> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        nodes
            .into_iter()
            .filter_map(|node| self.view(&node.id))
            .collect()
    }

    /// Every node reachable below `node_id`, breadth-first
    pub fn descendant_views(&self, node_id: &str) -> Vec<NodeView> {
        cycle::descendants(&self.structure, node_id)
            .iter()
            .filter_map(|id| self.view(id))
            .collect()
    }

    pub fn parent_links(&self) -> Vec<ParentLink> {
        self.parents.to_links()
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn take_changes(&mut self) -> ChangeSet {
        std::mem::take(&mut self.changes)
    }

    /// Apply `f` as one unit: on error the workspace is left untouched
    pub fn transact<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut TreeWorkspace) -> Result<T, E>,
    {
        let mut draft = self.clone();
        let value = f(&mut draft)?;
        *self = draft;
        Ok(value)
    }

    pub(crate) fn node_mut(&mut self, node_id: &str) -> Result<&mut Node, StructureError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| StructureError::unknown_node(node_id))?;
        self.changes.upserted.insert(node_id.to_string());
        Ok(node)
    }

    /// A node record together with the parent relation, for primary-parent bookkeeping
    pub(crate) fn node_and_parents(
        &mut self,
        node_id: &str,
    ) -> Result<(&mut Node, &mut ParentRelation), StructureError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| StructureError::unknown_node(node_id))?;
        self.changes.upserted.insert(node_id.to_string());
        Ok((node, &mut self.parents))
    }

    pub(crate) fn insert_node(&mut self, node: Node) {
        self.changes.removed.remove(&node.id);
        self.changes.upserted.insert(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    /// Drop a node record and every edge and link touching it
    pub(crate) fn remove_node(&mut self, node_id: &str) -> Option<Node> {
        let node = self.nodes.remove(node_id)?;
        self.structure.remove_node(node_id);
        self.parents.remove_node(node_id);
        self.changes.upserted.remove(node_id);
        self.changes.removed.insert(node_id.to_string());
        self.changes.structure = true;
        Some(node)
    }

    pub(crate) fn mark_upserted<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        for id in ids {
            self.changes.upserted.insert(id.to_string());
        }
    }

    pub(crate) fn mark_structure(&mut self) {
        self.changes.structure = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PersonProfile;
    use crate::structure::graph::Placement;
    use chrono::Duration;

    fn workspace() -> TreeWorkspace {
        let mut ws = TreeWorkspace::new("t1");
        let mut a = Node::new_with_id("a".into(), "t1".into(), PersonProfile::with_nickname("A"));
        let mut b = Node::new_with_id("b".into(), "t1".into(), PersonProfile::with_nickname("B"));
        let mut c = Node::new_with_id("c".into(), "t1".into(), PersonProfile::with_nickname("C"));
        b.created_at = a.created_at + Duration::seconds(2);
        c.created_at = a.created_at + Duration::seconds(1);
        c.generation = 2;
        parents::attach_parent(&mut ws.parents, &mut c, "a").unwrap();
        parents::attach_parent(&mut ws.parents, &mut c, "b").unwrap();
        ws.structure.add_edge(None, "a", &Placement::Last).unwrap();
        ws.structure.add_edge(None, "b", &Placement::Last).unwrap();
        ws.structure.add_edge(Some("a"), "c", &Placement::Last).unwrap();
        ws.structure.add_edge(Some("b"), "c", &Placement::Last).unwrap();
        a.touch();
        for node in [a, b, c] {
            ws.nodes.insert(node.id.clone(), node);
        }
        ws
    }

    #[test]
    fn test_locate_distinguishes_foreign_and_missing() {
        let mut ws = workspace();
        ws.register_foreign("x", "t2");
        ws.register_foreign("y", "t1");
        assert_eq!(ws.locate("a"), Location::Local);
        assert_eq!(ws.locate("x"), Location::Foreign("t2".to_string()));
        assert_eq!(ws.locate("y"), Location::Missing);
    }

    #[test]
    fn test_views_in_creation_order_with_primary_first() {
        let ws = workspace();
        let ids: Vec<String> = ws.views().into_iter().map(|v| v.node.id).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert_eq!(ws.view("c").unwrap().parent_ids, vec!["a", "b"]);
        assert!(ws.view("a").unwrap().parent_ids.is_empty());
    }

    #[test]
    fn test_transact_discards_failed_work() {
        let mut ws = workspace();
        let result: Result<(), StructureError> = ws.transact(|draft| {
            draft.remove_node("c");
            Err(StructureError::malformed("abort"))
        });
        assert!(result.is_err());
        assert!(ws.node("c").is_some());
        assert!(ws.changes().is_empty());
    }

    #[test]
    fn test_remove_node_records_change() {
        let mut ws = workspace();
        ws.remove_node("c").unwrap();
        let changes = ws.take_changes();
        assert!(changes.removed.contains("c"));
        assert!(changes.structure);
        assert!(ws.parents().is_empty());
        assert!(ws.take_changes().is_empty());
    }

    #[test]
    fn test_from_parts_rejects_duplicate_records() {
        let node = Node::new_with_id("a".into(), "t1".into(), PersonProfile::with_nickname("A"));
        let result = TreeWorkspace::from_parts(
            "t1",
            vec![node.clone(), node],
            TreeStructure::new(),
            Vec::new(),
        );
        assert!(result.is_err());
    }
}
