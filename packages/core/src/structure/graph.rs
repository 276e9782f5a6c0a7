//! Graph Store
//!
//! Adjacency representation of one tree: an ordered root list and, per node
//! with at least one child, an ordered child list plus an order index.
//!
//! The root list is addressed as the `None` parent throughout, so attaching a
//! node as a root and attaching it under a parent are the same operation.
//!
//! Every mutating call is all-or-nothing: it validates first and signals
//! [`StructureError::AlreadyLinked`] / [`StructureError::NotLinked`] instead of
//! silently doing nothing.
//!
//! # Wire format
//!
//! ```json
//! { "roots": ["a"], "edges": { "a": { "children": ["b", "c"], "order": 0 } } }
//! ```
//!
//! Missing or `null` collections deserialize as empty.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Deserializer, Serialize};

use super::error::StructureError;

/// Where to insert a child in a target list
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Placement {
    /// Append at the end (default ordering)
    #[default]
    Last,
    /// Insert at the front
    First,
    /// Insert directly after an existing sibling
    After(String),
}

impl Placement {
    pub fn after(sibling: Option<&str>) -> Self {
        match sibling {
            Some(id) => Self::After(id.to_string()),
            None => Self::Last,
        }
    }
}

/// Child list of one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeEntry {
    #[serde(default, deserialize_with = "null_as_default")]
    pub children: Vec<String>,
    /// Index of the owning node within the first list that contains it
    #[serde(default)]
    pub order: u32,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStructure {
    #[serde(default, deserialize_with = "null_as_default")]
    roots: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    edges: BTreeMap<String, EdgeEntry>,
}

impl TreeStructure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a persisted structure. Blank input and `null` yield an empty structure.
    pub fn from_json(raw: &str) -> Result<Self, StructureError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::new());
        }
        let parsed: Option<Self> = serde_json::from_str(trimmed)
            .map_err(|e| StructureError::malformed(format!("invalid structure JSON: {}", e)))?;
        let mut structure = parsed.unwrap_or_default();
        structure.check_lists()?;
        structure.edges.retain(|_, entry| !entry.children.is_empty());
        Ok(structure)
    }

    pub fn to_json(&self) -> Result<String, StructureError> {
        serde_json::to_string(self)
            .map_err(|e| StructureError::malformed(format!("cannot serialize structure: {}", e)))
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn children_of(&self, node_id: &str) -> &[String] {
        self.edges
            .get(node_id)
            .map(|entry| entry.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn edges(&self) -> &BTreeMap<String, EdgeEntry> {
        &self.edges
    }

    pub fn order_of(&self, node_id: &str) -> Option<u32> {
        self.edges.get(node_id).map(|entry| entry.order)
    }

    /// Every node whose child list contains `node_id`, in parent-id order
    pub fn parents_of(&self, node_id: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(_, entry)| entry.children.iter().any(|c| c == node_id))
            .map(|(parent, _)| parent.clone())
            .collect()
    }

    pub fn is_root(&self, node_id: &str) -> bool {
        self.roots.iter().any(|r| r == node_id)
    }

    pub fn has_edge(&self, parent: Option<&str>, child: &str) -> bool {
        self.list(parent)
            .map(|list| list.iter().any(|c| c == child))
            .unwrap_or(false)
    }

    /// True if the id appears anywhere in the structure
    pub fn contains(&self, node_id: &str) -> bool {
        self.is_root(node_id)
            || self.edges.contains_key(node_id)
            || self
                .edges
                .values()
                .any(|entry| entry.children.iter().any(|c| c == node_id))
    }

    pub fn node_ids(&self) -> BTreeSet<String> {
        let mut ids: BTreeSet<String> = self.roots.iter().cloned().collect();
        for (parent, entry) in &self.edges {
            ids.insert(parent.clone());
            ids.extend(entry.children.iter().cloned());
        }
        ids
    }

    /// Number of parent→child edges (root list excluded)
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|entry| entry.children.len()).sum()
    }

    pub fn add_edge(
        &mut self,
        parent: Option<&str>,
        child: &str,
        placement: &Placement,
    ) -> Result<(), StructureError> {
        if parent == Some(child) {
            return Err(StructureError::SelfLink {
                node_id: child.to_string(),
            });
        }
        if self.has_edge(parent, child) {
            return Err(StructureError::already_linked(parent, child));
        }
        let index = self.insertion_index(parent, placement)?;
        self.list_mut(parent).insert(index, child.to_string());
        self.reindex();
        Ok(())
    }

    pub fn remove_edge(&mut self, parent: Option<&str>, child: &str) -> Result<(), StructureError> {
        let position = self
            .list(parent)
            .and_then(|list| list.iter().position(|c| c == child))
            .ok_or_else(|| StructureError::not_linked(parent, child))?;
        self.list_mut(parent).remove(position);
        self.prune(parent);
        self.reindex();
        Ok(())
    }

    /// Move `child` from one list to another in a single step
    pub fn move_edge(
        &mut self,
        child: &str,
        from: Option<&str>,
        to: Option<&str>,
        placement: &Placement,
    ) -> Result<(), StructureError> {
        if from == to {
            return self.reposition(to, child, placement);
        }
        if to == Some(child) {
            return Err(StructureError::SelfLink {
                node_id: child.to_string(),
            });
        }
        if !self.has_edge(from, child) {
            return Err(StructureError::not_linked(from, child));
        }
        if self.has_edge(to, child) {
            return Err(StructureError::already_linked(to, child));
        }
        let index = self.insertion_index(to, placement)?;
        if let Some(list) = self.list_mut_existing(from) {
            list.retain(|c| c != child);
        }
        self.prune(from);
        self.list_mut(to).insert(index, child.to_string());
        self.reindex();
        Ok(())
    }

    /// Change the position of an existing edge within its list
    pub fn reposition(
        &mut self,
        parent: Option<&str>,
        child: &str,
        placement: &Placement,
    ) -> Result<(), StructureError> {
        if !self.has_edge(parent, child) {
            return Err(StructureError::not_linked(parent, child));
        }
        if matches!(placement, Placement::After(sibling) if sibling == child) {
            return Ok(());
        }
        let mut list: Vec<String> = self.list(parent).cloned().unwrap_or_default();
        list.retain(|c| c != child);
        let index = Self::index_in(&list, placement)?;
        list.insert(index, child.to_string());
        *self.list_mut(parent) = list;
        self.reindex();
        Ok(())
    }

    /// Drop a node and every edge incident to it. Returns false if it was absent.
    pub fn remove_node(&mut self, node_id: &str) -> bool {
        let mut found = self.edges.remove(node_id).is_some();
        let before = self.roots.len();
        self.roots.retain(|r| r != node_id);
        found |= self.roots.len() != before;
        for entry in self.edges.values_mut() {
            let before = entry.children.len();
            entry.children.retain(|c| c != node_id);
            found |= entry.children.len() != before;
        }
        self.edges.retain(|_, entry| !entry.children.is_empty());
        if found {
            self.reindex();
        }
        found
    }

    fn list(&self, parent: Option<&str>) -> Option<&Vec<String>> {
        match parent {
            None => Some(&self.roots),
            Some(id) => self.edges.get(id).map(|entry| &entry.children),
        }
    }

    fn list_mut_existing(&mut self, parent: Option<&str>) -> Option<&mut Vec<String>> {
        match parent {
            None => Some(&mut self.roots),
            Some(id) => self.edges.get_mut(id).map(|entry| &mut entry.children),
        }
    }

    fn list_mut(&mut self, parent: Option<&str>) -> &mut Vec<String> {
        match parent {
            None => &mut self.roots,
            Some(id) => &mut self.edges.entry(id.to_string()).or_default().children,
        }
    }

    fn prune(&mut self, parent: Option<&str>) {
        if let Some(id) = parent {
            if self.children_of(id).is_empty() {
                self.edges.remove(id);
            }
        }
    }

    fn insertion_index(
        &self,
        parent: Option<&str>,
        placement: &Placement,
    ) -> Result<usize, StructureError> {
        match self.list(parent) {
            Some(list) => Self::index_in(list, placement),
            None => Self::index_in(&[], placement),
        }
    }

    fn index_in(list: &[String], placement: &Placement) -> Result<usize, StructureError> {
        match placement {
            Placement::Last => Ok(list.len()),
            Placement::First => Ok(0),
            Placement::After(sibling) => list
                .iter()
                .position(|c| c == sibling)
                .map(|i| i + 1)
                .ok_or_else(|| StructureError::unknown_node(sibling.clone())),
        }
    }

    fn check_lists(&self) -> Result<(), StructureError> {
        let mut seen = BTreeSet::new();
        for root in &self.roots {
            if !seen.insert(root.as_str()) {
                return Err(StructureError::malformed(format!(
                    "root '{}' listed twice",
                    root
                )));
            }
        }
        for (parent, entry) in &self.edges {
            let mut seen = BTreeSet::new();
            for child in &entry.children {
                if child == parent {
                    return Err(StructureError::malformed(format!(
                        "'{}' lists itself as a child",
                        parent
                    )));
                }
                if !seen.insert(child.as_str()) {
                    return Err(StructureError::malformed(format!(
                        "'{}' lists child '{}' twice",
                        parent, child
                    )));
                }
            }
        }
        Ok(())
    }

    fn reindex(&mut self) {
        let mut first_index: HashMap<String, u32> = HashMap::new();
        let lists = std::iter::once(&self.roots).chain(self.edges.values().map(|e| &e.children));
        for list in lists {
            for (i, id) in list.iter().enumerate() {
                first_index
                    .entry(id.clone())
                    .or_insert_with(|| u32::try_from(i).unwrap_or(u32::MAX));
            }
        }
        for (id, entry) in self.edges.iter_mut() {
            entry.order = first_index.get(id).copied().unwrap_or(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TreeStructure {
        let mut s = TreeStructure::new();
        s.add_edge(None, "a", &Placement::Last).unwrap();
        s.add_edge(Some("a"), "b", &Placement::Last).unwrap();
        s.add_edge(Some("a"), "c", &Placement::Last).unwrap();
        s.add_edge(Some("b"), "d", &Placement::Last).unwrap();
        s
    }

    #[test]
    fn test_empty_structure_round_trips() {
        let s = TreeStructure::new();
        let json = s.to_json().unwrap();
        assert_eq!(json, r#"{"roots":[],"edges":{}}"#);
        assert_eq!(TreeStructure::from_json(&json).unwrap(), s);
    }

    #[test]
    fn test_null_and_missing_fields_are_empty() {
        assert_eq!(TreeStructure::from_json("null").unwrap(), TreeStructure::new());
        assert_eq!(TreeStructure::from_json("").unwrap(), TreeStructure::new());
        let s = TreeStructure::from_json(r#"{"roots":null}"#).unwrap();
        assert!(s.roots().is_empty());
        assert!(s.edges().is_empty());
    }

    #[test]
    fn test_serialization_preserves_order() {
        let s = sample();
        let parsed = TreeStructure::from_json(&s.to_json().unwrap()).unwrap();
        assert_eq!(parsed, s);
        assert_eq!(parsed.children_of("a"), &["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_from_json_rejects_duplicate_children() {
        let err = TreeStructure::from_json(r#"{"roots":["a"],"edges":{"a":{"children":["b","b"]}}}"#)
            .unwrap_err();
        assert!(matches!(err, StructureError::MalformedStructure(_)));
    }

    #[test]
    fn test_duplicate_edge_is_already_linked() {
        let mut s = sample();
        let err = s.add_edge(Some("a"), "b", &Placement::Last).unwrap_err();
        assert_eq!(err, StructureError::already_linked(Some("a"), "b"));
        let err = s.add_edge(None, "a", &Placement::Last).unwrap_err();
        assert_eq!(err, StructureError::already_linked(None, "a"));
    }

    #[test]
    fn test_missing_edge_is_not_linked() {
        let mut s = sample();
        let err = s.remove_edge(Some("c"), "b").unwrap_err();
        assert_eq!(err, StructureError::not_linked(Some("c"), "b"));
    }

    #[test]
    fn test_self_edge_rejected() {
        let mut s = sample();
        assert!(matches!(
            s.add_edge(Some("b"), "b", &Placement::Last),
            Err(StructureError::SelfLink { .. })
        ));
    }

    #[test]
    fn test_placement_first_and_after() {
        let mut s = sample();
        s.add_edge(Some("a"), "e", &Placement::First).unwrap();
        s.add_edge(Some("a"), "f", &Placement::After("b".to_string()))
            .unwrap();
        assert_eq!(s.children_of("a"), &["e", "b", "f", "c"]);
    }

    #[test]
    fn test_unknown_sibling_leaves_structure_unchanged() {
        let mut s = sample();
        let before = s.clone();
        let err = s
            .add_edge(Some("c"), "x", &Placement::After("nope".to_string()))
            .unwrap_err();
        assert_eq!(err, StructureError::unknown_node("nope"));
        assert_eq!(s, before);
    }

    #[test]
    fn test_removing_last_child_drops_entry() {
        let mut s = sample();
        s.remove_edge(Some("b"), "d").unwrap();
        assert!(s.edges().get("b").is_none());
        assert!(s.children_of("b").is_empty());
    }

    #[test]
    fn test_parents_of_reports_fan_in() {
        let mut s = sample();
        s.add_edge(Some("c"), "d", &Placement::Last).unwrap();
        assert_eq!(s.parents_of("d"), vec!["b".to_string(), "c".to_string()]);
        assert!(s.parents_of("a").is_empty());
    }

    #[test]
    fn test_move_edge_between_lists() {
        let mut s = sample();
        s.move_edge("d", Some("b"), Some("c"), &Placement::Last)
            .unwrap();
        assert!(s.children_of("b").is_empty());
        assert_eq!(s.children_of("c"), &["d"]);

        s.move_edge("d", Some("c"), None, &Placement::Last).unwrap();
        assert_eq!(s.roots(), &["a", "d"]);
    }

    #[test]
    fn test_move_edge_validates_before_changing() {
        let mut s = sample();
        s.add_edge(Some("c"), "d", &Placement::Last).unwrap();
        let before = s.clone();
        let err = s
            .move_edge("d", Some("b"), Some("c"), &Placement::Last)
            .unwrap_err();
        assert_eq!(err, StructureError::already_linked(Some("c"), "d"));
        assert_eq!(s, before);

        let err = s.move_edge("c", Some("b"), None, &Placement::Last).unwrap_err();
        assert_eq!(err, StructureError::not_linked(Some("b"), "c"));
    }

    #[test]
    fn test_reposition_within_list() {
        let mut s = sample();
        s.reposition(Some("a"), "c", &Placement::First).unwrap();
        assert_eq!(s.children_of("a"), &["c", "b"]);
        s.reposition(Some("a"), "c", &Placement::After("b".to_string()))
            .unwrap();
        assert_eq!(s.children_of("a"), &["b", "c"]);
    }

    #[test]
    fn test_remove_node_drops_incident_edges() {
        let mut s = sample();
        s.add_edge(Some("c"), "d", &Placement::Last).unwrap();
        assert!(s.remove_node("d"));
        assert!(!s.contains("d"));
        assert!(s.edges().get("b").is_none());
        assert!(!s.remove_node("d"));
    }

    #[test]
    fn test_order_index_tracks_sibling_position() {
        let mut s = sample();
        s.add_edge(Some("c"), "e", &Placement::Last).unwrap();
        assert_eq!(s.order_of("a"), Some(0));
        assert_eq!(s.order_of("b"), Some(0));
        assert_eq!(s.order_of("c"), Some(1));
        s.reposition(Some("a"), "c", &Placement::First).unwrap();
        assert_eq!(s.order_of("c"), Some(0));
        assert_eq!(s.order_of("b"), Some(1));
    }
}
