//! Structural integrity check
//!
//! Verifies a loaded workspace against the invariants the mutation protocol
//! maintains. A clean tree reports no violations; anything else points at data
//! written outside the protocol.

use serde::Serialize;

use super::cycle;
use super::generation;
use super::workspace::TreeWorkspace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum IntegrityViolation {
    /// Closed path through child edges
    #[serde(rename_all = "camelCase")]
    Cycle { path: Vec<String> },

    #[serde(rename_all = "camelCase")]
    GenerationMismatch {
        node_id: String,
        expected: i32,
        actual: i32,
    },

    /// Primary parent is not one of the node's parents
    #[serde(rename_all = "camelCase")]
    PrimaryNotInRelation { node_id: String, primary_parent_id: String },

    /// Node has parents but no primary parent
    #[serde(rename_all = "camelCase")]
    MissingPrimary { node_id: String },

    /// Root-list membership disagrees with the parent set
    #[serde(rename_all = "camelCase")]
    RootListMismatch { node_id: String, listed_as_root: bool },

    /// Structure or parent link names an id with no node record
    #[serde(rename_all = "camelCase")]
    DanglingReference { node_id: String },

    /// Child edge and parent link disagree
    #[serde(rename_all = "camelCase")]
    EdgeRelationDivergence {
        parent_id: String,
        node_id: String,
        in_structure: bool,
    },

    /// Node record whose tree id differs from the workspace
    #[serde(rename_all = "camelCase")]
    ForeignNode { node_id: String, tree_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub tree_id: String,
    pub node_count: usize,
    pub edge_count: usize,
    pub violations: Vec<IntegrityViolation>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

pub fn report(workspace: &TreeWorkspace) -> IntegrityReport {
    IntegrityReport {
        tree_id: workspace.tree_id().to_string(),
        node_count: workspace.len(),
        edge_count: workspace.structure().edge_count(),
        violations: check(workspace),
    }
}

pub fn check(workspace: &TreeWorkspace) -> Vec<IntegrityViolation> {
    let mut violations = Vec::new();
    let structure = workspace.structure();
    let relation = workspace.parents();
    let nodes = workspace.nodes();

    if let Some(path) = cycle::find_cycle(structure) {
        violations.push(IntegrityViolation::Cycle { path });
    }

    for id in structure.node_ids() {
        if !nodes.contains_key(&id) {
            violations.push(IntegrityViolation::DanglingReference { node_id: id });
        }
    }

    for link in relation.to_links() {
        for id in [&link.node_id, &link.parent_id] {
            if !nodes.contains_key(id.as_str()) && !structure.contains(id) {
                violations.push(IntegrityViolation::DanglingReference {
                    node_id: id.clone(),
                });
            }
        }
        if !structure.has_edge(Some(link.parent_id.as_str()), &link.node_id) {
            violations.push(IntegrityViolation::EdgeRelationDivergence {
                parent_id: link.parent_id,
                node_id: link.node_id,
                in_structure: false,
            });
        }
    }

    for (parent_id, entry) in structure.edges() {
        for child in &entry.children {
            if !relation.contains(child, parent_id) {
                violations.push(IntegrityViolation::EdgeRelationDivergence {
                    parent_id: parent_id.clone(),
                    node_id: child.clone(),
                    in_structure: true,
                });
            }
        }
    }

    for (id, node) in nodes {
        if node.tree_id != workspace.tree_id() {
            violations.push(IntegrityViolation::ForeignNode {
                node_id: id.clone(),
                tree_id: node.tree_id.clone(),
            });
        }

        let has_parents = relation.has_parents(id);
        match &node.primary_parent_id {
            Some(primary) if !relation.contains(id, primary) => {
                violations.push(IntegrityViolation::PrimaryNotInRelation {
                    node_id: id.clone(),
                    primary_parent_id: primary.clone(),
                });
            }
            None if has_parents => {
                violations.push(IntegrityViolation::MissingPrimary {
                    node_id: id.clone(),
                });
            }
            _ => {}
        }

        let listed_as_root = structure.is_root(id);
        if listed_as_root == has_parents {
            violations.push(IntegrityViolation::RootListMismatch {
                node_id: id.clone(),
                listed_as_root,
            });
        }

        if let Some(expected) = generation::expected_generation(nodes, id) {
            if expected != node.generation {
                violations.push(IntegrityViolation::GenerationMismatch {
                    node_id: id.clone(),
                    expected,
                    actual: node.generation,
                });
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Node, PersonProfile};
    use crate::structure::graph::{Placement, TreeStructure};
    use crate::structure::parents::ParentLink;

    fn node(id: &str, primary: Option<&str>, generation: i32) -> Node {
        let mut node = Node::new_with_id(id.into(), "t1".into(), PersonProfile::with_nickname(id));
        node.primary_parent_id = primary.map(str::to_string);
        node.generation = generation;
        node
    }

    fn link(node_id: &str, parent_id: &str, seq: u64) -> ParentLink {
        ParentLink {
            node_id: node_id.into(),
            parent_id: parent_id.into(),
            seq,
        }
    }

    fn clean() -> TreeWorkspace {
        let mut s = TreeStructure::new();
        s.add_edge(None, "a", &Placement::Last).unwrap();
        s.add_edge(Some("a"), "b", &Placement::Last).unwrap();
        TreeWorkspace::from_parts(
            "t1",
            vec![node("a", None, 1), node("b", Some("a"), 2)],
            s,
            vec![link("b", "a", 0)],
        )
        .unwrap()
    }

    #[test]
    fn test_clean_tree_has_no_violations() {
        let r = report(&clean());
        assert!(r.is_clean(), "{:?}", r.violations);
        assert_eq!(r.node_count, 2);
        assert_eq!(r.edge_count, 1);
    }

    #[test]
    fn test_generation_mismatch_reported() {
        let mut ws = clean();
        ws.nodes.get_mut("b").unwrap().generation = 5;
        assert_eq!(
            check(&ws),
            vec![IntegrityViolation::GenerationMismatch {
                node_id: "b".into(),
                expected: 2,
                actual: 5
            }]
        );
    }

    #[test]
    fn test_missing_link_reports_divergence_and_primary() {
        let mut s = TreeStructure::new();
        s.add_edge(None, "a", &Placement::Last).unwrap();
        s.add_edge(Some("a"), "b", &Placement::Last).unwrap();
        let ws = TreeWorkspace::from_parts(
            "t1",
            vec![node("a", None, 1), node("b", Some("a"), 2)],
            s,
            Vec::new(),
        )
        .unwrap();
        let violations = check(&ws);
        assert!(violations.contains(&IntegrityViolation::EdgeRelationDivergence {
            parent_id: "a".into(),
            node_id: "b".into(),
            in_structure: true
        }));
        assert!(violations.contains(&IntegrityViolation::PrimaryNotInRelation {
            node_id: "b".into(),
            primary_parent_id: "a".into()
        }));
    }

    #[test]
    fn test_root_list_mismatch_and_dangling() {
        let mut s = TreeStructure::new();
        s.add_edge(None, "ghost", &Placement::Last).unwrap();
        let ws = TreeWorkspace::from_parts("t1", vec![node("a", None, 1)], s, Vec::new()).unwrap();
        let violations = check(&ws);
        assert!(violations.contains(&IntegrityViolation::DanglingReference {
            node_id: "ghost".into()
        }));
        assert!(violations.contains(&IntegrityViolation::RootListMismatch {
            node_id: "a".into(),
            listed_as_root: false
        }));
    }

    #[test]
    fn test_violation_serializes_with_kind_tag() {
        let v = IntegrityViolation::MissingPrimary { node_id: "x".into() };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["kind"], "missingPrimary");
        assert_eq!(json["nodeId"], "x");
    }
}
