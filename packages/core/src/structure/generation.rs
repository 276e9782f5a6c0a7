//! Generation Propagator
//!
//! Generations follow primary-parent edges only: a node's generation is `1`
//! when it has no primary parent, otherwise its primary parent's generation
//! plus one. Non-primary parents never influence it.
//!
//! [`propagate`] sets the generation of a start node and rewrites the subtree
//! reachable through primary edges. It is iterative and keeps a visited set, so
//! deep or malformed input cannot overflow the stack or loop forever.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use super::error::StructureError;
use super::graph::TreeStructure;
use crate::models::Node;

/// One node whose generation was rewritten
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationChange {
    pub node_id: String,
    pub from: i32,
    pub to: i32,
}

/// Set `start` to `generation` and recompute every node below it on primary edges.
///
/// Returns the nodes whose generation actually changed, in visit order.
pub fn propagate(
    nodes: &mut BTreeMap<String, Node>,
    structure: &TreeStructure,
    start: &str,
    generation: i32,
) -> Result<Vec<GenerationChange>, StructureError> {
    if generation < 1 {
        return Err(StructureError::malformed(format!(
            "generation {} is below 1",
            generation
        )));
    }

    let mut changes = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<(String, i32)> = vec![(start.to_string(), generation)];

    while let Some((node_id, target)) = stack.pop() {
        if !visited.insert(node_id.clone()) {
            return Err(StructureError::malformed(format!(
                "primary-parent chain revisits '{}'",
                node_id
            )));
        }
        let node = nodes
            .get_mut(&node_id)
            .ok_or_else(|| StructureError::unknown_node(node_id.clone()))?;
        if node.generation != target {
            changes.push(GenerationChange {
                node_id: node_id.clone(),
                from: node.generation,
                to: target,
            });
            node.generation = target;
            node.touch();
        }

        let next = target.checked_add(1).ok_or_else(|| {
            StructureError::malformed(format!("generation overflow below '{}'", node_id))
        })?;
        // reversed so children are visited in list order
        for child_id in structure.children_of(&node_id).iter().rev() {
            let child = nodes.get(child_id).ok_or_else(|| {
                StructureError::malformed(format!(
                    "child '{}' of '{}' has no node record",
                    child_id, node_id
                ))
            })?;
            if child.primary_parent_id.as_deref() == Some(node_id.as_str()) {
                stack.push((child_id.clone(), next));
            }
        }
    }

    Ok(changes)
}

/// Generation `node_id` should have given its primary parent's current generation
pub fn expected_generation(nodes: &BTreeMap<String, Node>, node_id: &str) -> Option<i32> {
    let node = nodes.get(node_id)?;
    match &node.primary_parent_id {
        None => Some(1),
        Some(parent_id) => nodes
            .get(parent_id)
            .and_then(|parent| parent.generation.checked_add(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PersonProfile;
    use crate::structure::graph::Placement;

    fn insert(
        nodes: &mut BTreeMap<String, Node>,
        structure: &mut TreeStructure,
        id: &str,
        primary: Option<&str>,
        generation: i32,
    ) {
        let mut node = Node::new_with_id(
            id.to_string(),
            "tree".to_string(),
            PersonProfile::with_nickname(id),
        );
        node.primary_parent_id = primary.map(str::to_string);
        node.generation = generation;
        structure.add_edge(primary, id, &Placement::Last).unwrap();
        nodes.insert(id.to_string(), node);
    }

    #[test]
    fn test_propagates_down_primary_chain() {
        let mut nodes = BTreeMap::new();
        let mut s = TreeStructure::new();
        insert(&mut nodes, &mut s, "a", None, 1);
        insert(&mut nodes, &mut s, "b", Some("a"), 2);
        insert(&mut nodes, &mut s, "c", Some("b"), 3);

        let changes = propagate(&mut nodes, &s, "a", 4).unwrap();
        assert_eq!(changes.len(), 3);
        assert_eq!(nodes["b"].generation, 5);
        assert_eq!(nodes["c"].generation, 6);
        assert_eq!(
            changes[0],
            GenerationChange { node_id: "a".into(), from: 1, to: 4 }
        );
    }

    #[test]
    fn test_secondary_edges_do_not_propagate() {
        let mut nodes = BTreeMap::new();
        let mut s = TreeStructure::new();
        insert(&mut nodes, &mut s, "a", None, 1);
        insert(&mut nodes, &mut s, "z", None, 1);
        insert(&mut nodes, &mut s, "x", Some("a"), 2);
        // x also listed under z, but z is not its primary parent
        s.add_edge(Some("z"), "x", &Placement::Last).unwrap();

        let changes = propagate(&mut nodes, &s, "z", 7).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(nodes["x"].generation, 2);
    }

    #[test]
    fn test_unchanged_nodes_not_reported() {
        let mut nodes = BTreeMap::new();
        let mut s = TreeStructure::new();
        insert(&mut nodes, &mut s, "a", None, 1);
        insert(&mut nodes, &mut s, "b", Some("a"), 2);
        assert!(propagate(&mut nodes, &s, "a", 1).unwrap().is_empty());
    }

    #[test]
    fn test_deep_chain_is_iterative() {
        let mut nodes = BTreeMap::new();
        let mut s = TreeStructure::new();
        insert(&mut nodes, &mut s, "n0", None, 1);
        for i in 1..5_000 {
            let parent = format!("n{}", i - 1);
            insert(&mut nodes, &mut s, &format!("n{}", i), Some(&parent), 1);
        }
        propagate(&mut nodes, &s, "n0", 1).unwrap();
        assert_eq!(nodes["n4999"].generation, 5_000);
    }

    #[test]
    fn test_missing_child_record_is_malformed() {
        let mut nodes = BTreeMap::new();
        let mut s = TreeStructure::new();
        insert(&mut nodes, &mut s, "a", None, 1);
        s.add_edge(Some("a"), "ghost", &Placement::Last).unwrap();
        assert!(matches!(
            propagate(&mut nodes, &s, "a", 1),
            Err(StructureError::MalformedStructure(_))
        ));
    }

    #[test]
    fn test_expected_generation_uses_primary_only() {
        let mut nodes = BTreeMap::new();
        let mut s = TreeStructure::new();
        insert(&mut nodes, &mut s, "a", None, 3);
        insert(&mut nodes, &mut s, "b", Some("a"), 9);
        assert_eq!(expected_generation(&nodes, "a"), Some(1));
        assert_eq!(expected_generation(&nodes, "b"), Some(4));
        assert_eq!(expected_generation(&nodes, "missing"), None);
    }
}
