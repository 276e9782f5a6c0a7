//! Structural invariants under random mutation sequences
//!
//! Every sequence of create / move / unlink / add-parent / remove-parent /
//! delete calls, successful or rejected, must leave a tree that passes the
//! integrity check, and a rejected call must leave it exactly as it was.

use codetree_core::models::PersonProfile;
use codetree_core::operations::{CreateNodeParams, Mutation};
use codetree_core::structure::{cycle, integrity, TreeWorkspace};
use proptest::prelude::*;

const POOL: usize = 8;

fn id(index: usize) -> String {
    format!("p{}", index % POOL)
}

#[derive(Debug, Clone)]
enum Op {
    Create { node: usize, parents: Vec<usize> },
    Move { node: usize, parent: usize },
    Unlink { node: usize },
    AddParent { node: usize, parent: usize },
    RemoveParent { node: usize, parent: usize },
    Delete { node: usize },
}

impl Op {
    fn into_mutation(self) -> Mutation {
        match self {
            Op::Create { node, parents } => {
                let mut params =
                    CreateNodeParams::new(PersonProfile::with_nickname("p")).with_id(id(node));
                for parent in parents {
                    params = params.with_parent(id(parent));
                }
                Mutation::Create(params)
            }
            Op::Move { node, parent } => Mutation::Move {
                node_id: id(node),
                new_parent_id: id(parent),
                insert_after: None,
            },
            Op::Unlink { node } => Mutation::Unlink { node_id: id(node) },
            Op::AddParent { node, parent } => Mutation::AddParent {
                node_id: id(node),
                parent_id: id(parent),
            },
            Op::RemoveParent { node, parent } => Mutation::RemoveParent {
                node_id: id(node),
                parent_id: id(parent),
            },
            Op::Delete { node } => Mutation::Delete { node_id: id(node) },
        }
    }
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let index = 0..POOL;
    prop_oneof![
        4 => (index.clone(), prop::collection::vec(0..POOL, 0..3))
            .prop_map(|(node, parents)| Op::Create { node, parents }),
        2 => (index.clone(), 0..POOL).prop_map(|(node, parent)| Op::Move { node, parent }),
        1 => index.clone().prop_map(|node| Op::Unlink { node }),
        3 => (index.clone(), 0..POOL).prop_map(|(node, parent)| Op::AddParent { node, parent }),
        2 => (index.clone(), 0..POOL).prop_map(|(node, parent)| Op::RemoveParent { node, parent }),
        1 => index.prop_map(|node| Op::Delete { node }),
    ]
}

fn assert_invariants(ws: &TreeWorkspace) -> Result<(), TestCaseError> {
    let violations = integrity::check(ws);
    prop_assert!(violations.is_empty(), "violations: {:?}", violations);
    for (node_id, node) in ws.nodes() {
        prop_assert!(!cycle::is_descendant(ws.structure(), node_id, node_id));
        prop_assert!(node.generation >= 1);
        prop_assert_eq!(ws.parents().has_parents(node_id), node.primary_parent_id.is_some());
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn random_mutations_preserve_every_invariant(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut ws = TreeWorkspace::new("tree");
        for op in ops {
            let nodes_before = ws.nodes().clone();
            let structure_before = ws.structure().clone();
            let links_before = ws.parent_links();
            let is_delete = matches!(op, Op::Delete { .. });

            match ws.apply(op.into_mutation()) {
                Ok(outcome) => {
                    if is_delete {
                        prop_assert_eq!(nodes_before.len() - ws.len(), outcome.deleted.len());
                        for removed in &outcome.deleted {
                            prop_assert!(ws.node(removed).is_none());
                            prop_assert!(!ws.structure().contains(removed));
                        }
                    }
                }
                Err(_) => {
                    prop_assert_eq!(ws.nodes(), &nodes_before);
                    prop_assert_eq!(ws.structure(), &structure_before);
                    prop_assert_eq!(ws.parent_links(), links_before);
                }
            }
            assert_invariants(&ws)?;
        }
    }

    #[test]
    fn generations_follow_primary_parents(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut ws = TreeWorkspace::new("tree");
        for op in ops {
            let _ = ws.apply(op.into_mutation());
        }
        for node in ws.nodes().values() {
            let expected = match node.primary_parent_id.as_deref() {
                Some(parent) => ws.node(parent).map(|p| p.generation + 1),
                None => Some(1),
            };
            prop_assert_eq!(Some(node.generation), expected);
        }
    }
}
