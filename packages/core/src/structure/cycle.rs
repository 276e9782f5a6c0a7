//! Cycle Oracle
//!
//! Reachability questions over child edges. [`is_descendant`] is the single
//! predicate guarding every structural mutation against a cycle; it is
//! evaluated on the structure as it stands *before* the candidate edge exists.
//!
//! All traversals keep a visited set so malformed (cyclic) input terminates.

use std::collections::{HashSet, VecDeque};

use super::graph::TreeStructure;

/// True iff `candidate` is reachable from `ancestor` in one or more child hops.
///
/// A node is not its own descendant unless the structure already contains a
/// cycle through it.
pub fn is_descendant(structure: &TreeStructure, ancestor: &str, candidate: &str) -> bool {
    let mut stack: Vec<&str> = structure
        .children_of(ancestor)
        .iter()
        .map(String::as_str)
        .collect();
    let mut visited: HashSet<&str> = HashSet::new();

    while let Some(current) = stack.pop() {
        if current == candidate {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        stack.extend(structure.children_of(current).iter().map(String::as_str));
    }
    false
}

/// Every node reachable from `node_id`, excluding itself, in breadth-first order
pub fn descendants(structure: &TreeStructure, node_id: &str) -> Vec<String> {
    let mut closure = downward_closure(structure, node_id);
    closure.retain(|id| id != node_id);
    closure
}

/// `node_id` plus every node reachable from it, breadth-first, each id once
pub fn downward_closure(structure: &TreeStructure, node_id: &str) -> Vec<String> {
    let mut order = vec![node_id.to_string()];
    let mut visited: HashSet<&str> = HashSet::from([node_id]);
    let mut queue: VecDeque<&str> = VecDeque::from([node_id]);

    while let Some(current) = queue.pop_front() {
        for child in structure.children_of(current) {
            if visited.insert(child.as_str()) {
                order.push(child.clone());
                queue.push_back(child.as_str());
            }
        }
    }
    order
}

/// First cycle found in the structure, as a closed path (`[a, b, a]`)
pub fn find_cycle(structure: &TreeStructure) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    let mut marks: std::collections::HashMap<&str, Mark> = std::collections::HashMap::new();

    for start in structure.edges().keys() {
        if marks.contains_key(start.as_str()) {
            continue;
        }
        // (node, index of next child to visit)
        let mut path: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
        marks.insert(start.as_str(), Mark::InProgress);

        while let Some((current, next)) = path.last().copied() {
            let children = structure.children_of(current);
            if next >= children.len() {
                marks.insert(current, Mark::Done);
                path.pop();
                continue;
            }
            if let Some(top) = path.last_mut() {
                top.1 += 1;
            }
            let child = children[next].as_str();
            match marks.get(child) {
                Some(Mark::InProgress) => {
                    let from = path.iter().position(|(id, _)| *id == child).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[from..].iter().map(|(id, _)| id.to_string()).collect();
                    cycle.push(child.to_string());
                    return Some(cycle);
                }
                Some(Mark::Done) => {}
                None => {
                    marks.insert(child, Mark::InProgress);
                    path.push((child, 0));
                }
            }
        }
    }
    None
}
