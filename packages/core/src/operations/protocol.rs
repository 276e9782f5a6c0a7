//! Transition implementations on [`TreeWorkspace`]
//!
//! Every transition runs inside [`TreeWorkspace::transact`], so a failure at
//! any step (including a broken invariant found during the generation
//! cascade) leaves the workspace exactly as it was before the call.

use std::collections::HashSet;

use tracing::debug;
use uuid::Uuid;

use super::{CreateNodeParams, Mutation, MutationError, MutationOutcome};
use crate::models::{Node, NodeUpdate, NodeView};
use crate::structure::generation::propagate;
use crate::structure::{cycle, parents, GenerationChange, Location, Placement, TreeWorkspace};

const SELF_PARENT: &str = "cannot set node as its own parent";

fn require_id(id: &str, field: &str) -> Result<(), MutationError> {
    if id.trim().is_empty() {
        return Err(MutationError::invalid_argument(format!("{} is required", field)));
    }
    Ok(())
}

impl TreeWorkspace {
    /// Apply one structural transition atomically
    pub fn apply(&mut self, mutation: Mutation) -> Result<MutationOutcome, MutationError> {
        let kind = mutation.kind();
        let outcome = self.transact(|ws| match mutation {
            Mutation::Create(params) => ws.create_node(params),
            Mutation::Move {
                node_id,
                new_parent_id,
                insert_after,
            } => ws.move_node(&node_id, &new_parent_id, insert_after.as_deref()),
            Mutation::Unlink { node_id } => ws.unlink_node(&node_id),
            Mutation::AddParent { node_id, parent_id } => ws.add_parent(&node_id, &parent_id),
            Mutation::RemoveParent { node_id, parent_id } => {
                ws.remove_parent(&node_id, &parent_id)
            }
            Mutation::Delete { node_id } => ws.delete_node(&node_id),
        })?;
        debug!(
            "{} applied to node {} in tree {} ({} regenerated, {} deleted)",
            kind,
            outcome.node.node.id,
            self.tree_id,
            outcome.regenerated.len(),
            outcome.deleted.len()
        );
        Ok(outcome)
    }

    /// Replace passthrough fields of a node; structural fields are untouched
    pub fn update_node(
        &mut self,
        node_id: &str,
        update: NodeUpdate,
    ) -> Result<NodeView, MutationError> {
        require_id(node_id, "node id")?;
        if update.is_empty() {
            return Err(MutationError::invalid_argument("update has no fields"));
        }
        self.require_node(node_id)?;
        self.transact(|ws| -> Result<NodeView, MutationError> {
            update.apply_to(ws.node_mut(node_id)?)?;
            ws.view_of(node_id)
        })
    }

    fn create_node(&mut self, params: CreateNodeParams) -> Result<MutationOutcome, MutationError> {
        params.profile.validate()?;
        if let Some(properties) = &params.properties {
            if !properties.is_object() {
                return Err(MutationError::invalid_argument(
                    "properties must be a JSON object",
                ));
            }
        }

        let id = match params.id.as_deref() {
            Some(id) => {
                require_id(id, "node id")?;
                if self.locate(id) != Location::Missing {
                    return Err(MutationError::invalid_argument(format!(
                        "node '{}' already exists",
                        id
                    )));
                }
                id.to_string()
            }
            None => Uuid::new_v4().to_string(),
        };

        let mut seen: HashSet<&str> = HashSet::new();
        for parent_id in &params.parent_ids {
            require_id(parent_id, "parent id")?;
            if parent_id == &id {
                return Err(MutationError::invalid_argument(SELF_PARENT));
            }
            if !seen.insert(parent_id.as_str()) {
                return Err(MutationError::already_linked(&id, parent_id));
            }
            self.require_parent(&id, parent_id)?;
        }

        let primary = params.parent_ids.first().map(String::as_str);
        let placement = self.placement(&id, primary, params.insert_after.as_deref())?;
        let generation = match primary {
            Some(parent_id) => self.child_generation(parent_id)?,
            None => 1,
        };

        let mut node = Node::new_with_id(id.clone(), self.tree_id.clone(), params.profile);
        node.generation = generation;
        node.position = params.position;
        if let Some(properties) = params.properties {
            node.properties = properties;
        }

        self.structure.add_edge(primary, &id, &placement)?;
        for (index, parent_id) in params.parent_ids.iter().enumerate() {
            if index > 0 {
                self.structure
                    .add_edge(Some(parent_id.as_str()), &id, &Placement::Last)?;
            }
            parents::attach_parent(&mut self.parents, &mut node, parent_id)?;
        }
        self.insert_node(node);
        self.mark_structure();

        debug!(
            "Created node {} at generation {} under {:?}",
            id, generation, primary
        );
        Ok(MutationOutcome::of(self.view_of(&id)?))
    }

    fn move_node(
        &mut self,
        node_id: &str,
        new_parent_id: &str,
        insert_after: Option<&str>,
    ) -> Result<MutationOutcome, MutationError> {
        require_id(node_id, "node id")?;
        require_id(new_parent_id, "parent id")?;
        let current_primary = self.require_node(node_id)?.primary_parent_id.clone();
        if node_id == new_parent_id {
            return Err(MutationError::invalid_argument(SELF_PARENT));
        }
        self.require_parent(node_id, new_parent_id)?;
        if current_primary.as_deref() == Some(new_parent_id) {
            return Err(MutationError::already_linked(node_id, new_parent_id));
        }
        if cycle::is_descendant(&self.structure, node_id, new_parent_id) {
            return Err(MutationError::circular_reference(node_id, new_parent_id));
        }
        let placement = self.placement(node_id, Some(new_parent_id), insert_after)?;
        let generation = self.child_generation(new_parent_id)?;

        if self.parents.contains(node_id, new_parent_id) {
            // already an additional parent: drop the old primary edge and promote
            if let Some(old) = current_primary.as_deref() {
                self.structure.remove_edge(Some(old), node_id)?;
                self.parents.remove_parent(node_id, old)?;
            }
            let (node, relation) = self.node_and_parents(node_id)?;
            parents::promote_parent(relation, node, new_parent_id)?;
            if insert_after.is_some() {
                self.structure
                    .reposition(Some(new_parent_id), node_id, &placement)?;
            }
        } else {
            self.structure.move_edge(
                node_id,
                current_primary.as_deref(),
                Some(new_parent_id),
                &placement,
            )?;
            let (node, relation) = self.node_and_parents(node_id)?;
            if let Some(old) = current_primary.as_deref() {
                parents::detach_parent(relation, node, old)?;
            }
            relation.add_parent(node_id, new_parent_id)?;
            node.primary_parent_id = Some(new_parent_id.to_string());
        }
        self.mark_structure();

        let regenerated = self.cascade(node_id, generation)?;
        let mut outcome = MutationOutcome::of(self.view_of(node_id)?);
        outcome.regenerated = regenerated;
        Ok(outcome)
    }

    fn unlink_node(&mut self, node_id: &str) -> Result<MutationOutcome, MutationError> {
        require_id(node_id, "node id")?;
        let node = self.require_node(node_id)?;
        if node.primary_parent_id.is_none() && !self.parents.has_parents(node_id) {
            return Err(MutationError::not_linked(node_id, None));
        }

        let (node, relation) = self.node_and_parents(node_id)?;
        let removed = parents::detach_all(relation, node);
        for parent_id in &removed {
            self.structure.remove_edge(Some(parent_id.as_str()), node_id)?;
        }
        self.structure.add_edge(None, node_id, &Placement::Last)?;
        self.mark_structure();

        let regenerated = self.cascade(node_id, 1)?;
        debug!("Unlinked node {} from {} parent(s)", node_id, removed.len());
        let mut outcome = MutationOutcome::of(self.view_of(node_id)?);
        outcome.regenerated = regenerated;
        Ok(outcome)
    }

    fn add_parent(
        &mut self,
        node_id: &str,
        parent_id: &str,
    ) -> Result<MutationOutcome, MutationError> {
        require_id(node_id, "node id")?;
        require_id(parent_id, "parent id")?;
        if node_id == parent_id {
            return Err(MutationError::invalid_argument(SELF_PARENT));
        }
        let was_root = self.require_node(node_id)?.primary_parent_id.is_none();
        self.require_parent(node_id, parent_id)?;
        if self.parents.contains(node_id, parent_id) {
            return Err(MutationError::already_linked(node_id, parent_id));
        }
        if cycle::is_descendant(&self.structure, node_id, parent_id) {
            return Err(MutationError::circular_reference(node_id, parent_id));
        }

        let regenerated = if was_root {
            let generation = self.child_generation(parent_id)?;
            self.structure
                .move_edge(node_id, None, Some(parent_id), &Placement::Last)?;
            let (node, relation) = self.node_and_parents(node_id)?;
            parents::attach_parent(relation, node, parent_id)?;
            self.mark_structure();
            self.cascade(node_id, generation)?
        } else {
            self.structure
                .add_edge(Some(parent_id), node_id, &Placement::Last)?;
            let (node, relation) = self.node_and_parents(node_id)?;
            parents::attach_parent(relation, node, parent_id)?;
            self.mark_structure();
            Vec::new()
        };

        let mut outcome = MutationOutcome::of(self.view_of(node_id)?);
        outcome.regenerated = regenerated;
        Ok(outcome)
    }

    fn remove_parent(
        &mut self,
        node_id: &str,
        parent_id: &str,
    ) -> Result<MutationOutcome, MutationError> {
        require_id(node_id, "node id")?;
        require_id(parent_id, "parent id")?;
        self.require_node(node_id)?;
        if !self.parents.contains(node_id, parent_id) {
            return Err(MutationError::not_linked(node_id, Some(parent_id)));
        }

        self.structure.remove_edge(Some(parent_id), node_id)?;
        let (node, relation) = self.node_and_parents(node_id)?;
        let change = parents::detach_parent(relation, node, parent_id)?;
        self.mark_structure();

        let regenerated = if !change.changed() {
            Vec::new()
        } else {
            match change.current.as_deref() {
                Some(new_primary) => {
                    debug!(
                        "Primary parent of {} re-derived: {} -> {}",
                        node_id, parent_id, new_primary
                    );
                    let generation = self.child_generation(new_primary)?;
                    self.cascade(node_id, generation)?
                }
                None => {
                    self.structure.add_edge(None, node_id, &Placement::Last)?;
                    self.cascade(node_id, 1)?
                }
            }
        };

        let mut outcome = MutationOutcome::of(self.view_of(node_id)?);
        outcome.regenerated = regenerated;
        Ok(outcome)
    }

    fn delete_node(&mut self, node_id: &str) -> Result<MutationOutcome, MutationError> {
        require_id(node_id, "node id")?;
        self.require_node(node_id)?;
        let view = self.view_of(node_id)?;
        let closure = cycle::downward_closure(&self.structure, node_id);
        for id in &closure {
            if self.remove_node(id).is_none() {
                return Err(MutationError::internal(format!(
                    "descendant '{}' of '{}' has no node record",
                    id, node_id
                )));
            }
        }
        debug!("Deleted {} node(s) below and including {}", closure.len(), node_id);

        let mut outcome = MutationOutcome::of(view);
        outcome.deleted = closure;
        Ok(outcome)
    }

    fn require_node(&self, node_id: &str) -> Result<&Node, MutationError> {
        self.node(node_id)
            .ok_or_else(|| MutationError::node_not_found(node_id))
    }

    /// A parent must exist and live in this tree
    fn require_parent(&self, node_id: &str, parent_id: &str) -> Result<(), MutationError> {
        match self.locate(parent_id) {
            Location::Local => Ok(()),
            Location::Foreign(tree_id) => {
                Err(MutationError::cross_tree(node_id, parent_id, &tree_id))
            }
            Location::Missing => Err(MutationError::parent_not_found(parent_id)),
        }
    }

    /// Resolve an optional `insert_after` sibling against the target list
    fn placement(
        &self,
        node_id: &str,
        parent_id: Option<&str>,
        insert_after: Option<&str>,
    ) -> Result<Placement, MutationError> {
        let Some(sibling) = insert_after else {
            return Ok(Placement::Last);
        };
        require_id(sibling, "insert_after")?;
        if sibling == node_id {
            return Err(MutationError::invalid_argument(
                "cannot insert a node after itself",
            ));
        }
        if self.locate(sibling) != Location::Local {
            return Err(MutationError::sibling_not_found(sibling));
        }
        if !self.structure.has_edge(parent_id, sibling) {
            return Err(MutationError::invalid_argument(format!(
                "'{}' is not a sibling in the target list",
                sibling
            )));
        }
        Ok(Placement::after(Some(sibling)))
    }

    fn child_generation(&self, parent_id: &str) -> Result<i32, MutationError> {
        let parent = self
            .node(parent_id)
            .ok_or_else(|| MutationError::parent_not_found(parent_id))?;
        parent
            .generation
            .checked_add(1)
            .ok_or_else(|| MutationError::internal("generation overflow"))
    }

    fn cascade(
        &mut self,
        start: &str,
        generation: i32,
    ) -> Result<Vec<GenerationChange>, MutationError> {
        let changes = propagate(&mut self.nodes, &self.structure, start, generation)?;
        self.mark_upserted(changes.iter().map(|c| c.node_id.as_str()));
        if !changes.is_empty() {
            debug!(
                "Generation cascade from {} rewrote {} node(s)",
                start,
                changes.len()
            );
        }
        Ok(changes)
    }

    fn view_of(&self, node_id: &str) -> Result<NodeView, MutationError> {
        self.view(node_id)
            .ok_or_else(|| MutationError::internal(format!("node '{}' vanished", node_id)))
    }
}
