//! Tree Service - the callable surface of the structural engine
//!
//! `TreeService` owns the transaction boundary of every operation:
//!
//! 1. open the tree's transaction (waits for other writers of the same tree)
//! 2. load the tree and authorize the principal
//! 3. load the tree into a [`TreeWorkspace`] and resolve ids that live
//!    elsewhere, so cross-tree references are told apart from missing ones
//! 4. apply the mutation to the workspace
//! 5. write back exactly what changed and commit
//! 6. publish [`TreeEvent`]s
//!
//! Any failure before the commit rolls the transaction back, so a rejected
//! mutation leaves no trace in the store.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{StoreConfig, DEFAULT_EVENT_CAPACITY};
use crate::db::{TreeStore, TreeTransaction};
use crate::models::{NewTree, NodeUpdate, NodeView, Tree};
use crate::operations::{CreateNodeParams, Mutation, MutationError, MutationKind, MutationOutcome};
use crate::services::access::{AccessPolicy, Principal};
use crate::services::error::{StoreContext, TreeServiceError};
use crate::services::events::TreeEvent;
use crate::structure::{integrity, ChangeSet, IntegrityReport, Location, TreeWorkspace};

/// Structural operations on trees of people
///
/// # Examples
///
/// ```no_run
/// use codetree_core::db::MemoryStore;
/// use codetree_core::models::{NewTree, PersonProfile};
/// use codetree_core::operations::CreateNodeParams;
/// use codetree_core::services::{AllowAll, Principal, TreeService};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = TreeService::new(Arc::new(MemoryStore::new()), Arc::new(AllowAll));
///     let me = Principal::new("user-1");
///
///     let tree = service
///         .create_tree(&me, NewTree { name: "Class of 2024".into(), ..Default::default() })
///         .await?;
///     let root = service
///         .create_node(&me, &tree.id, CreateNodeParams::new(PersonProfile::with_nickname("Ann")))
///         .await?;
///     let child = service
///         .create_node(
///             &me,
///             &tree.id,
///             CreateNodeParams::new(PersonProfile::with_nickname("Bo")).with_parent(&root.node.id),
///         )
///         .await?;
///     assert_eq!(child.node.generation, 2);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct TreeService {
    store: Arc<dyn TreeStore>,
    policy: Arc<dyn AccessPolicy>,
    event_tx: broadcast::Sender<TreeEvent>,
}

impl TreeService {
    pub fn new(store: Arc<dyn TreeStore>, policy: Arc<dyn AccessPolicy>) -> Self {
        Self::with_capacity(store, policy, DEFAULT_EVENT_CAPACITY)
    }

    pub fn from_config(
        store: Arc<dyn TreeStore>,
        policy: Arc<dyn AccessPolicy>,
        config: &StoreConfig,
    ) -> Self {
        Self::with_capacity(store, policy, config.event_channel_capacity)
    }

    /// `capacity` must be greater than zero
    pub fn with_capacity(
        store: Arc<dyn TreeStore>,
        policy: Arc<dyn AccessPolicy>,
        capacity: usize,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            store,
            policy,
            event_tx,
        }
    }

    pub fn store(&self) -> &Arc<dyn TreeStore> {
        &self.store
    }

    /// Receive every event published after the call
    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.event_tx.subscribe()
    }

    /// Ignores send errors; having no subscriber is normal
    fn emit_event(&self, event: TreeEvent) {
        let _ = self.event_tx.send(event);
    }

    // ---- Trees ----

    /// Create an empty tree owned by `principal`
    pub async fn create_tree(
        &self,
        principal: &Principal,
        new_tree: NewTree,
    ) -> Result<Tree, TreeServiceError> {
        new_tree.validate()?;
        let tree = Tree::new(
            new_tree.name.trim().to_string(),
            new_tree.description,
            principal.to_string(),
        );
        let tree = self
            .store
            .create_tree(tree)
            .await
            .store_context("create tree")?;
        info!("Created tree {} for {}", tree.id, principal);
        Ok(tree)
    }

    pub async fn get_tree(&self, tree_id: &str) -> Result<Tree, TreeServiceError> {
        require_tree_id(tree_id)?;
        self.store
            .get_tree(tree_id)
            .await
            .store_context(format!("load tree '{}'", tree_id))?
            .ok_or_else(|| TreeServiceError::tree_not_found(tree_id))
    }

    /// Trees created by `principal`, newest first
    pub async fn list_trees(&self, principal: &Principal) -> Result<Vec<Tree>, TreeServiceError> {
        self.store
            .list_trees_by_creator(principal.as_str())
            .await
            .store_context("list trees")
    }

    /// Delete a tree with every node in it
    ///
    /// Only the tree's creator may do this, whatever the access policy allows.
    pub async fn delete_tree(
        &self,
        principal: &Principal,
        tree_id: &str,
    ) -> Result<(), TreeServiceError> {
        let tree = self.get_tree(tree_id).await?;
        if tree.created_by != principal.as_str() {
            warn!("Principal {} may not delete tree {}", principal, tree_id);
            return Err(TreeServiceError::permission_denied(tree_id, principal.as_str()));
        }
        let existed = self
            .store
            .delete_tree(tree_id)
            .await
            .store_context(format!("delete tree '{}'", tree_id))?;
        if !existed {
            return Err(TreeServiceError::tree_not_found(tree_id));
        }

        info!("Deleted tree {} by {}", tree_id, principal);
        self.emit_event(TreeEvent::TreeDeleted {
            tree_id: tree_id.to_string(),
        });
        Ok(())
    }

    // ---- Reads ----

    /// Every node of the tree in creation order
    pub async fn list_nodes(&self, tree_id: &str) -> Result<Vec<NodeView>, TreeServiceError> {
        Ok(self.read(tree_id).await?.views())
    }

    pub async fn get_node(
        &self,
        tree_id: &str,
        node_id: &str,
    ) -> Result<NodeView, TreeServiceError> {
        self.read(tree_id)
            .await?
            .view(node_id)
            .ok_or_else(|| TreeServiceError::node_not_found(node_id))
    }

    /// Everything below `node_id`, breadth-first, without the node itself
    pub async fn get_descendants(
        &self,
        tree_id: &str,
        node_id: &str,
    ) -> Result<Vec<NodeView>, TreeServiceError> {
        let workspace = self.read(tree_id).await?;
        if workspace.node(node_id).is_none() {
            return Err(TreeServiceError::node_not_found(node_id));
        }
        Ok(workspace.descendant_views(node_id))
    }

    pub async fn check_integrity(&self, tree_id: &str) -> Result<IntegrityReport, TreeServiceError> {
        let workspace = self.read(tree_id).await?;
        let report = integrity::report(&workspace);
        if !report.is_clean() {
            warn!(
                "Tree {} has {} integrity violation(s)",
                tree_id,
                report.violations.len()
            );
        }
        Ok(report)
    }

    /// Committed state of a tree as a workspace
    async fn read(&self, tree_id: &str) -> Result<TreeWorkspace, TreeServiceError> {
        require_tree_id(tree_id)?;
        let snapshot = self
            .store
            .snapshot(tree_id)
            .await
            .store_context(format!("read tree '{}'", tree_id))?
            .ok_or_else(|| TreeServiceError::tree_not_found(tree_id))?;
        snapshot.into_workspace().map_err(|e| {
            error!("Stored state of tree {} is malformed: {}", tree_id, e);
            TreeServiceError::internal(e.to_string())
        })
    }

    // ---- Mutations ----

    /// Apply one structural mutation to a tree as an atomic unit
    pub async fn mutate(
        &self,
        principal: &Principal,
        tree_id: &str,
        mutation: Mutation,
    ) -> Result<MutationOutcome, TreeServiceError> {
        let kind = mutation.kind();
        let referenced: Vec<String> = mutation
            .referenced_ids()
            .into_iter()
            .map(str::to_string)
            .collect();

        let outcome = self
            .run(principal, tree_id, kind, referenced, |ws| ws.apply(mutation))
            .await?;

        info!(
            "{} committed on node {} in tree {} by {}",
            kind, outcome.node.node.id, tree_id, principal
        );
        self.emit_event(mutation_event(tree_id, kind, &outcome));
        Ok(outcome)
    }

    /// Create a person, as a root or below `params.parent_ids`
    pub async fn create_node(
        &self,
        principal: &Principal,
        tree_id: &str,
        params: CreateNodeParams,
    ) -> Result<NodeView, TreeServiceError> {
        let outcome = self
            .mutate(principal, tree_id, Mutation::Create(params))
            .await?;
        Ok(outcome.node)
    }

    /// Make `new_parent_id` the primary parent of `node_id`
    pub async fn move_node(
        &self,
        principal: &Principal,
        tree_id: &str,
        node_id: &str,
        new_parent_id: &str,
        insert_after: Option<&str>,
    ) -> Result<MutationOutcome, TreeServiceError> {
        let mutation = Mutation::Move {
            node_id: node_id.to_string(),
            new_parent_id: new_parent_id.to_string(),
            insert_after: insert_after.map(str::to_string),
        };
        self.mutate(principal, tree_id, mutation).await
    }

    /// Detach `node_id` from every parent and make it a root
    pub async fn unlink_node(
        &self,
        principal: &Principal,
        tree_id: &str,
        node_id: &str,
    ) -> Result<MutationOutcome, TreeServiceError> {
        let mutation = Mutation::Unlink {
            node_id: node_id.to_string(),
        };
        self.mutate(principal, tree_id, mutation).await
    }

    pub async fn add_parent(
        &self,
        principal: &Principal,
        tree_id: &str,
        node_id: &str,
        parent_id: &str,
    ) -> Result<MutationOutcome, TreeServiceError> {
        let mutation = Mutation::AddParent {
            node_id: node_id.to_string(),
            parent_id: parent_id.to_string(),
        };
        self.mutate(principal, tree_id, mutation).await
    }

    pub async fn remove_parent(
        &self,
        principal: &Principal,
        tree_id: &str,
        node_id: &str,
        parent_id: &str,
    ) -> Result<MutationOutcome, TreeServiceError> {
        let mutation = Mutation::RemoveParent {
            node_id: node_id.to_string(),
            parent_id: parent_id.to_string(),
        };
        self.mutate(principal, tree_id, mutation).await
    }

    /// Delete `node_id` and everything below it; returns the removed ids
    pub async fn delete_node(
        &self,
        principal: &Principal,
        tree_id: &str,
        node_id: &str,
    ) -> Result<Vec<String>, TreeServiceError> {
        let mutation = Mutation::Delete {
            node_id: node_id.to_string(),
        };
        Ok(self.mutate(principal, tree_id, mutation).await?.deleted)
    }

    /// Replace passthrough fields of a node
    pub async fn update_node(
        &self,
        principal: &Principal,
        tree_id: &str,
        node_id: &str,
        update: NodeUpdate,
    ) -> Result<NodeView, TreeServiceError> {
        let view = self
            .run(principal, tree_id, "update", Vec::new(), |ws| {
                ws.update_node(node_id, update)
            })
            .await?;

        info!("Updated node {} in tree {} by {}", node_id, tree_id, principal);
        self.emit_event(TreeEvent::NodeUpdated {
            tree_id: tree_id.to_string(),
            node: view.clone(),
        });
        Ok(view)
    }

    /// Run `op` inside the tree's transaction, committing on success
    async fn run<T, F>(
        &self,
        principal: &Principal,
        tree_id: &str,
        label: impl std::fmt::Display + Send,
        referenced: Vec<String>,
        op: F,
    ) -> Result<T, TreeServiceError>
    where
        T: Send,
        F: FnOnce(&mut TreeWorkspace) -> Result<T, MutationError> + Send,
    {
        require_tree_id(tree_id)?;
        let mut txn = self
            .store
            .begin(tree_id)
            .await
            .store_context(format!("begin transaction on tree '{}'", tree_id))?;

        let staged = self.stage(txn.as_mut(), principal, &referenced, op).await;
        match staged {
            Ok(value) => {
                txn.commit()
                    .await
                    .store_context(format!("commit tree '{}'", tree_id))?;
                Ok(value)
            }
            Err(err) => {
                warn!("{} rejected on tree {}: {}", label, tree_id, err);
                if let Err(rollback_err) = txn.rollback().await {
                    error!("Rollback of tree {} failed: {}", tree_id, rollback_err);
                }
                Err(err)
            }
        }
    }

    /// Everything between `begin` and `commit`
    async fn stage<T, F>(
        &self,
        txn: &mut dyn TreeTransaction,
        principal: &Principal,
        referenced: &[String],
        op: F,
    ) -> Result<T, TreeServiceError>
    where
        T: Send,
        F: FnOnce(&mut TreeWorkspace) -> Result<T, MutationError> + Send,
    {
        let tree_id = txn.tree_id().to_string();
        let tree = txn
            .load_tree()
            .await
            .store_context("load tree")?
            .ok_or_else(|| TreeServiceError::tree_not_found(&tree_id))?;
        self.authorize(&tree, principal).await?;

        let nodes = txn.load_nodes().await.store_context("load nodes")?;
        let structure = txn.load_structure().await.store_context("load structure")?;
        let links = txn
            .load_parent_links()
            .await
            .store_context("load parent links")?;
        let mut workspace = TreeWorkspace::from_parts(tree.id, nodes, structure, links)
            .map_err(|e| {
                error!("Stored state of tree {} is malformed: {}", tree_id, e);
                TreeServiceError::internal(e.to_string())
            })?;

        for id in referenced {
            if id.trim().is_empty() || workspace.locate(id) != Location::Missing {
                continue;
            }
            if let Some(node) = txn.load_node(id).await.store_context("resolve node")? {
                debug!("Node {} referenced from tree {} lives in {}", id, tree_id, node.tree_id);
                workspace.register_foreign(node.id, node.tree_id);
            }
        }

        let value = op(&mut workspace)?;
        let changes = workspace.take_changes();
        persist(txn, &workspace, &changes).await?;
        Ok(value)
    }

    async fn authorize(&self, tree: &Tree, principal: &Principal) -> Result<(), TreeServiceError> {
        let allowed = self
            .policy
            .may_edit(tree, principal)
            .await
            .store_context("authorize")?;
        if !allowed {
            warn!("Principal {} may not edit tree {}", principal, tree.id);
            return Err(TreeServiceError::permission_denied(&tree.id, principal.as_str()));
        }
        Ok(())
    }
}

fn require_tree_id(tree_id: &str) -> Result<(), TreeServiceError> {
    if tree_id.trim().is_empty() {
        return Err(TreeServiceError::invalid_argument("tree id is required"));
    }
    Ok(())
}

/// Write the changed part of `workspace` into the transaction
async fn persist(
    txn: &mut dyn TreeTransaction,
    workspace: &TreeWorkspace,
    changes: &ChangeSet,
) -> Result<(), TreeServiceError> {
    if changes.is_empty() {
        return Ok(());
    }
    for id in &changes.removed {
        txn.delete_node(id)
            .await
            .store_context(format!("delete node '{}'", id))?;
    }
    for id in changes.upserted.difference(&changes.removed) {
        let node = workspace
            .node(id)
            .ok_or_else(|| TreeServiceError::internal(format!("changed node '{}' vanished", id)))?;
        txn.save_node(node)
            .await
            .store_context(format!("save node '{}'", id))?;
    }
    if changes.structure {
        txn.save_parent_links(&workspace.parent_links())
            .await
            .store_context("save parent links")?;
        txn.save_structure(workspace.structure())
            .await
            .store_context("save structure")?;
    }
    debug!(
        "Persisted {} node(s), removed {}, structure changed: {}",
        changes.upserted.len(),
        changes.removed.len(),
        changes.structure
    );
    Ok(())
}

fn mutation_event(tree_id: &str, kind: MutationKind, outcome: &MutationOutcome) -> TreeEvent {
    match kind {
        MutationKind::Create => TreeEvent::NodeCreated {
            tree_id: tree_id.to_string(),
            node: outcome.node.clone(),
        },
        MutationKind::Delete => TreeEvent::NodesDeleted {
            tree_id: tree_id.to_string(),
            node_ids: outcome.deleted.clone(),
        },
        _ => TreeEvent::StructureChanged {
            tree_id: tree_id.to_string(),
            node_id: outcome.node.node.id.clone(),
            mutation: kind,
            regenerated: outcome
                .regenerated
                .iter()
                .map(|change| change.node_id.clone())
                .collect(),
        },
    }
}
