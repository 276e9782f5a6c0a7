//! MemoryStore - in-process TreeStore
//!
//! Every tree has its own writer lock and an `Arc` of its committed record.
//! A transaction holds the writer lock for its whole lifetime and works on a
//! private draft; `commit` swaps the draft in as the new committed record.
//! Readers only ever clone the `Arc`, so they never wait on writers and never
//! see a half-applied mutation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::tree_store::{TreeSnapshot, TreeStore, TreeTransaction};
use crate::models::{Node, Tree};
use crate::structure::{ParentLink, TreeStructure};

#[derive(Debug, Clone)]
struct TreeRecord {
    tree: Tree,
    nodes: BTreeMap<String, Node>,
    structure: TreeStructure,
    links: Vec<ParentLink>,
}

impl TreeRecord {
    fn snapshot(&self) -> TreeSnapshot {
        let mut nodes: Vec<Node> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        TreeSnapshot {
            tree: self.tree.clone(),
            nodes,
            structure: self.structure.clone(),
            links: self.links.clone(),
        }
    }
}

struct TreeSlot {
    writer: Arc<Mutex<()>>,
    committed: RwLock<Arc<TreeRecord>>,
}

impl TreeSlot {
    fn committed(&self) -> Result<Arc<TreeRecord>> {
        self.committed
            .read()
            .map(|record| Arc::clone(&record))
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

#[derive(Default)]
struct Registry {
    trees: HashMap<String, Arc<TreeSlot>>,
    /// node id -> owning tree id, for committed nodes
    node_index: HashMap<String, String>,
}

/// In-memory store for tests and embedded use
#[derive(Clone, Default)]
pub struct MemoryStore {
    registry: Arc<RwLock<Registry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, tree_id: &str) -> Result<Option<Arc<TreeSlot>>> {
        let registry = self
            .registry
            .read()
            .map_err(|_| anyhow!("memory store registry poisoned"))?;
        Ok(registry.trees.get(tree_id).cloned())
    }

    /// `slot` is still the registered record of `tree_id`
    fn is_registered(&self, tree_id: &str, slot: &Arc<TreeSlot>) -> Result<bool> {
        Ok(self
            .slot(tree_id)?
            .is_some_and(|current| Arc::ptr_eq(&current, slot)))
    }

    fn find_committed_node(&self, node_id: &str) -> Result<Option<Node>> {
        let slot = {
            let registry = self
                .registry
                .read()
                .map_err(|_| anyhow!("memory store registry poisoned"))?;
            registry
                .node_index
                .get(node_id)
                .and_then(|tree_id| registry.trees.get(tree_id))
                .cloned()
        };
        match slot {
            Some(slot) => Ok(slot.committed()?.nodes.get(node_id).cloned()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TreeStore for MemoryStore {
    async fn create_tree(&self, tree: Tree) -> Result<Tree> {
        let mut registry = self
            .registry
            .write()
            .map_err(|_| anyhow!("memory store registry poisoned"))?;
        if registry.trees.contains_key(&tree.id) {
            bail!("tree '{}' already exists", tree.id);
        }
        let record = TreeRecord {
            tree: tree.clone(),
            nodes: BTreeMap::new(),
            structure: TreeStructure::new(),
            links: Vec::new(),
        };
        registry.trees.insert(
            tree.id.clone(),
            Arc::new(TreeSlot {
                writer: Arc::new(Mutex::new(())),
                committed: RwLock::new(Arc::new(record)),
            }),
        );
        Ok(tree)
    }

    async fn get_tree(&self, tree_id: &str) -> Result<Option<Tree>> {
        match self.slot(tree_id)? {
            Some(slot) => Ok(Some(slot.committed()?.tree.clone())),
            None => Ok(None),
        }
    }

    async fn list_trees_by_creator(&self, principal: &str) -> Result<Vec<Tree>> {
        let slots: Vec<Arc<TreeSlot>> = {
            let registry = self
                .registry
                .read()
                .map_err(|_| anyhow!("memory store registry poisoned"))?;
            registry.trees.values().cloned().collect()
        };
        let mut trees = Vec::new();
        for slot in slots {
            let record = slot.committed()?;
            if record.tree.created_by == principal {
                trees.push(record.tree.clone());
            }
        }
        trees.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(trees)
    }

    async fn delete_tree(&self, tree_id: &str) -> Result<bool> {
        let Some(slot) = self.slot(tree_id)? else {
            return Ok(false);
        };
        let _writer = Arc::clone(&slot.writer).lock_owned().await;

        let mut registry = self
            .registry
            .write()
            .map_err(|_| anyhow!("memory store registry poisoned"))?;
        match registry.trees.get(tree_id) {
            Some(current) if Arc::ptr_eq(current, &slot) => {}
            _ => return Ok(false),
        }
        registry.trees.remove(tree_id);
        registry.node_index.retain(|_, owner| owner != tree_id);
        debug!("Deleted memory tree {}", tree_id);
        Ok(true)
    }

    async fn snapshot(&self, tree_id: &str) -> Result<Option<TreeSnapshot>> {
        match self.slot(tree_id)? {
            Some(slot) => Ok(Some(slot.committed()?.snapshot())),
            None => Ok(None),
        }
    }

    async fn begin(&self, tree_id: &str) -> Result<Box<dyn TreeTransaction>> {
        let (slot, guard, draft) = match self.slot(tree_id)? {
            Some(slot) => {
                let guard = Arc::clone(&slot.writer).lock_owned().await;
                if self.is_registered(tree_id, &slot)? {
                    // read only after the lock so the draft starts from the latest commit
                    let draft = (*slot.committed()?).clone();
                    (Some(slot), Some(guard), Some(draft))
                } else {
                    // deleted while this call waited for the lock
                    (None, None, None)
                }
            }
            None => (None, None, None),
        };
        debug!("Opened memory transaction on tree {}", tree_id);
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            tree_id: tree_id.to_string(),
            slot,
            _guard: guard,
            draft,
            saved: BTreeSet::new(),
            deleted: BTreeSet::new(),
        }))
    }
}

struct MemoryTransaction {
    store: MemoryStore,
    tree_id: String,
    slot: Option<Arc<TreeSlot>>,
    _guard: Option<OwnedMutexGuard<()>>,
    draft: Option<TreeRecord>,
    saved: BTreeSet<String>,
    deleted: BTreeSet<String>,
}

impl MemoryTransaction {
    fn draft(&mut self) -> Result<&mut TreeRecord> {
        let tree_id = &self.tree_id;
        self.draft
            .as_mut()
            .ok_or_else(|| anyhow!("tree '{}' does not exist", tree_id))
    }
}

#[async_trait]
impl TreeTransaction for MemoryTransaction {
    fn tree_id(&self) -> &str {
        &self.tree_id
    }

    async fn load_tree(&mut self) -> Result<Option<Tree>> {
        Ok(self.draft.as_ref().map(|record| record.tree.clone()))
    }

    async fn load_structure(&mut self) -> Result<TreeStructure> {
        Ok(self.draft()?.structure.clone())
    }

    async fn save_structure(&mut self, structure: &TreeStructure) -> Result<()> {
        let draft = self.draft()?;
        draft.structure = structure.clone();
        draft.tree.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn load_parent_links(&mut self) -> Result<Vec<ParentLink>> {
        Ok(self.draft()?.links.clone())
    }

    async fn save_parent_links(&mut self, links: &[ParentLink]) -> Result<()> {
        self.draft()?.links = links.to_vec();
        Ok(())
    }

    async fn load_nodes(&mut self) -> Result<Vec<Node>> {
        Ok(self.draft()?.snapshot().nodes)
    }

    async fn load_node(&mut self, node_id: &str) -> Result<Option<Node>> {
        if let Some(draft) = self.draft.as_ref() {
            if let Some(node) = draft.nodes.get(node_id) {
                return Ok(Some(node.clone()));
            }
            if self.deleted.contains(node_id) {
                return Ok(None);
            }
        }
        match self.store.find_committed_node(node_id)? {
            Some(node) if node.tree_id == self.tree_id => Ok(None),
            other => Ok(other),
        }
    }

    async fn save_node(&mut self, node: &Node) -> Result<()> {
        if node.tree_id != self.tree_id {
            bail!(
                "node '{}' belongs to tree '{}', not '{}'",
                node.id,
                node.tree_id,
                self.tree_id
            );
        }
        self.draft()?.nodes.insert(node.id.clone(), node.clone());
        self.deleted.remove(&node.id);
        self.saved.insert(node.id.clone());
        Ok(())
    }

    async fn delete_node(&mut self, node_id: &str) -> Result<()> {
        self.draft()?.nodes.remove(node_id);
        self.saved.remove(node_id);
        self.deleted.insert(node_id.to_string());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let (Some(slot), Some(draft)) = (this.slot, this.draft) else {
            bail!("tree '{}' does not exist", this.tree_id);
        };

        let mut registry = this
            .store
            .registry
            .write()
            .map_err(|_| anyhow!("memory store registry poisoned"))?;
        match registry.trees.get(&this.tree_id) {
            Some(current) if Arc::ptr_eq(current, &slot) => {}
            _ => bail!("tree '{}' was deleted", this.tree_id),
        }
        for id in &this.saved {
            if let Some(owner) = registry.node_index.get(id) {
                if owner != &this.tree_id {
                    bail!("node id '{}' is already used in tree '{}'", id, owner);
                }
            }
        }
        for id in &this.deleted {
            registry.node_index.remove(id);
        }
        for id in &this.saved {
            registry
                .node_index
                .insert(id.clone(), this.tree_id.clone());
        }
        let mut committed = slot
            .committed
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        *committed = Arc::new(draft);
        debug!("Committed memory transaction on tree {}", this.tree_id);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!("Rolled back memory transaction on tree {}", self.tree_id);
        Ok(())
    }
}
