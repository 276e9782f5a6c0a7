//! TreeStore Trait - Persistence Abstraction Layer
//!
//! This module defines the persistence collaborator of the structural engine.
//! `TreeStore` hands out reads and per-tree transactions; `TreeTransaction` is
//! one atomic unit of work over a single tree.
//!
//! # Design Decisions
//!
//! 1. **Per-tree transactions**: `begin(tree_id)` serializes writers of the same
//!    tree and never blocks writers of other trees
//! 2. **Consistent reads**: `snapshot` returns committed state only, never a
//!    partially applied mutation
//! 3. **Error Handling**: Uses `anyhow::Result`; the service maps every store
//!    failure to an internal error
//! 4. **Drop means rollback**: a transaction dropped without `commit` leaves no
//!    trace, so a cancelled caller cannot leave partial structural changes
//!
//! # Examples
//!
//! ```rust,no_run
//! use codetree_core::db::{MemoryStore, TreeStore};
//! use codetree_core::models::Tree;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = MemoryStore::new();
//!     let tree = store
//!         .create_tree(Tree::new("Class of 2024".into(), String::new(), "user-1".into()))
//!         .await?;
//!
//!     let mut txn = store.begin(&tree.id).await?;
//!     let structure = txn.load_structure().await?;
//!     txn.save_structure(&structure).await?;
//!     txn.commit().await?;
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Node, Tree};
use crate::structure::{ParentLink, StructureError, TreeStructure, TreeWorkspace};

/// Committed state of one tree
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    pub tree: Tree,
    pub nodes: Vec<Node>,
    pub structure: TreeStructure,
    pub links: Vec<ParentLink>,
}

impl TreeSnapshot {
    pub fn into_workspace(self) -> Result<TreeWorkspace, StructureError> {
        TreeWorkspace::from_parts(self.tree.id, self.nodes, self.structure, self.links)
    }
}

/// Abstraction layer for tree persistence
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the service shares one store across
/// every caller.
#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Persist a new, empty tree
    async fn create_tree(&self, tree: Tree) -> Result<Tree>;

    async fn get_tree(&self, tree_id: &str) -> Result<Option<Tree>>;

    /// Trees created by `principal`, newest first
    async fn list_trees_by_creator(&self, principal: &str) -> Result<Vec<Tree>>;

    /// Remove a tree together with its nodes, structure and parent links
    ///
    /// Waits for an open transaction on the tree. Returns `false` if the tree
    /// did not exist.
    async fn delete_tree(&self, tree_id: &str) -> Result<bool>;

    /// Committed state of a tree, or `None` if it does not exist
    async fn snapshot(&self, tree_id: &str) -> Result<Option<TreeSnapshot>>;

    /// Open the atomic unit of work for one tree
    ///
    /// Waits while another transaction on the same tree is open.
    async fn begin(&self, tree_id: &str) -> Result<Box<dyn TreeTransaction>>;
}

/// One atomic unit of work over a single tree
///
/// Writes are invisible to readers until `commit` returns. Dropping the
/// transaction without committing discards every write.
#[async_trait]
pub trait TreeTransaction: Send {
    fn tree_id(&self) -> &str;

    async fn load_tree(&mut self) -> Result<Option<Tree>>;

    async fn load_structure(&mut self) -> Result<TreeStructure>;

    async fn save_structure(&mut self, structure: &TreeStructure) -> Result<()>;

    /// All parent links of the tree, oldest first
    async fn load_parent_links(&mut self) -> Result<Vec<ParentLink>>;

    /// Replace the tree's parent links
    async fn save_parent_links(&mut self, links: &[ParentLink]) -> Result<()>;

    async fn load_nodes(&mut self) -> Result<Vec<Node>>;

    /// Look a node up by id in any tree
    async fn load_node(&mut self, node_id: &str) -> Result<Option<Node>>;

    /// Insert or update a node of this tree
    async fn save_node(&mut self, node: &Node) -> Result<()>;

    async fn delete_node(&mut self, node_id: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
