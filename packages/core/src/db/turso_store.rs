//! TursoStore - TreeStore Implementation for the libsql Backend
//!
//! Every transaction owns its own connection. Writers of the same tree queue
//! on an in-process lock per tree, held for the whole read-validate-write
//! sequence; writers of other trees do not wait for it. The SQLite write lock
//! (`BEGIN IMMEDIATE`) is taken only when the first write is issued, so it
//! covers just the persist and commit step. Reads use a deferred transaction
//! so a snapshot never mixes two commits.
//!
//! # Limits
//!
//! - SQLite has one write lock per file. Two trees persisting at the same
//!   moment still take turns for that final step, waiting up to the busy
//!   timeout.
//! - The per-tree locks live in the `TursoStore` value. Share one store per
//!   database file; separate stores or processes writing the same file do
//!   not serialize same-tree writers against each other.
//!
//! Dropping a transaction without committing closes its connection, and
//! SQLite rolls the open transaction back.
//!
//! # Examples
//!
//! ```rust,no_run
//! use codetree_core::db::{DatabaseService, TreeStore, TursoStore};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let db = Arc::new(DatabaseService::new(PathBuf::from("./data/codetree.db")).await?);
//!     let store: Arc<dyn TreeStore> = Arc::new(TursoStore::new(db));
//!     let snapshot = store.snapshot("tree-123").await?;
//!     Ok(())
//! }
//! ```

use crate::db::tree_store::{TreeSnapshot, TreeStore, TreeTransaction};
use crate::db::{DatabaseError, DatabaseService};
use crate::models::{Node, PersonProfile, Position, Tree};
use crate::structure::{ParentLink, TreeStructure};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use libsql::{Connection, Row};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as WriterLock, OwnedMutexGuard};
use tracing::{debug, error, info};

const TREE_COLUMNS: &str = "id, name, description, created_by, created_at, updated_at";
const NODE_COLUMNS: &str = "id, tree_id, generation, primary_parent_id, profile, properties, \
                            position_x, position_y, created_at, updated_at";

pub struct TursoStore {
    db: Arc<DatabaseService>,
    /// tree id -> writer lock
    writers: Mutex<HashMap<String, Arc<WriterLock<()>>>>,
}

impl TursoStore {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self {
            db,
            writers: Mutex::new(HashMap::new()),
        }
    }

    fn writer(&self, tree_id: &str) -> Result<Arc<WriterLock<()>>> {
        let mut writers = self
            .writers
            .lock()
            .map_err(|_| anyhow::anyhow!("writer lock table poisoned"))?;
        Ok(Arc::clone(writers.entry(tree_id.to_string()).or_default()))
    }

    async fn open(
        &self,
        tree_id: &str,
        writer: Option<OwnedMutexGuard<()>>,
    ) -> Result<TursoTransaction> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(TursoTransaction {
            conn,
            tree_id: tree_id.to_string(),
            in_transaction: false,
            _writer: writer,
        })
    }
}

async fn execute_control(conn: &Connection, sql: &str) -> Result<()> {
    conn.execute(sql, ())
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to run {}: {}", sql, e)))?;
    Ok(())
}

/// Delete the rows of one tree; `false` if there was no tree row
async fn delete_tree_rows(conn: &Connection, tree_id: &str) -> Result<bool> {
    for table in ["node_parents", "nodes"] {
        conn.execute(&format!("DELETE FROM {} WHERE tree_id = ?", table), [tree_id])
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to delete {} of {}: {}", table, tree_id, e))
            })?;
    }
    let removed = conn
        .execute("DELETE FROM trees WHERE id = ?", [tree_id])
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to delete tree {}: {}", tree_id, e)))?;
    Ok(removed > 0)
}

#[async_trait]
impl TreeStore for TursoStore {
    async fn create_tree(&self, tree: Tree) -> Result<Tree> {
        let conn = self.db.connect_with_timeout().await?;
        let structure = TreeStructure::new().to_json()?;
        conn.execute(
            "INSERT INTO trees (id, name, description, created_by, structure, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            (
                tree.id.as_str(),
                tree.name.as_str(),
                tree.description.as_str(),
                tree.created_by.as_str(),
                structure,
                format_timestamp(&tree.created_at),
                format_timestamp(&tree.updated_at),
            ),
        )
        .await
        .map_err(|e| DatabaseError::sql_execution(format!("Failed to insert tree: {}", e)))?;
        Ok(tree)
    }

    async fn get_tree(&self, tree_id: &str) -> Result<Option<Tree>> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!("SELECT {} FROM trees WHERE id = ?", TREE_COLUMNS);
        Ok(collect_trees(&conn, &sql, tree_id).await?.into_iter().next())
    }

    async fn list_trees_by_creator(&self, principal: &str) -> Result<Vec<Tree>> {
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!(
            "SELECT {} FROM trees WHERE created_by = ? ORDER BY created_at DESC, id",
            TREE_COLUMNS
        );
        collect_trees(&conn, &sql, principal).await
    }

    async fn delete_tree(&self, tree_id: &str) -> Result<bool> {
        let _writer = self.writer(tree_id)?.lock_owned().await;
        let conn = self.db.connect_with_timeout().await?;
        execute_control(&conn, "BEGIN IMMEDIATE").await?;
        match delete_tree_rows(&conn, tree_id).await {
            Ok(existed) => {
                execute_control(&conn, "COMMIT").await?;
                if existed {
                    info!("Deleted tree {} from the database", tree_id);
                }
                Ok(existed)
            }
            Err(e) => {
                if let Err(rollback_err) = execute_control(&conn, "ROLLBACK").await {
                    error!("Rollback of tree {} delete failed: {}", tree_id, rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn snapshot(&self, tree_id: &str) -> Result<Option<TreeSnapshot>> {
        let mut txn = self.open(tree_id, None).await?;
        txn.start("BEGIN DEFERRED").await?;
        let snapshot = match txn.load_tree().await? {
            Some(tree) => {
                let structure = txn.load_structure().await?;
                let links = txn.load_parent_links().await?;
                let nodes = txn.load_nodes().await?;
                Some(TreeSnapshot {
                    tree,
                    nodes,
                    structure,
                    links,
                })
            }
            None => None,
        };
        Box::new(txn).rollback().await?;
        Ok(snapshot)
    }

    async fn begin(&self, tree_id: &str) -> Result<Box<dyn TreeTransaction>> {
        let writer = self.writer(tree_id)?.lock_owned().await;
        let txn = self.open(tree_id, Some(writer)).await?;
        debug!("Opened libsql transaction on tree {}", tree_id);
        Ok(Box::new(txn))
    }
}

/// Reads before the first write run outside an SQL transaction; the tree's
/// writer lock keeps them stable.
pub struct TursoTransaction {
    conn: Connection,
    tree_id: String,
    in_transaction: bool,
    _writer: Option<OwnedMutexGuard<()>>,
}

impl TursoTransaction {
    async fn start(&mut self, begin: &str) -> Result<()> {
        if !self.in_transaction {
            execute_control(&self.conn, begin).await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    /// Take the database write lock before the first write
    async fn start_write(&mut self) -> Result<()> {
        self.start("BEGIN IMMEDIATE").await
    }

    async fn query_nodes(&self, sql: &str, arg: &str) -> Result<Vec<Node>> {
        let mut rows = self
            .conn
            .query(sql, [arg])
            .await
            .context("Failed to query nodes")?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await.context("Failed to read node row")? {
            nodes.push(row_to_node(&row)?);
        }
        Ok(nodes)
    }
}

#[async_trait]
impl TreeTransaction for TursoTransaction {
    fn tree_id(&self) -> &str {
        &self.tree_id
    }

    async fn load_tree(&mut self) -> Result<Option<Tree>> {
        let sql = format!("SELECT {} FROM trees WHERE id = ?", TREE_COLUMNS);
        Ok(collect_trees(&self.conn, &sql, &self.tree_id)
            .await?
            .into_iter()
            .next())
    }

    async fn load_structure(&mut self) -> Result<TreeStructure> {
        let mut rows = self
            .conn
            .query("SELECT structure FROM trees WHERE id = ?", [self.tree_id.as_str()])
            .await
            .context("Failed to query structure")?;
        let Some(row) = rows.next().await.context("Failed to read structure row")? else {
            bail!("tree '{}' does not exist", self.tree_id);
        };
        let raw: Option<String> = row.get(0).context("Failed to get structure")?;
        Ok(TreeStructure::from_json(raw.as_deref().unwrap_or_default())?)
    }

    async fn save_structure(&mut self, structure: &TreeStructure) -> Result<()> {
        let json = structure.to_json()?;
        self.start_write().await?;
        let updated = self
            .conn
            .execute(
                "UPDATE trees SET structure = ?, updated_at = ? WHERE id = ?",
                (json, format_timestamp(&Utc::now()), self.tree_id.as_str()),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to save structure: {}", e))
            })?;
        if updated == 0 {
            bail!("tree '{}' does not exist", self.tree_id);
        }
        Ok(())
    }

    async fn load_parent_links(&mut self) -> Result<Vec<ParentLink>> {
        let mut rows = self
            .conn
            .query(
                "SELECT node_id, parent_id, seq FROM node_parents WHERE tree_id = ? ORDER BY seq",
                [self.tree_id.as_str()],
            )
            .await
            .context("Failed to query parent links")?;
        let mut links = Vec::new();
        while let Some(row) = rows.next().await.context("Failed to read parent link")? {
            let seq: i64 = row.get(2).context("Failed to get seq")?;
            links.push(ParentLink {
                node_id: row.get(0).context("Failed to get node_id")?,
                parent_id: row.get(1).context("Failed to get parent_id")?,
                seq: u64::try_from(seq)
                    .map_err(|_| DatabaseError::corrupt_row("node_parents", "negative seq"))?,
            });
        }
        Ok(links)
    }

    async fn save_parent_links(&mut self, links: &[ParentLink]) -> Result<()> {
        self.start_write().await?;
        self.conn
            .execute(
                "DELETE FROM node_parents WHERE tree_id = ?",
                [self.tree_id.as_str()],
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to clear parent links: {}", e))
            })?;
        for link in links {
            let seq = i64::try_from(link.seq).context("link sequence out of range")?;
            self.conn
                .execute(
                    "INSERT INTO node_parents (node_id, parent_id, tree_id, seq) VALUES (?, ?, ?, ?)",
                    (
                        link.node_id.as_str(),
                        link.parent_id.as_str(),
                        self.tree_id.as_str(),
                        seq,
                    ),
                )
                .await
                .map_err(|e| {
                    DatabaseError::sql_execution(format!(
                        "Failed to insert parent link {} -> {}: {}",
                        link.parent_id, link.node_id, e
                    ))
                })?;
        }
        Ok(())
    }

    async fn load_nodes(&mut self) -> Result<Vec<Node>> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE tree_id = ? ORDER BY created_at, id",
            NODE_COLUMNS
        );
        self.query_nodes(&sql, &self.tree_id).await
    }

    async fn load_node(&mut self, node_id: &str) -> Result<Option<Node>> {
        let sql = format!("SELECT {} FROM nodes WHERE id = ?", NODE_COLUMNS);
        Ok(self.query_nodes(&sql, node_id).await?.into_iter().next())
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
        let profile = serde_json::to_string(&node.profile).context("Failed to serialize profile")?;
        let properties =
            serde_json::to_string(&node.properties).context("Failed to serialize properties")?;
        self.start_write().await?;
        // the WHERE clause keeps an id owned by another tree from being taken over
        let written = self
            .conn
            .execute(
                "INSERT INTO nodes (id, tree_id, generation, primary_parent_id, profile, properties,
                                    position_x, position_y, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    generation = excluded.generation,
                    primary_parent_id = excluded.primary_parent_id,
                    profile = excluded.profile,
                    properties = excluded.properties,
                    position_x = excluded.position_x,
                    position_y = excluded.position_y,
                    updated_at = excluded.updated_at
                 WHERE nodes.tree_id = excluded.tree_id",
                (
                    node.id.as_str(),
                    node.tree_id.as_str(),
                    i64::from(node.generation),
                    node.primary_parent_id.as_deref(),
                    profile,
                    properties,
                    node.position.x,
                    node.position.y,
                    format_timestamp(&node.created_at),
                    format_timestamp(&node.updated_at),
                ),
            )
            .await
            .map_err(|e| {
                error!("Failed to save node {}: {}", node.id, e);
                DatabaseError::sql_execution(format!("Failed to save node {}: {}", node.id, e))
            })?;
        if written == 0 {
            bail!("node id '{}' is already used in another tree", node.id);
        }
        Ok(())
    }

    async fn delete_node(&mut self, node_id: &str) -> Result<()> {
        self.start_write().await?;
        self.conn
            .execute(
                "DELETE FROM nodes WHERE id = ? AND tree_id = ?",
                (node_id, self.tree_id.as_str()),
            )
            .await
            .map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to delete node {}: {}", node_id, e))
            })?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        if !self.in_transaction {
            debug!("Nothing to commit on tree {}", self.tree_id);
            return Ok(());
        }
        self.conn.execute("COMMIT", ()).await.map_err(|e| {
            error!("Commit failed on tree {}: {}", self.tree_id, e);
            DatabaseError::sql_execution(format!("Failed to commit transaction: {}", e))
        })?;
        debug!("Committed libsql transaction on tree {}", self.tree_id);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.conn.execute("ROLLBACK", ()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to roll back transaction: {}", e))
        })?;
        Ok(())
    }
}
