//! Database Connection Management
//!
//! Connection and schema management for the libsql (SQLite compatible)
//! backend of the tree store.
//!
//! # Schema
//!
//! - `trees`: one row per tree; the graph structure lives in its `structure`
//!   JSON column (`{"roots": [...], "edges": {...}}`)
//! - `nodes`: one row per person, with `generation` and `primary_parent_id`
//! - `node_parents`: the multi-parent relation, one row per `(node, parent)`
//!   pair with its link sequence number
//!
//! All three are written in the same transaction by
//! [`TursoStore`](super::TursoStore).
//!
//! # Database Connection Patterns
//!
//! **Use `connect_with_timeout()` in async functions.** The busy timeout lets
//! concurrent writers on the same file wait for each other instead of failing
//! immediately with `SQLITE_BUSY`.
//!
//! ```no_run
//! # use codetree_core::db::DatabaseService;
//! # use std::path::PathBuf;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_service = DatabaseService::new(PathBuf::from("./data/codetree.db")).await?;
//! let conn = db_service.connect_with_timeout().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{StoreConfig, DEFAULT_BUSY_TIMEOUT_MS};
use crate::db::error::DatabaseError;
use libsql::{Builder, Database};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Database service for managing the libsql connection and schema
///
/// # Examples
///
/// ```no_run
/// use codetree_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db_path = PathBuf::from("/path/to/codetree.db");
///     let db_service = DatabaseService::new(db_path).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,

    busy_timeout_ms: u64,
}

impl DatabaseService {
    /// Open (or create) the database at `db_path` and initialize the schema
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - Schema initialization fails
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        Self::with_busy_timeout(db_path, DEFAULT_BUSY_TIMEOUT_MS).await
    }

    /// Open the database described by `config`
    pub async fn from_config(config: &StoreConfig) -> Result<Self, DatabaseError> {
        Self::with_busy_timeout(config.db_path.clone(), config.busy_timeout_ms).await
    }

    pub async fn with_busy_timeout(
        db_path: PathBuf,
        busy_timeout_ms: u64,
    ) -> Result<Self, DatabaseError> {
        let is_new_database = !db_path.exists();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
            busy_timeout_ms,
        };

        service.initialize_schema(is_new_database).await?;
        info!("Opened tree database at {}", service.db_path.display());

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so they go through `query()` rather
    /// than `execute()`.
    async fn execute_pragma(
        &self,
        conn: &libsql::Connection,
        pragma: &str,
    ) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Create tables and indexes (idempotent)
    async fn initialize_schema(&self, is_new_database: bool) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        let statements = [
            (
                "trees",
                "CREATE TABLE IF NOT EXISTS trees (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    created_by TEXT NOT NULL,
                    structure JSON NOT NULL DEFAULT '{\"roots\":[],\"edges\":{}}',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )",
            ),
            (
                "nodes",
                "CREATE TABLE IF NOT EXISTS nodes (
                    id TEXT PRIMARY KEY,
                    tree_id TEXT NOT NULL,
                    generation INTEGER NOT NULL CHECK (generation >= 1),
                    primary_parent_id TEXT,
                    profile JSON NOT NULL DEFAULT '{}',
                    properties JSON NOT NULL DEFAULT '{}',
                    position_x REAL NOT NULL DEFAULT 0,
                    position_y REAL NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )",
            ),
            (
                "node_parents",
                "CREATE TABLE IF NOT EXISTS node_parents (
                    node_id TEXT NOT NULL,
                    parent_id TEXT NOT NULL,
                    tree_id TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    PRIMARY KEY (node_id, parent_id),
                    CHECK (node_id <> parent_id)
                )",
            ),
            (
                "idx_nodes_tree",
                "CREATE INDEX IF NOT EXISTS idx_nodes_tree ON nodes(tree_id, created_at)",
            ),
            (
                "idx_node_parents_tree",
                "CREATE INDEX IF NOT EXISTS idx_node_parents_tree ON node_parents(tree_id, seq)",
            ),
            (
                "idx_trees_creator",
                "CREATE INDEX IF NOT EXISTS idx_trees_creator ON trees(created_by, created_at)",
            ),
        ];

        for (name, sql) in statements {
            conn.execute(sql, ()).await.map_err(|e| {
                DatabaseError::initialization_failed(format!("Failed to create '{}': {}", name, e))
            })?;
        }

        // Flush the schema of a fresh file so a second handle sees the tables
        if is_new_database {
            self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
                .await?;
        }

        debug!("Schema ready at {}", self.db_path.display());
        Ok(())
    }

    /// Get a connection without any per-connection setup
    ///
    /// Only for synchronous, single-threaded use; async code should use
    /// `connect_with_timeout()`.
    pub fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get a connection with the configured busy timeout applied
    pub async fn connect_with_timeout(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(&conn, &format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms))
            .await?;

        Ok(conn)
    }

    pub fn busy_timeout_ms(&self) -> u64 {
        self.busy_timeout_ms
    }
}
