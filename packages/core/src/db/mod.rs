//! Database Layer
//!
//! The persistence collaborator of the structural engine:
//!
//! - [`TreeStore`] / [`TreeTransaction`] - the storage seam used by the service
//! - [`MemoryStore`] - in-process store, one writer lock per tree
//! - [`DatabaseService`] + [`TursoStore`] - libsql (SQLite compatible) file
//!   store, behind the `turso` feature

mod memory_store;
mod tree_store;

#[cfg(feature = "turso")]
mod database;
#[cfg(feature = "turso")]
mod error;
#[cfg(feature = "turso")]
mod turso_store;

pub use memory_store::MemoryStore;
pub use tree_store::{TreeSnapshot, TreeStore, TreeTransaction};

#[cfg(feature = "turso")]
pub use database::DatabaseService;
#[cfg(feature = "turso")]
pub use error::DatabaseError;
#[cfg(feature = "turso")]
pub use turso_store::{TursoStore, TursoTransaction};
