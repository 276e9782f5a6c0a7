//! Codetree Core - structural consistency engine for trees of people
//!
//! A tree is a directed acyclic graph of person nodes. Every node has a
//! generation derived from its primary parent and may be linked to any number
//! of additional parents in the same tree.
//!
//! # Architecture
//!
//! - **Workspace per transaction**: a mutation loads its tree into an
//!   in-memory arena, validates every precondition, applies the change and
//!   writes back only what changed, all inside one store transaction
//! - **Primary-parent generations**: `generation(n) = generation(primary(n)) + 1`,
//!   maintained by an explicit-stack cascade
//! - **libsql/Turso**: embedded SQLite-compatible store, with an in-process
//!   store for tests and embedding
//!
//! # Modules
//!
//! - [`models`] - Node, Tree and their payload types
//! - [`structure`] - graph store, cycle oracle, generation propagator,
//!   multi-parent relation and integrity checks
//! - [`operations`] - the structural mutation protocol
//! - [`db`] - persistence traits and stores
//! - [`services`] - `TreeService`, authorization and events
//! - [`config`] - environment configuration

pub mod config;
pub mod db;
pub mod models;
pub mod operations;
pub mod services;
pub mod structure;

// Re-export commonly used types
pub use config::StoreConfig;
pub use models::*;
pub use operations::{CreateNodeParams, Mutation, MutationError, MutationOutcome};
pub use services::*;
