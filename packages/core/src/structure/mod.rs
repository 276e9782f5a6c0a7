//! Structural data layer
//!
//! Pure, storage-independent building blocks of a tree: the graph store, the
//! cycle oracle, generation propagation and the multi-parent relation. Nothing
//! here performs I/O; the mutation protocol in [`crate::operations`] composes
//! these pieces over a [`TreeWorkspace`].

pub mod cycle;
pub mod error;
pub mod generation;
pub mod graph;
pub mod integrity;
pub mod parents;
pub mod workspace;

pub use cycle::{descendants, downward_closure, find_cycle, is_descendant};
pub use error::StructureError;
pub use generation::{propagate, GenerationChange};
pub use graph::{EdgeEntry, Placement, TreeStructure};
pub use integrity::{IntegrityReport, IntegrityViolation};
pub use parents::{ParentLink, ParentRelation, PrimaryChange};
pub use workspace::{ChangeSet, Location, TreeWorkspace};
