//! Data Models
//!
//! - [`Node`] - one person in a tree, with its generation and primary parent
//! - [`Tree`] - the owning container and isolation unit

mod node;
mod tree;

pub use node::{Node, NodeStatus, NodeUpdate, NodeView, PersonProfile, Position, ValidationError};
pub use tree::{NewTree, Tree};
