//! Business Services
//!
//! - `TreeService` - authorization, the transaction boundary and events for
//!   every tree operation
//! - `AccessPolicy` - who may edit a tree (`ShareRolePolicy`, `AllowAll`)
//! - `TreeEvent` - broadcast after each committed operation
//!
//! Services coordinate between the database layer and the structural engine;
//! they never change structure themselves.

pub mod access;
pub mod error;
pub mod events;
pub mod tree_service;

pub use access::{AccessPolicy, AllowAll, Principal, ShareRole, ShareRolePolicy};
pub use error::{ErrorKind, TreeServiceError};
pub use events::TreeEvent;
pub use tree_service::TreeService;
