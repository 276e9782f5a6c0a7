//! Authorization collaborator
//!
//! A mutation is only applied after [`AccessPolicy::may_edit`] allows the
//! principal to edit the target tree. Reads are not gated.

use std::collections::HashMap;
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::models::Tree;

/// Identity of the caller of a service operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Principal {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[async_trait]
pub trait AccessPolicy: Send + Sync {
    /// Whether `principal` may apply mutations to `tree`
    async fn may_edit(&self, tree: &Tree, principal: &Principal) -> Result<bool>;
}

/// Role of a principal on a tree shared with them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareRole {
    Viewer,
    Editor,
    Owner,
}

impl ShareRole {
    pub fn can_edit(self) -> bool {
        matches!(self, ShareRole::Editor | ShareRole::Owner)
    }
}

/// The tree creator may edit; anyone else needs an `Editor` or `Owner` share
#[derive(Debug, Default)]
pub struct ShareRolePolicy {
    roles: RwLock<HashMap<(String, Principal), ShareRole>>,
}

impl ShareRolePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share `tree_id` with `principal`, replacing any earlier role
    pub async fn grant(&self, tree_id: impl Into<String>, principal: Principal, role: ShareRole) {
        self.roles
            .write()
            .await
            .insert((tree_id.into(), principal), role);
    }

    pub async fn revoke(&self, tree_id: &str, principal: &Principal) -> Option<ShareRole> {
        self.roles
            .write()
            .await
            .remove(&(tree_id.to_string(), principal.clone()))
    }

    pub async fn role_of(&self, tree_id: &str, principal: &Principal) -> Option<ShareRole> {
        self.roles
            .read()
            .await
            .get(&(tree_id.to_string(), principal.clone()))
            .copied()
    }
}

#[async_trait]
impl AccessPolicy for ShareRolePolicy {
    async fn may_edit(&self, tree: &Tree, principal: &Principal) -> Result<bool> {
        if tree.created_by == principal.as_str() {
            return Ok(true);
        }
        Ok(self
            .role_of(&tree.id, principal)
            .await
            .is_some_and(ShareRole::can_edit))
    }
}

/// Allows every principal; for trusted in-process callers and tools
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl AccessPolicy for AllowAll {
    async fn may_edit(&self, _tree: &Tree, _principal: &Principal) -> Result<bool> {
        Ok(true)
    }
}
