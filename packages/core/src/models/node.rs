//! Node Data Structures
//!
//! This module defines the `Node` struct: one person placed at an integer
//! generation inside exactly one tree.
//!
//! # Architecture
//!
//! - **Structural fields**: `generation` and `primary_parent_id` are owned by the
//!   structural-consistency engine and are never written through [`NodeUpdate`]
//! - **Passthrough fields**: `profile`, `position` and `properties` are carried
//!   alongside the node and never interpreted by the engine
//!
//! # Examples
//!
//! ```rust
//! use codetree_core::models::{Node, PersonProfile};
//!
//! let node = Node::new("tree-1".to_string(), PersonProfile::with_nickname("Tee"));
//! assert_eq!(node.generation, 1);
//! assert!(node.is_root());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Validation errors for node payloads
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid properties: {0}")]
    InvalidProperties(String),
}

/// Study status of the person a node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Studying,
    Graduated,
    Retired,
}

/// Person attributes displayed on a node
///
/// Opaque to the structural engine; only `nickname` is validated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonProfile {
    pub nickname: String,
    pub first_name: String,
    pub last_name: String,
    pub student_id: String,
    pub photo_url: String,
    pub status: NodeStatus,
}

impl PersonProfile {
    /// Profile with only a nickname set
    pub fn with_nickname(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.nickname.trim().is_empty() {
            return Err(ValidationError::MissingField("nickname".to_string()));
        }
        Ok(())
    }
}

/// Canvas position of a node (layout payload)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One person in a tree.
///
/// # Fields
///
/// - `id`: Unique identifier (UUID v4)
/// - `tree_id`: Owning tree, fixed for the node's lifetime
/// - `generation`: Depth level, `1` for roots, `primary.generation + 1` otherwise
/// - `primary_parent_id`: Parent that drives `generation` (`None` means root)
/// - `profile`, `position`, `properties`: passthrough payload
/// - `created_at`: Establishes default listing order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub tree_id: String,
    pub generation: i32,
    #[serde(default)]
    pub primary_parent_id: Option<String>,
    #[serde(default)]
    pub profile: PersonProfile,
    #[serde(default)]
    pub position: Position,
    /// Contact and other free-form metadata
    #[serde(default = "empty_properties")]
    pub properties: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn empty_properties() -> Value {
    Value::Object(Default::default())
}

impl Node {
    /// Create a root node with a generated UUID
    pub fn new(tree_id: String, profile: PersonProfile) -> Self {
        Self::new_with_id(Uuid::new_v4().to_string(), tree_id, profile)
    }

    /// Create a root node with an explicit id
    pub fn new_with_id(id: String, tree_id: String, profile: PersonProfile) -> Self {
        let now = Utc::now();
        Self {
            id,
            tree_id,
            generation: 1,
            primary_parent_id: None,
            profile,
            position: Position::default(),
            properties: empty_properties(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.primary_parent_id.is_none()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Node plus its parent ids, primary parent first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    #[serde(flatten)]
    pub node: Node,
    pub parent_ids: Vec<String>,
}

impl NodeView {
    pub fn primary_parent_id(&self) -> Option<&str> {
        self.node.primary_parent_id.as_deref()
    }
}

/// Partial update of the passthrough fields of a node
///
/// Structural fields are deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpdate {
    #[serde(default)]
    pub profile: Option<PersonProfile>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub properties: Option<Value>,
}

impl NodeUpdate {
    pub fn is_empty(&self) -> bool {
        self.profile.is_none() && self.position.is_none() && self.properties.is_none()
    }

    /// Validate and apply to `node`
    pub fn apply_to(self, node: &mut Node) -> Result<(), ValidationError> {
        if let Some(profile) = &self.profile {
            profile.validate()?;
        }
        if let Some(properties) = &self.properties {
            if !properties.is_object() {
                return Err(ValidationError::InvalidProperties(
                    "properties must be a JSON object".to_string(),
                ));
            }
        }
        if let Some(profile) = self.profile {
            node.profile = profile;
        }
        if let Some(position) = self.position {
            node.position = position;
        }
        if let Some(properties) = self.properties {
            node.properties = properties;
        }
        node.touch();
        Ok(())
    }
}
