//! Tree Data Structures
//!
//! A `Tree` is the unit of ownership and of transactional isolation: every
//! structural mutation is serialized per tree and never spans two trees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ValidationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tree {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Principal id of the creator (implicit owner)
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tree {
    pub fn new(name: String, description: String, created_by: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            description,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Parameters for creating a tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTree {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl NewTree {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name".to_string()));
        }
        Ok(())
    }
}
