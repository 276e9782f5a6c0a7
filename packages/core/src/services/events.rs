//! Tree events
//!
//! `TreeService` publishes one or more events on a tokio broadcast channel
//! after every committed operation. Nothing is published for a rejected or
//! rolled back mutation.
//!
//! Events are internally tagged: the `type` field sits next to the payload
//! fields, e.g. `{"type":"nodes:deleted","treeId":"t","nodeIds":["a","b"]}`.

use serde::{Deserialize, Serialize};

use crate::models::NodeView;
use crate::operations::MutationKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TreeEvent {
    #[serde(rename = "node:created", rename_all = "camelCase")]
    NodeCreated { tree_id: String, node: NodeView },

    /// Passthrough fields changed; structure is unchanged
    #[serde(rename = "node:updated", rename_all = "camelCase")]
    NodeUpdated { tree_id: String, node: NodeView },

    /// Edges or parent links of `node_id` changed
    #[serde(rename = "structure:changed", rename_all = "camelCase")]
    StructureChanged {
        tree_id: String,
        node_id: String,
        mutation: MutationKind,
        /// Nodes whose generation was recomputed, in cascade order
        regenerated: Vec<String>,
    },

    #[serde(rename = "nodes:deleted", rename_all = "camelCase")]
    NodesDeleted { tree_id: String, node_ids: Vec<String> },

    /// The tree and every node in it are gone
    #[serde(rename = "tree:deleted", rename_all = "camelCase")]
    TreeDeleted { tree_id: String },
}

impl TreeEvent {
    pub fn event_type(&self) -> &str {
        match self {
            TreeEvent::NodeCreated { .. } => "node:created",
            TreeEvent::NodeUpdated { .. } => "node:updated",
            TreeEvent::StructureChanged { .. } => "structure:changed",
            TreeEvent::NodesDeleted { .. } => "nodes:deleted",
            TreeEvent::TreeDeleted { .. } => "tree:deleted",
        }
    }

    pub fn tree_id(&self) -> &str {
        match self {
            TreeEvent::NodeCreated { tree_id, .. }
            | TreeEvent::NodeUpdated { tree_id, .. }
            | TreeEvent::StructureChanged { tree_id, .. }
            | TreeEvent::NodesDeleted { tree_id, .. }
            | TreeEvent::TreeDeleted { tree_id } => tree_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The `type` discriminator is merged with the payload fields, not nested
    #[test]
    fn test_tree_event_serialization_contract() {
        let event = TreeEvent::StructureChanged {
            tree_id: "tree-1".to_string(),
            node_id: "node-1".to_string(),
            mutation: MutationKind::AddParent,
            regenerated: vec!["node-1".to_string(), "node-2".to_string()],
        };

        let parsed: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(parsed["type"], "structure:changed");
        assert_eq!(parsed["treeId"], "tree-1");
        assert_eq!(parsed["nodeId"], "node-1");
        assert_eq!(parsed["mutation"], "add_parent");
        assert_eq!(parsed["regenerated"], serde_json::json!(["node-1", "node-2"]));
        assert!(parsed.get("StructureChanged").is_none());
    }

    #[test]
    fn test_tree_event_deserialization() {
        let json = r#"{"type":"nodes:deleted","treeId":"t","nodeIds":["a","b"]}"#;
        let event: TreeEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            TreeEvent::NodesDeleted {
                tree_id: "t".to_string(),
                node_ids: vec!["a".to_string(), "b".to_string()],
            }
        );
        assert_eq!(event.event_type(), "nodes:deleted");
        assert_eq!(event.tree_id(), "t");
    }

    #[test]
    fn test_tree_deleted_carries_only_the_tree_id() {
        let event = TreeEvent::TreeDeleted {
            tree_id: "tree-1".to_string(),
        };
        let parsed = serde_json::to_value(&event).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!({"type": "tree:deleted", "treeId": "tree-1"})
        );
        assert_eq!(event.tree_id(), "tree-1");
    }
}
