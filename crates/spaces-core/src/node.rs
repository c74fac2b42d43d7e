use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::NodeId;

/// A space in the hierarchy. Posts hang off spaces; spaces hang off other spaces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Node {
    pub fn new(id: NodeId, parent_id: Option<NodeId>, name: impl Into<String>) -> Self {
        Self {
            id,
            parent_id,
            name: name.into(),
            description: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_has_no_parent() {
        let root = Node::new(NodeId::new(1), None, "root");
        assert!(root.is_root());
        let child = Node::new(NodeId::new(2), Some(root.id), "child").with_description("notes");
        assert!(!child.is_root());
        assert_eq!(child.description, "notes");
    }

    #[test]
    fn serializes_camel_case() {
        let node = Node::new(NodeId::new(5), Some(NodeId::new(1)), "rust");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["parentId"], 1);
        assert_eq!(json["name"], "rust");
        assert!(json.get("createdAt").is_some());
    }
}
