use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, PostId};

/// Hierarchy mutation events.
///
/// Published by the coordinator after the tree cache has been committed.
/// Every variant carries the exact deltas its subscribers need: for deletions
/// the node is already gone from the cache at dispatch time, so nothing can be
/// re-derived from the tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SpaceEvent {
    #[serde(rename = "node_created")]
    NodeCreated {
        node_id: NodeId,
        parent_id: Option<NodeId>,
    },

    #[serde(rename = "node_updated")]
    NodeUpdated {
        node_id: NodeId,
        old_parent: Option<NodeId>,
        new_parent: Option<NodeId>,
    },

    #[serde(rename = "node_deleted")]
    NodeDeleted {
        node_id: NodeId,
        old_parent: Option<NodeId>,
        affected_posts: Vec<PostId>,
    },

    #[serde(rename = "post_created")]
    PostCreated {
        post_id: PostId,
        node_id: NodeId,
        created_at: DateTime<Utc>,
    },

    /// File totals are the post's totals at deletion time; consumers apply them verbatim.
    #[serde(rename = "post_deleted")]
    PostDeleted {
        post_id: PostId,
        node_id: NodeId,
        created_at: DateTime<Utc>,
        file_count: i64,
        file_size: i64,
    },

    #[serde(rename = "post_moved")]
    PostMoved {
        post_id: PostId,
        old_node: NodeId,
        new_node: NodeId,
        created_at: DateTime<Utc>,
    },

    #[serde(rename = "file_uploaded")]
    FileUploaded {
        post_id: PostId,
        node_id: NodeId,
        size: i64,
    },

    #[serde(rename = "file_deleted")]
    FileDeleted {
        post_id: PostId,
        node_id: NodeId,
        size: i64,
    },
}

/// Discriminant of [`SpaceEvent`], used as the subscription key.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NodeCreated,
    NodeUpdated,
    NodeDeleted,
    PostCreated,
    PostDeleted,
    PostMoved,
    FileUploaded,
    FileDeleted,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::NodeCreated,
        EventKind::NodeUpdated,
        EventKind::NodeDeleted,
        EventKind::PostCreated,
        EventKind::PostDeleted,
        EventKind::PostMoved,
        EventKind::FileUploaded,
        EventKind::FileDeleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NodeCreated => "node_created",
            Self::NodeUpdated => "node_updated",
            Self::NodeDeleted => "node_deleted",
            Self::PostCreated => "post_created",
            Self::PostDeleted => "post_deleted",
            Self::PostMoved => "post_moved",
            Self::FileUploaded => "file_uploaded",
            Self::FileDeleted => "file_deleted",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SpaceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::NodeCreated { .. } => EventKind::NodeCreated,
            Self::NodeUpdated { .. } => EventKind::NodeUpdated,
            Self::NodeDeleted { .. } => EventKind::NodeDeleted,
            Self::PostCreated { .. } => EventKind::PostCreated,
            Self::PostDeleted { .. } => EventKind::PostDeleted,
            Self::PostMoved { .. } => EventKind::PostMoved,
            Self::FileUploaded { .. } => EventKind::FileUploaded,
            Self::FileDeleted { .. } => EventKind::FileDeleted,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }

    /// The space the event is primarily about. For moves this is the destination.
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::NodeCreated { node_id, .. }
            | Self::NodeUpdated { node_id, .. }
            | Self::NodeDeleted { node_id, .. }
            | Self::PostCreated { node_id, .. }
            | Self::PostDeleted { node_id, .. }
            | Self::FileUploaded { node_id, .. }
            | Self::FileDeleted { node_id, .. } => *node_id,
            Self::PostMoved { new_node, .. } => *new_node,
        }
    }

    /// True for a `NodeUpdated` whose parent actually changed.
    pub fn is_reparent(&self) -> bool {
        matches!(self, Self::NodeUpdated { old_parent, new_parent, .. } if old_parent != new_parent)
    }
}
