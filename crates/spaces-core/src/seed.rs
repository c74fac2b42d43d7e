use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{FileId, NodeId, PostId};
use crate::node::Node;

/// Everything the durable store hands the engine at startup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SeedSnapshot {
    pub nodes: Vec<Node>,
    /// Direct file totals per space, as recorded by the store.
    pub node_files: Vec<SeedNodeFiles>,
    pub posts: Vec<SeedPost>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedNodeFiles {
    pub node_id: NodeId,
    pub file_count: i64,
    pub total_size: i64,
}

/// One post with the files it currently owns.
///
/// `file_count`/`file_size` are the store's recorded totals for the post;
/// `files` lists the individual attachments when the store has them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedPost {
    pub post_id: PostId,
    pub node_id: NodeId,
    pub created_at: DateTime<Utc>,
    pub file_count: i64,
    pub file_size: i64,
    #[serde(default)]
    pub files: Vec<SeedFile>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFile {
    pub file_id: FileId,
    pub size: i64,
}

impl SeedSnapshot {
    /// Nodes ordered so that every parent precedes its children.
    ///
    /// Nodes whose parent never appears (orphans, or members of a cycle) are
    /// appended last so the caller can decide how to reject them.
    pub fn nodes_parent_first(&self) -> Vec<Node> {
        use std::collections::HashSet;

        let mut placed: HashSet<NodeId> = HashSet::with_capacity(self.nodes.len());
        let mut ordered = Vec::with_capacity(self.nodes.len());
        let mut pending: Vec<&Node> = self.nodes.iter().collect();

        loop {
            let before = pending.len();
            pending.retain(|node| {
                let ready = node.parent_id.map_or(true, |p| placed.contains(&p));
                if ready {
                    placed.insert(node.id);
                    ordered.push((*node).clone());
                }
                !ready
            });
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }

        ordered.extend(pending.into_iter().cloned());
        ordered
    }
}
