//! Space and post mutations.
//!
//! Every mutation commits to the tree cache (or post ledger) first and only
//! then publishes its event. A single writer lock keeps commits and their
//! events in the same order.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use spaces_core::{FileId, Node, NodeId, PostId, SeedSnapshot, SpaceEvent};
use tracing::{info, instrument};

use crate::bus::EventBus;
use crate::error::CoordinatorError;
use crate::tree::{TreeCache, TreeError};

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Clone, Debug, Default)]
pub struct NewSpace {
    pub name: String,
    pub description: String,
    pub parent_id: Option<NodeId>,
}

/// Partial update. `parent: Some(None)` moves the space to the top level.
#[derive(Clone, Debug, Default)]
pub struct SpaceUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub parent: Option<Option<NodeId>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub id: PostId,
    pub node_id: NodeId,
    pub created_at: DateTime<Utc>,
    pub files: BTreeMap<FileId, i64>,
    /// Seeded totals for attachments the store did not list individually.
    #[serde(default)]
    pub unlisted: (i64, i64),
}

impl PostRecord {
    pub fn file_count(&self) -> i64 {
        self.files.len() as i64 + self.unlisted.0
    }

    pub fn file_size(&self) -> i64 {
        self.files.values().sum::<i64>() + self.unlisted.1
    }
}

pub struct HierarchyCoordinator {
    cache: Arc<TreeCache>,
    bus: Arc<dyn EventBus>,
    posts: RwLock<HashMap<PostId, PostRecord>>,
    writer: Mutex<()>,
    next_node: AtomicI64,
    next_post: AtomicI64,
    next_file: AtomicI64,
}

fn clean_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoordinatorError::InvalidName("name is empty".to_string()));
    }
    Ok(trimmed.to_string())
}

impl HierarchyCoordinator {
    pub fn new(cache: Arc<TreeCache>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            cache,
            bus,
            posts: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
            next_node: AtomicI64::new(1),
            next_post: AtomicI64::new(1),
            next_file: AtomicI64::new(1),
        }
    }

    pub fn cache(&self) -> &Arc<TreeCache> {
        &self.cache
    }

    /// Load the post ledger from a seed and continue id allocation after it.
    pub fn seed(&self, snapshot: &SeedSnapshot) {
        let mut posts = self.posts.write();
        for seed in &snapshot.posts {
            let files: BTreeMap<FileId, i64> =
                seed.files.iter().map(|f| (f.file_id, f.size)).collect();
            let listed_size: i64 = files.values().sum();
            let unlisted = (
                (seed.file_count - files.len() as i64).max(0),
                (seed.file_size - listed_size).max(0),
            );
            posts.insert(
                seed.post_id,
                PostRecord {
                    id: seed.post_id,
                    node_id: seed.node_id,
                    created_at: seed.created_at,
                    files,
                    unlisted,
                },
            );
        }
        drop(posts);
        self.reserve_ids(snapshot);
        info!(posts = snapshot.posts.len(), "post ledger seeded");
    }

    /// Never allocate an id at or below any id present in `snapshot`,
    /// including rows that were not loaded into the ledger.
    pub fn reserve_ids(&self, snapshot: &SeedSnapshot) {
        let max_node = snapshot.nodes.iter().map(|n| n.id.get()).max().unwrap_or(0);
        let max_post = snapshot.posts.iter().map(|p| p.post_id.get()).max().unwrap_or(0);
        let max_file = snapshot
            .posts
            .iter()
            .flat_map(|p| p.files.iter())
            .map(|f| f.file_id.get())
            .max()
            .unwrap_or(0);
        self.next_node.fetch_max(max_node + 1, Ordering::SeqCst);
        self.next_post.fetch_max(max_post + 1, Ordering::SeqCst);
        self.next_file.fetch_max(max_file + 1, Ordering::SeqCst);
    }

    #[instrument(skip(self, request), fields(parent_id = ?request.parent_id))]
    pub fn create_space(&self, request: NewSpace) -> Result<Node> {
        let name = clean_name(&request.name)?;
        let _guard = self.writer.lock();

        let id = NodeId::new(self.next_node.fetch_add(1, Ordering::SeqCst));
        let node = Node {
            id,
            parent_id: request.parent_id,
            name,
            description: request.description,
            created_at: Utc::now(),
        };
        self.cache.set(node.clone())?;

        self.bus.dispatch(SpaceEvent::NodeCreated {
            node_id: id,
            parent_id: node.parent_id,
        });
        info!(node_id = %id, "space created");
        Ok(node)
    }

    #[instrument(skip(self, update), fields(node_id = %id))]
    pub fn update_space(&self, id: NodeId, update: SpaceUpdate) -> Result<Node> {
        let _guard = self.writer.lock();
        let current = self.cache.get(id).ok_or(TreeError::UnknownNode(id))?;

        let mut next = current.clone();
        if let Some(name) = update.name {
            next.name = clean_name(&name)?;
        }
        if let Some(description) = update.description {
            next.description = description;
        }
        if let Some(parent) = update.parent {
            next.parent_id = parent;
        }
        self.cache.set(next.clone())?;

        self.bus.dispatch(SpaceEvent::NodeUpdated {
            node_id: id,
            old_parent: current.parent_id,
            new_parent: next.parent_id,
        });
        if current.parent_id != next.parent_id {
            info!(node_id = %id, from = ?current.parent_id, to = ?next.parent_id, "space moved");
        }
        Ok(next)
    }

    /// Delete a leaf space together with the posts it owns.
    #[instrument(skip(self), fields(node_id = %id))]
    pub fn delete_space(&self, id: NodeId) -> Result<Node> {
        let _guard = self.writer.lock();
        if !self.cache.contains(id) {
            return Err(TreeError::UnknownNode(id).into());
        }
        if !self.cache.children(id).is_empty() {
            return Err(CoordinatorError::HasChildren(id));
        }

        let mut affected: Vec<PostId> = {
            let mut posts = self.posts.write();
            let owned: Vec<PostId> = posts
                .values()
                .filter(|p| p.node_id == id)
                .map(|p| p.id)
                .collect();
            for post in &owned {
                posts.remove(post);
            }
            owned
        };
        affected.sort();

        let node = self.cache.remove(id).ok_or(TreeError::UnknownNode(id))?;
        self.bus.dispatch(SpaceEvent::NodeDeleted {
            node_id: id,
            old_parent: node.parent_id,
            affected_posts: affected.clone(),
        });
        info!(node_id = %id, posts = affected.len(), "space deleted");
        Ok(node)
    }

    #[instrument(skip(self), fields(node_id = %node_id))]
    pub fn create_post(&self, node_id: NodeId, created_at: DateTime<Utc>) -> Result<PostRecord> {
        let _guard = self.writer.lock();
        if !self.cache.contains(node_id) {
            return Err(TreeError::UnknownNode(node_id).into());
        }

        let id = PostId::new(self.next_post.fetch_add(1, Ordering::SeqCst));
        let record = PostRecord {
            id,
            node_id,
            created_at,
            files: BTreeMap::new(),
            unlisted: (0, 0),
        };
        self.posts.write().insert(id, record.clone());

        self.bus.dispatch(SpaceEvent::PostCreated {
            post_id: id,
            node_id,
            created_at,
        });
        Ok(record)
    }

    #[instrument(skip(self), fields(post_id = %id))]
    pub fn delete_post(&self, id: PostId) -> Result<PostRecord> {
        let _guard = self.writer.lock();
        let record = self
            .posts
            .write()
            .remove(&id)
            .ok_or(CoordinatorError::UnknownPost(id))?;

        self.bus.dispatch(SpaceEvent::PostDeleted {
            post_id: id,
            node_id: record.node_id,
            created_at: record.created_at,
            file_count: record.file_count(),
            file_size: record.file_size(),
        });
        Ok(record)
    }

    #[instrument(skip(self), fields(post_id = %id, to = %new_node))]
    pub fn move_post(&self, id: PostId, new_node: NodeId) -> Result<PostRecord> {
        let _guard = self.writer.lock();
        if !self.cache.contains(new_node) {
            return Err(TreeError::UnknownNode(new_node).into());
        }

        let (old_node, record) = {
            let mut posts = self.posts.write();
            let record = posts.get_mut(&id).ok_or(CoordinatorError::UnknownPost(id))?;
            let old = record.node_id;
            record.node_id = new_node;
            (old, record.clone())
        };
        if old_node == new_node {
            return Ok(record);
        }

        self.bus.dispatch(SpaceEvent::PostMoved {
            post_id: id,
            old_node,
            new_node,
            created_at: record.created_at,
        });
        Ok(record)
    }

    #[instrument(skip(self), fields(post_id = %post_id))]
    pub fn upload_file(&self, post_id: PostId, size: i64) -> Result<FileId> {
        if size < 0 {
            return Err(CoordinatorError::InvalidSize(size));
        }
        let _guard = self.writer.lock();

        let file_id = FileId::new(self.next_file.fetch_add(1, Ordering::SeqCst));
        let node_id = {
            let mut posts = self.posts.write();
            let record = posts
                .get_mut(&post_id)
                .ok_or(CoordinatorError::UnknownPost(post_id))?;
            record.files.insert(file_id, size);
            record.node_id
        };

        self.bus.dispatch(SpaceEvent::FileUploaded {
            post_id,
            node_id,
            size,
        });
        Ok(file_id)
    }

    #[instrument(skip(self), fields(post_id = %post_id, file_id = %file_id))]
    pub fn delete_file(&self, post_id: PostId, file_id: FileId) -> Result<i64> {
        let _guard = self.writer.lock();
        let (node_id, size) = {
            let mut posts = self.posts.write();
            let record = posts
                .get_mut(&post_id)
                .ok_or(CoordinatorError::UnknownPost(post_id))?;
            let size = record.files.remove(&file_id).ok_or(CoordinatorError::UnknownFile {
                post: post_id,
                file: file_id,
            })?;
            (record.node_id, size)
        };

        self.bus.dispatch(SpaceEvent::FileDeleted {
            post_id,
            node_id,
            size,
        });
        Ok(size)
    }

    pub fn post(&self, id: PostId) -> Option<PostRecord> {
        self.posts.read().get(&id).cloned()
    }

    pub fn posts_in(&self, node_id: NodeId) -> Vec<PostRecord> {
        let mut posts: Vec<PostRecord> = self
            .posts
            .read()
            .values()
            .filter(|p| p.node_id == node_id)
            .cloned()
            .collect();
        posts.sort_by_key(|p| p.id);
        posts
    }
}
