//! In-memory cache of the space hierarchy.
//!
//! Reads take a shared lock, writes an exclusive one. Every write is validated
//! under the write lock, so a rejected reparent leaves the tree untouched.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use spaces_core::{Node, NodeId};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("space {node} cannot be placed under {parent}: it would become its own ancestor")]
    CircularReference { node: NodeId, parent: NodeId },

    #[error("moving space {node} would reach depth {depth}, limit is {max_depth}")]
    DepthExceeded {
        node: NodeId,
        depth: usize,
        max_depth: usize,
    },

    #[error("parent space {0} does not exist")]
    UnknownParent(NodeId),

    #[error("space {0} does not exist")]
    UnknownNode(NodeId),
}

#[derive(Default)]
struct TreeInner {
    nodes: HashMap<NodeId, Node>,
    children: HashMap<NodeId, BTreeSet<NodeId>>,
}

impl TreeInner {
    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent_id)
    }

    /// Depth of `id` (root = 1), or None if the chain does not terminate
    /// within the number of cached nodes.
    fn depth(&self, id: NodeId) -> Option<usize> {
        let limit = self.nodes.len() + 1;
        let mut depth = 1;
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            depth += 1;
            if depth > limit {
                return None;
            }
            current = parent;
        }
        Some(depth)
    }

    fn is_ancestor_or_self(&self, candidate: NodeId, of: NodeId) -> bool {
        let limit = self.nodes.len() + 1;
        let mut current = Some(of);
        for _ in 0..limit {
            match current {
                Some(id) if id == candidate => return true,
                Some(id) => current = self.parent(id),
                None => return false,
            }
        }
        // Chain did not terminate; treat as circular.
        true
    }

    /// Number of levels in the subtree rooted at `id`, 1 for a leaf.
    fn subtree_height(&self, id: NodeId) -> usize {
        let mut height = 0;
        let mut level: Vec<NodeId> = vec![id];
        let mut seen: HashSet<NodeId> = HashSet::new();
        while !level.is_empty() && height <= self.nodes.len() {
            height += 1;
            let mut next = Vec::new();
            for node in level {
                if !seen.insert(node) {
                    continue;
                }
                if let Some(kids) = self.children.get(&node) {
                    next.extend(kids.iter().copied());
                }
            }
            level = next;
        }
        height
    }

    fn validate(&self, node: &Node, max_depth: usize) -> Result<(), TreeError> {
        let Some(parent) = node.parent_id else {
            let height = self.subtree_height(node.id);
            if height > max_depth {
                return Err(TreeError::DepthExceeded {
                    node: node.id,
                    depth: height,
                    max_depth,
                });
            }
            return Ok(());
        };

        if parent == node.id {
            return Err(TreeError::CircularReference {
                node: node.id,
                parent,
            });
        }
        if !self.nodes.contains_key(&parent) {
            return Err(TreeError::UnknownParent(parent));
        }
        if self.nodes.contains_key(&node.id) && self.is_ancestor_or_self(node.id, parent) {
            return Err(TreeError::CircularReference {
                node: node.id,
                parent,
            });
        }

        let parent_depth = self.depth(parent).ok_or(TreeError::CircularReference {
            node: node.id,
            parent,
        })?;
        let deepest = parent_depth + self.subtree_height(node.id);
        if deepest > max_depth {
            return Err(TreeError::DepthExceeded {
                node: node.id,
                depth: deepest,
                max_depth,
            });
        }
        Ok(())
    }

    fn detach(&mut self, id: NodeId, parent: Option<NodeId>) {
        if let Some(parent) = parent {
            if let Some(kids) = self.children.get_mut(&parent) {
                kids.remove(&id);
                if kids.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
    }
}

/// Thread-safe cache of space nodes and their parent links.
pub struct TreeCache {
    inner: RwLock<TreeInner>,
    max_depth: usize,
}

impl TreeCache {
    pub fn new(max_depth: usize) -> Self {
        Self {
            inner: RwLock::new(TreeInner::default()),
            max_depth: max_depth.max(1),
        }
    }

    pub fn shared(max_depth: usize) -> Arc<Self> {
        Arc::new(Self::new(max_depth))
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Insert or replace a node, validating its parent link first.
    ///
    /// Rejects self-parenting, parenting under a descendant, unknown parents
    /// and anything that would push the subtree past `max_depth`.
    pub fn set(&self, node: Node) -> Result<(), TreeError> {
        let mut inner = self.inner.write();
        inner.validate(&node, self.max_depth)?;

        let id = node.id;
        let new_parent = node.parent_id;
        let old_parent = inner.nodes.get(&id).and_then(|n| n.parent_id);
        if old_parent != new_parent {
            inner.detach(id, old_parent);
        }
        if let Some(parent) = new_parent {
            inner.children.entry(parent).or_default().insert(id);
        }
        inner.nodes.insert(id, node);
        debug!(node_id = %id, parent_id = ?new_parent, "tree cache updated");
        Ok(())
    }

    pub fn get(&self, id: NodeId) -> Option<Node> {
        self.inner.read().nodes.get(&id).cloned()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.inner.read().nodes.contains_key(&id)
    }

    /// Parent of `id`; None for roots and unknown nodes.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.inner.read().parent(id)
    }

    /// All nodes, ordered by id.
    pub fn get_all(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.inner.read().nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    pub fn roots(&self) -> Vec<NodeId> {
        let inner = self.inner.read();
        let mut roots: Vec<NodeId> = inner
            .nodes
            .values()
            .filter(|n| n.parent_id.map_or(true, |p| !inner.nodes.contains_key(&p)))
            .map(|n| n.id)
            .collect();
        roots.sort();
        roots
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.inner
            .read()
            .children
            .get(&id)
            .map(|kids| kids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// All transitive descendants of `id` in breadth-first order, excluding `id`.
    ///
    /// Visits each node at most once, so it terminates even on corrupted links.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::from([id]);
        let mut queue: VecDeque<NodeId> = VecDeque::from([id]);
        let budget = inner.nodes.len();

        while let Some(current) = queue.pop_front() {
            let Some(kids) = inner.children.get(&current) else {
                continue;
            };
            for &kid in kids {
                if out.len() >= budget {
                    warn!(node_id = %id, "descendant walk exceeded node count, stopping");
                    return out;
                }
                if seen.insert(kid) {
                    out.push(kid);
                    queue.push_back(kid);
                }
            }
        }
        out
    }

    /// Parent-link walk starting at `id` itself. See [`AncestorChain`].
    pub fn chain_from(&self, id: Option<NodeId>) -> AncestorChain<'_> {
        AncestorChain::new(self, id)
    }

    /// Strict ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> AncestorChain<'_> {
        AncestorChain::new(self, self.parent(id))
    }

    /// Depth of `id` with roots at 1, or None for unknown nodes.
    pub fn depth(&self, id: NodeId) -> Option<usize> {
        let inner = self.inner.read();
        if !inner.nodes.contains_key(&id) {
            return None;
        }
        inner.depth(id)
    }

    pub fn subtree_height(&self, id: NodeId) -> usize {
        self.inner.read().subtree_height(id)
    }

    /// Remove a node. Its children keep their (now dangling) parent link.
    pub fn remove(&self, id: NodeId) -> Option<Node> {
        let mut inner = self.inner.write();
        let node = inner.nodes.remove(&id)?;
        inner.detach(id, node.parent_id);
        debug!(node_id = %id, "removed from tree cache");
        Some(node)
    }

    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().nodes.is_empty()
    }
}

/// Walk from a node up to its root, one parent lookup per step.
///
/// Yields at most `max_depth` ids and never restarts, so a corrupted parent
/// graph cannot make it loop. Each step takes its own short read lock.
pub struct AncestorChain<'a> {
    cache: &'a TreeCache,
    next: Option<NodeId>,
    remaining: usize,
}

impl<'a> AncestorChain<'a> {
    fn new(cache: &'a TreeCache, start: Option<NodeId>) -> Self {
        Self {
            cache,
            next: start,
            remaining: cache.max_depth,
        }
    }
}

impl Iterator for AncestorChain<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next.take()?;
        self.remaining -= 1;
        self.next = self.cache.parent(current);
        Some(current)
    }
}

impl std::iter::FusedIterator for AncestorChain<'_> {}
