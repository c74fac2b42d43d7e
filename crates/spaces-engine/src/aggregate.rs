//! Generic per-node Direct/Recursive aggregates.
//!
//! Direct is ground truth; Recursive is always derivable from the Direct values
//! of a subtree. Hot-path updates lock only the touched record; the map lock is
//! taken for inserting and deleting records.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use spaces_core::NodeId;
use tracing::{debug, warn};

use crate::tree::TreeCache;

/// A value that can be summed up a tree and subtracted back out.
pub trait AggregateValue: Clone + Default + Send + Sync + 'static {
    fn merge(&self, other: &Self) -> Self;
    fn negate(&self) -> Self;
    /// Raise every numeric field to its non-negative floor.
    /// Returns true if anything had gone negative.
    fn clamp(&mut self) -> bool;
    fn is_empty(&self) -> bool;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggregatePair<V> {
    pub direct: V,
    pub recursive: V,
}

/// Where the subtree impact of a reparent comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImpactSource {
    /// The moved node's Recursive value as recorded before the move.
    Recorded,
    /// Rebuild the moved subtree from Direct values first and move that.
    Recomputed,
}

type Record<V> = Arc<Mutex<AggregatePair<V>>>;

pub struct AggregateStore<V: AggregateValue> {
    name: &'static str,
    cache: Arc<TreeCache>,
    records: RwLock<HashMap<NodeId, Record<V>>>,
}

impl<V: AggregateValue> AggregateStore<V> {
    pub fn new(name: &'static str, cache: Arc<TreeCache>) -> Self {
        Self {
            name,
            cache,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<TreeCache> {
        &self.cache
    }

    fn existing(&self, node: NodeId) -> Option<Record<V>> {
        self.records.read().get(&node).cloned()
    }

    fn entry(&self, node: NodeId) -> Record<V> {
        if let Some(record) = self.existing(node) {
            return record;
        }
        Arc::clone(self.records.write().entry(node).or_default())
    }

    fn clamp_logged(&self, node: NodeId, value: &mut V, which: &str) {
        if value.clamp() {
            warn!(
                store = self.name,
                node_id = %node,
                which,
                "aggregate underflow clamped to zero"
            );
        }
    }

    pub fn get(&self, node: NodeId) -> Option<AggregatePair<V>> {
        self.existing(node).map(|record| record.lock().clone())
    }

    pub fn direct(&self, node: NodeId) -> V {
        self.get(node).map(|pair| pair.direct).unwrap_or_default()
    }

    pub fn recursive(&self, node: NodeId) -> V {
        self.get(node).map(|pair| pair.recursive).unwrap_or_default()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.records.read().contains_key(&node)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.records.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Sum of Direct over every record. Each contribution is counted once.
    pub fn sum_direct(&self) -> V {
        let records: Vec<Record<V>> = self.records.read().values().cloned().collect();
        records
            .iter()
            .fold(V::default(), |acc, record| acc.merge(&record.lock().direct))
    }

    /// Apply `delta` to a node's Direct and Recursive, then to the Recursive of
    /// every ancestor.
    pub fn update_direct(&self, node: NodeId, delta: &V) {
        {
            let record = self.entry(node);
            let mut pair = record.lock();
            let mut direct = pair.direct.merge(delta);
            self.clamp_logged(node, &mut direct, "direct");
            let mut recursive = pair.recursive.merge(delta);
            self.clamp_logged(node, &mut recursive, "recursive");
            pair.direct = direct;
            pair.recursive = recursive;
        }
        self.propagate(self.cache.parent(node), delta);
        debug!(store = self.name, node_id = %node, "direct aggregate updated");
    }

    /// Apply `delta` to the Recursive of `start` and everything above it.
    pub fn propagate(&self, start: Option<NodeId>, delta: &V) {
        for ancestor in self.cache.chain_from(start) {
            let record = self.entry(ancestor);
            let mut pair = record.lock();
            let mut recursive = pair.recursive.merge(delta);
            self.clamp_logged(ancestor, &mut recursive, "recursive");
            pair.recursive = recursive;
        }
    }

    /// Move a subtree's impact from the old ancestor chain to the new one.
    ///
    /// The tree cache must already hold the new parent link. Ancestors common
    /// to both chains see a subtract and an add that cancel out.
    pub fn transfer_subtree(
        &self,
        node: NodeId,
        old_parent: Option<NodeId>,
        new_parent: Option<NodeId>,
        source: ImpactSource,
    ) {
        let impact = match source {
            ImpactSource::Recorded => self.recursive(node),
            ImpactSource::Recomputed => {
                self.rebuild_subtree(node);
                self.recursive(node)
            }
        };

        if !impact.is_empty() {
            self.propagate(old_parent, &impact.negate());
            self.propagate(new_parent, &impact);
        }
        if source == ImpactSource::Recorded {
            self.rebuild_subtree(node);
        }
        debug!(
            store = self.name,
            node_id = %node,
            old_parent = ?old_parent,
            new_parent = ?new_parent,
            "subtree aggregate transferred"
        );
    }

    /// Drop a deleted node's record and take its Direct contribution out of the
    /// chain starting at `parent`.
    pub fn remove_node(&self, node: NodeId, parent: Option<NodeId>) -> Option<AggregatePair<V>> {
        let removed = self.records.write().remove(&node)?;
        let pair = removed.lock().clone();
        if !pair.direct.is_empty() {
            self.propagate(parent, &pair.direct.negate());
        }
        debug!(store = self.name, node_id = %node, "aggregate record removed");
        Some(pair)
    }

    /// Merge into a node's Direct without touching any Recursive value.
    /// Used while seeding, before [`Self::rebuild_all`].
    pub fn seed_direct(&self, node: NodeId, value: &V) {
        let record = self.entry(node);
        let mut pair = record.lock();
        let mut direct = pair.direct.merge(value);
        self.clamp_logged(node, &mut direct, "direct");
        pair.direct = direct;
    }

    /// Recompute Recursive for `root` and all its descendants, bottom-up.
    pub fn rebuild_subtree(&self, root: NodeId) {
        let mut order = vec![root];
        order.extend(self.cache.descendants(root));

        let mut computed: HashMap<NodeId, V> = HashMap::with_capacity(order.len());
        for &node in order.iter().rev() {
            let mut total = self.direct(node);
            for child in self.cache.children(node) {
                if let Some(child_total) = computed.get(&child) {
                    total = total.merge(child_total);
                }
            }
            total.clamp();
            computed.insert(node, total);
        }

        for node in order {
            let Some(total) = computed.remove(&node) else {
                continue;
            };
            if total.is_empty() && !self.contains(node) {
                continue;
            }
            let record = self.entry(node);
            record.lock().recursive = total;
        }
    }

    /// Recompute Recursive for every tree in the cache.
    pub fn rebuild_all(&self) {
        for root in self.cache.roots() {
            self.rebuild_subtree(root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spaces_core::Node;

    /// Plain counter for exercising the store in isolation.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    struct Count(i64);

    impl AggregateValue for Count {
        fn merge(&self, other: &Self) -> Self {
            Count(self.0 + other.0)
        }
        fn negate(&self) -> Self {
            Count(-self.0)
        }
        fn clamp(&mut self) -> bool {
            let under = self.0 < 0;
            self.0 = self.0.max(0);
            under
        }
        fn is_empty(&self) -> bool {
            self.0 == 0
        }
    }

    fn id(n: i64) -> NodeId {
        NodeId::new(n)
    }

    /// 1 -> 2 -> 3, 1 -> 4
    fn store() -> AggregateStore<Count> {
        let cache = TreeCache::shared(8);
        cache.set(Node::new(id(1), None, "a")).unwrap();
        cache.set(Node::new(id(2), Some(id(1)), "b")).unwrap();
        cache.set(Node::new(id(3), Some(id(2)), "c")).unwrap();
        cache.set(Node::new(id(4), Some(id(1)), "d")).unwrap();
        AggregateStore::new("count", cache)
    }

    #[test]
    fn update_propagates_to_ancestors() {
        let store = store();
        store.update_direct(id(3), &Count(5));
        assert_eq!(store.direct(id(3)), Count(5));
        assert_eq!(store.recursive(id(3)), Count(5));
        assert_eq!(store.direct(id(2)), Count(0));
        assert_eq!(store.recursive(id(2)), Count(5));
        assert_eq!(store.recursive(id(1)), Count(5));
        assert!(!store.contains(id(4)));
    }

    #[test]
    fn underflow_is_clamped() {
        let store = store();
        store.update_direct(id(3), &Count(2));
        store.update_direct(id(3), &Count(-7));
        assert_eq!(store.direct(id(3)), Count(0));
        assert_eq!(store.recursive(id(1)), Count(0));
    }

    #[test]
    fn transfer_moves_impact_between_chains() {
        let store = store();
        store.update_direct(id(3), &Count(4));
        store.update_direct(id(4), &Count(1));

        store.cache().set(Node::new(id(3), Some(id(4)), "c")).unwrap();
        store.transfer_subtree(id(3), Some(id(2)), Some(id(4)), ImpactSource::Recorded);

        assert_eq!(store.recursive(id(2)), Count(0));
        assert_eq!(store.recursive(id(4)), Count(5));
        assert_eq!(store.direct(id(4)), Count(1));
        assert_eq!(store.recursive(id(1)), Count(5));
        assert_eq!(store.recursive(id(3)), Count(4));
    }

    #[test]
    fn recomputed_transfer_heals_drift() {
        let store = store();
        store.update_direct(id(3), &Count(3));
        // Corrupt node 2's recursive value; the move rebuilds it from Direct.
        store.entry(id(2)).lock().recursive = Count(50);

        store.cache().set(Node::new(id(2), Some(id(4)), "b")).unwrap();
        store.transfer_subtree(id(2), Some(id(1)), Some(id(4)), ImpactSource::Recomputed);

        assert_eq!(store.recursive(id(2)), Count(3));
        assert_eq!(store.recursive(id(4)), Count(3));
        assert_eq!(store.recursive(id(1)), Count(3));
    }

    #[test]
    fn remove_subtracts_direct_from_parent_chain() {
        let store = store();
        store.update_direct(id(3), &Count(6));
        store.update_direct(id(2), &Count(1));
        store.cache().remove(id(3));

        let removed = store.remove_node(id(3), Some(id(2))).unwrap();
        assert_eq!(removed.direct, Count(6));
        assert_eq!(store.direct(id(2)), Count(1));
        assert_eq!(store.recursive(id(2)), Count(1));
        assert_eq!(store.recursive(id(1)), Count(1));
        assert!(store.get(id(3)).is_none());
        assert_eq!(store.direct(id(3)), Count(0));
    }

    #[test]
    fn seed_then_rebuild() {
        let store = store();
        store.seed_direct(id(3), &Count(2));
        store.seed_direct(id(4), &Count(1));
        store.seed_direct(id(1), &Count(10));
        assert_eq!(store.recursive(id(1)), Count(0));

        store.rebuild_all();
        assert_eq!(store.recursive(id(3)), Count(2));
        assert_eq!(store.recursive(id(2)), Count(2));
        assert_eq!(store.recursive(id(1)), Count(13));
        assert_eq!(store.sum_direct(), Count(13));
    }
}
