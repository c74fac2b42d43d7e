//! File count and byte totals per space.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use spaces_core::{EventKind, HandlerError, NodeId, PostId, SeedNodeFiles, SeedPost, SpaceEvent};
use tracing::{debug, info};

use crate::aggregate::{AggregateStore, AggregateValue, ImpactSource};
use crate::bus::{EventBus, EventHandler};
use crate::tree::TreeCache;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    pub file_count: i64,
    pub total_size: i64,
}

impl FileStats {
    pub const fn new(file_count: i64, total_size: i64) -> Self {
        Self {
            file_count,
            total_size,
        }
    }

    pub const fn single(size: i64) -> Self {
        Self::new(1, size)
    }
}

impl AggregateValue for FileStats {
    fn merge(&self, other: &Self) -> Self {
        Self {
            file_count: self.file_count.saturating_add(other.file_count),
            total_size: self.total_size.saturating_add(other.total_size),
        }
    }

    fn negate(&self) -> Self {
        Self {
            file_count: -self.file_count,
            total_size: -self.total_size,
        }
    }

    fn clamp(&mut self) -> bool {
        let under = self.file_count < 0 || self.total_size < 0;
        self.file_count = self.file_count.max(0);
        self.total_size = self.total_size.max(0);
        under
    }

    fn is_empty(&self) -> bool {
        self.file_count == 0 && self.total_size == 0
    }
}

const SUBSCRIPTIONS: [EventKind; 6] = [
    EventKind::FileUploaded,
    EventKind::FileDeleted,
    EventKind::PostDeleted,
    EventKind::PostMoved,
    EventKind::NodeUpdated,
    EventKind::NodeDeleted,
];

/// Keeps Direct/Recursive file totals per space, plus an index of exactly how
/// much each post contributes to the space that owns it.
pub struct FileStatsAggregator {
    store: AggregateStore<FileStats>,
    post_files: DashMap<NodeId, HashMap<PostId, FileStats>>,
}

impl FileStatsAggregator {
    /// Create the aggregator and subscribe it to `bus`.
    pub fn new(bus: &dyn EventBus, cache: Arc<TreeCache>) -> Arc<Self> {
        let aggregator = Arc::new(Self::detached(cache));
        for kind in SUBSCRIPTIONS {
            bus.subscribe(kind, aggregator.clone());
        }
        aggregator
    }

    /// Create without subscribing. Events must be fed through [`Self::apply`].
    pub fn detached(cache: Arc<TreeCache>) -> Self {
        Self {
            store: AggregateStore::new("file_stats", cache),
            post_files: DashMap::new(),
        }
    }

    /// Totals for a space; zero for spaces that are unknown or deleted.
    pub fn stats(&self, node: NodeId, recursive: bool) -> FileStats {
        if recursive {
            self.store.recursive(node)
        } else {
            self.store.direct(node)
        }
    }

    /// Totals across every space.
    pub fn global_stats(&self) -> FileStats {
        self.store.sum_direct()
    }

    /// What a single post currently contributes to `node`.
    pub fn post_stats(&self, node: NodeId, post: PostId) -> FileStats {
        self.post_files
            .get(&node)
            .and_then(|posts| posts.get(&post).copied())
            .unwrap_or_default()
    }

    /// Load direct totals and per-post contributions, then rebuild Recursive.
    pub fn seed(&self, node_files: &[SeedNodeFiles], posts: &[SeedPost]) {
        for entry in node_files {
            self.store.seed_direct(
                entry.node_id,
                &FileStats::new(entry.file_count, entry.total_size),
            );
        }
        for post in posts {
            if post.file_count == 0 && post.file_size == 0 {
                continue;
            }
            self.post_files
                .entry(post.node_id)
                .or_default()
                .insert(post.post_id, FileStats::new(post.file_count, post.file_size));
        }
        self.store.rebuild_all();
        info!(
            nodes = node_files.len(),
            posts = posts.len(),
            "file stats seeded"
        );
    }

    pub fn store(&self) -> &AggregateStore<FileStats> {
        &self.store
    }

    fn index_add(&self, node: NodeId, post: PostId, delta: FileStats) {
        {
            let mut posts = self.post_files.entry(node).or_default();
            let mut next = posts.get(&post).copied().unwrap_or_default().merge(&delta);
            next.clamp();
            if next.is_empty() {
                posts.remove(&post);
            } else {
                posts.insert(post, next);
            }
        }
        self.post_files.remove_if(&node, |_, posts| posts.is_empty());
    }

    fn index_take(&self, node: NodeId, post: PostId) -> FileStats {
        let taken = self
            .post_files
            .get_mut(&node)
            .and_then(|mut posts| posts.remove(&post))
            .unwrap_or_default();
        self.post_files.remove_if(&node, |_, posts| posts.is_empty());
        taken
    }

    pub fn apply(&self, event: &SpaceEvent) -> Result<(), HandlerError> {
        match event {
            SpaceEvent::FileUploaded {
                post_id,
                node_id,
                size,
            } => {
                if *size < 0 {
                    return Err(HandlerError::rejected(
                        self.name(),
                        event.kind(),
                        format!("negative file size {size}"),
                    ));
                }
                let delta = FileStats::single(*size);
                self.store.update_direct(*node_id, &delta);
                self.index_add(*node_id, *post_id, delta);
            }
            SpaceEvent::FileDeleted {
                post_id,
                node_id,
                size,
            } => {
                if *size < 0 {
                    return Err(HandlerError::rejected(
                        self.name(),
                        event.kind(),
                        format!("negative file size {size}"),
                    ));
                }
                let delta = FileStats::single(*size).negate();
                self.store.update_direct(*node_id, &delta);
                self.index_add(*node_id, *post_id, delta);
            }
            SpaceEvent::PostDeleted {
                post_id,
                node_id,
                file_count,
                file_size,
                ..
            } => {
                let delta = FileStats::new(*file_count, *file_size);
                if !delta.is_empty() {
                    self.store.update_direct(*node_id, &delta.negate());
                }
                self.index_take(*node_id, *post_id);
            }
            SpaceEvent::PostMoved {
                post_id,
                old_node,
                new_node,
                ..
            } => {
                if old_node == new_node {
                    return Ok(());
                }
                let tally = self.index_take(*old_node, *post_id);
                if !tally.is_empty() {
                    self.store.update_direct(*old_node, &tally.negate());
                    self.store.update_direct(*new_node, &tally);
                    self.index_add(*new_node, *post_id, tally);
                }
                debug!(post_id = %post_id, from = %old_node, to = %new_node, files = tally.file_count, "post files moved");
            }
            SpaceEvent::NodeUpdated {
                node_id,
                old_parent,
                new_parent,
            } => {
                if event.is_reparent() {
                    self.store.transfer_subtree(
                        *node_id,
                        *old_parent,
                        *new_parent,
                        ImpactSource::Recorded,
                    );
                }
            }
            SpaceEvent::NodeDeleted {
                node_id, old_parent, ..
            } => {
                self.store.remove_node(*node_id, *old_parent);
                self.post_files.remove(node_id);
            }
            SpaceEvent::NodeCreated { .. } | SpaceEvent::PostCreated { .. } => {}
        }
        Ok(())
    }
}

impl EventHandler for FileStatsAggregator {
    fn name(&self) -> &str {
        "file_stats"
    }

    fn handle(&self, event: &SpaceEvent) -> Result<(), HandlerError> {
        self.apply(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SyncDispatcher;
    use chrono::Utc;
    use spaces_core::Node;

    fn id(n: i64) -> NodeId {
        NodeId::new(n)
    }

    fn pid(n: i64) -> PostId {
        PostId::new(n)
    }

    /// A -> B -> C plus D as a separate root.
    fn setup() -> (SyncDispatcher, Arc<TreeCache>, Arc<FileStatsAggregator>) {
        let bus = SyncDispatcher::new();
        let cache = TreeCache::shared(8);
        cache.set(Node::new(id(1), None, "A")).unwrap();
        cache.set(Node::new(id(2), Some(id(1)), "B")).unwrap();
        cache.set(Node::new(id(3), Some(id(2)), "C")).unwrap();
        cache.set(Node::new(id(4), None, "D")).unwrap();
        let agg = FileStatsAggregator::new(&bus, cache.clone());
        (bus, cache, agg)
    }

    fn upload(bus: &SyncDispatcher, node: i64, post: i64, size: i64) {
        bus.dispatch(SpaceEvent::FileUploaded {
            post_id: pid(post),
            node_id: id(node),
            size,
        });
    }

    #[test]
    fn upload_updates_direct_recursive_and_index() {
        let (bus, _cache, agg) = setup();
        upload(&bus, 3, 10, 100);
        upload(&bus, 3, 10, 50);

        assert_eq!(agg.stats(id(3), false), FileStats::new(2, 150));
        assert_eq!(agg.stats(id(1), true), FileStats::new(2, 150));
        assert_eq!(agg.stats(id(1), false), FileStats::default());
        assert_eq!(agg.post_stats(id(3), pid(10)), FileStats::new(2, 150));
        assert_eq!(agg.global_stats(), FileStats::new(2, 150));
    }

    #[test]
    fn file_delete_reverses_upload() {
        let (bus, _cache, agg) = setup();
        upload(&bus, 3, 10, 100);
        bus.dispatch(SpaceEvent::FileDeleted {
            post_id: pid(10),
            node_id: id(3),
            size: 100,
        });
        assert_eq!(agg.stats(id(3), true), FileStats::default());
        assert_eq!(agg.stats(id(1), true), FileStats::default());
        assert_eq!(agg.post_stats(id(3), pid(10)), FileStats::default());
    }

    #[test]
    fn post_delete_uses_event_totals_verbatim() {
        let (bus, _cache, agg) = setup();
        upload(&bus, 3, 10, 100);
        upload(&bus, 3, 11, 40);
        bus.dispatch(SpaceEvent::PostDeleted {
            post_id: pid(10),
            node_id: id(3),
            created_at: Utc::now(),
            file_count: 1,
            file_size: 100,
        });
        assert_eq!(agg.stats(id(3), false), FileStats::new(1, 40));
        assert_eq!(agg.stats(id(1), true), FileStats::new(1, 40));
        assert_eq!(agg.post_stats(id(3), pid(10)), FileStats::default());
    }

    #[test]
    fn post_move_uses_index_not_post_counters() {
        let (bus, _cache, agg) = setup();
        upload(&bus, 3, 10, 100);
        upload(&bus, 3, 10, 20);

        bus.dispatch(SpaceEvent::PostMoved {
            post_id: pid(10),
            old_node: id(3),
            new_node: id(4),
            created_at: Utc::now(),
        });

        assert_eq!(agg.stats(id(3), false), FileStats::default());
        assert_eq!(agg.stats(id(1), true), FileStats::default());
        assert_eq!(agg.stats(id(4), false), FileStats::new(2, 120));
        assert_eq!(agg.stats(id(4), true), FileStats::new(2, 120));
        assert_eq!(agg.post_stats(id(4), pid(10)), FileStats::new(2, 120));
        assert_eq!(agg.global_stats(), FileStats::new(2, 120));
    }

    #[test]
    fn negative_upload_is_rejected() {
        let (_bus, _cache, agg) = setup();
        let err = agg
            .apply(&SpaceEvent::FileUploaded {
                post_id: pid(1),
                node_id: id(3),
                size: -5,
            })
            .unwrap_err();
        assert!(err.to_string().contains("negative file size"));
        assert_eq!(agg.stats(id(3), false), FileStats::default());
    }

    #[test]
    fn negative_delete_is_rejected() {
        let (bus, _cache, agg) = setup();
        upload(&bus, 3, 1, 30);
        let err = agg
            .apply(&SpaceEvent::FileDeleted {
                post_id: pid(1),
                node_id: id(3),
                size: i64::MIN,
            })
            .unwrap_err();
        assert!(err.to_string().contains("negative file size"));
        assert_eq!(agg.stats(id(1), true), FileStats::new(1, 30));
        assert_eq!(agg.post_stats(id(3), pid(1)), FileStats::new(1, 30));
    }

    #[test]
    fn update_without_parent_change_keeps_totals() {
        let (bus, _cache, agg) = setup();
        upload(&bus, 3, 1, 30);
        bus.dispatch(SpaceEvent::NodeUpdated {
            node_id: id(3),
            old_parent: Some(id(2)),
            new_parent: Some(id(2)),
        });
        assert_eq!(agg.stats(id(2), true), FileStats::new(1, 30));
        assert_eq!(agg.stats(id(1), true), FileStats::new(1, 30));
    }

    #[test]
    fn reparent_transfers_recursive_totals() {
        let (bus, cache, agg) = setup();
        upload(&bus, 3, 10, 100);

        cache.set(Node::new(id(3), Some(id(4)), "C")).unwrap();
        bus.dispatch(SpaceEvent::NodeUpdated {
            node_id: id(3),
            old_parent: Some(id(2)),
            new_parent: Some(id(4)),
        });

        assert_eq!(agg.stats(id(2), true), FileStats::default());
        assert_eq!(agg.stats(id(1), true), FileStats::default());
        assert_eq!(agg.stats(id(4), true), FileStats::new(1, 100));
        assert_eq!(agg.stats(id(3), true), FileStats::new(1, 100));
    }

    #[test]
    fn node_delete_drops_record_and_index() {
        let (bus, cache, agg) = setup();
        upload(&bus, 3, 10, 100);
        upload(&bus, 2, 20, 7);

        cache.remove(id(3));
        bus.dispatch(SpaceEvent::NodeDeleted {
            node_id: id(3),
            old_parent: Some(id(2)),
            affected_posts: vec![pid(10)],
        });

        assert_eq!(agg.stats(id(3), true), FileStats::default());
        assert_eq!(agg.post_stats(id(3), pid(10)), FileStats::default());
        assert_eq!(agg.stats(id(2), false), FileStats::new(1, 7));
        assert_eq!(agg.stats(id(2), true), FileStats::new(1, 7));
        assert_eq!(agg.stats(id(1), true), FileStats::new(1, 7));
    }

    #[test]
    fn seed_rebuilds_recursive() {
        let cache = TreeCache::shared(8);
        cache.set(Node::new(id(1), None, "A")).unwrap();
        cache.set(Node::new(id(2), Some(id(1)), "B")).unwrap();
        let agg = FileStatsAggregator::detached(cache);

        agg.seed(
            &[
                SeedNodeFiles {
                    node_id: id(2),
                    file_count: 3,
                    total_size: 30,
                },
                SeedNodeFiles {
                    node_id: id(1),
                    file_count: 1,
                    total_size: 5,
                },
            ],
            &[SeedPost {
                post_id: pid(9),
                node_id: id(2),
                created_at: Utc::now(),
                file_count: 3,
                file_size: 30,
                files: Vec::new(),
            }],
        );

        assert_eq!(agg.stats(id(1), true), FileStats::new(4, 35));
        assert_eq!(agg.stats(id(2), true), FileStats::new(3, 30));
        assert_eq!(agg.post_stats(id(2), pid(9)), FileStats::new(3, 30));
        assert_eq!(agg.global_stats(), FileStats::new(4, 35));
    }

    #[test]
    fn wire_format_is_camel_case() {
        let json = serde_json::to_value(FileStats::new(2, 64)).unwrap();
        assert_eq!(json, serde_json::json!({"fileCount": 2, "totalSize": 64}));
    }
}
