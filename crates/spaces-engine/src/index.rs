//! Process-wide wiring of the hierarchy engine.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use spaces_core::{DispatchMode, NodeId, SeedSnapshot, SpacesSettings};
use tracing::{info, warn};

use crate::activity::ActivityAggregator;
use crate::bus::{AsyncDispatcher, EventBus, SyncDispatcher};
use crate::coordinator::HierarchyCoordinator;
use crate::file_stats::FileStatsAggregator;
use crate::tree::TreeCache;

/// Outcome of [`SpaceIndex::seed`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedReport {
    pub nodes_loaded: usize,
    pub nodes_skipped: Vec<NodeId>,
    pub posts_loaded: usize,
    pub posts_skipped: usize,
}

/// Tree cache, event bus, both aggregators and the coordinator, created once
/// at startup and shared for the life of the process.
pub struct SpaceIndex {
    cache: Arc<TreeCache>,
    bus: Arc<dyn EventBus>,
    file_stats: Arc<FileStatsAggregator>,
    activity: Arc<ActivityAggregator>,
    coordinator: HierarchyCoordinator,
}

impl SpaceIndex {
    pub fn from_settings(settings: &SpacesSettings) -> Self {
        let cache = TreeCache::shared(settings.hierarchy.max_depth);
        let bus: Arc<dyn EventBus> = match settings.events.dispatch {
            DispatchMode::Sync => Arc::new(SyncDispatcher::new()),
            DispatchMode::Async => match AsyncDispatcher::current() {
                Some(dispatcher) => Arc::new(dispatcher),
                None => {
                    warn!("async dispatch requested outside a tokio runtime, using sync");
                    Arc::new(SyncDispatcher::new())
                }
            },
        };
        Self::with_bus(cache, bus)
    }

    /// Wire the aggregators to an existing cache and bus.
    pub fn with_bus(cache: Arc<TreeCache>, bus: Arc<dyn EventBus>) -> Self {
        let file_stats = FileStatsAggregator::new(bus.as_ref(), Arc::clone(&cache));
        let activity = ActivityAggregator::new(bus.as_ref(), Arc::clone(&cache));
        let coordinator = HierarchyCoordinator::new(Arc::clone(&cache), Arc::clone(&bus));
        Self {
            cache,
            bus,
            file_stats,
            activity,
            coordinator,
        }
    }

    /// Load a durable snapshot into an empty index.
    ///
    /// Nodes that fail validation are skipped along with every post they own.
    /// Recursive values are rebuilt once after all Direct values are in place.
    pub fn seed(&self, snapshot: &SeedSnapshot) -> SeedReport {
        let mut report = SeedReport::default();
        for node in snapshot.nodes_parent_first() {
            let id = node.id;
            match self.cache.set(node) {
                Ok(()) => report.nodes_loaded += 1,
                Err(e) => {
                    warn!(node_id = %id, error = %e, "skipping invalid space while seeding");
                    report.nodes_skipped.push(id);
                }
            }
        }

        let loaded: HashSet<NodeId> = self.cache.get_all().iter().map(|n| n.id).collect();
        let accepted = SeedSnapshot {
            nodes: snapshot
                .nodes
                .iter()
                .filter(|n| loaded.contains(&n.id))
                .cloned()
                .collect(),
            node_files: snapshot
                .node_files
                .iter()
                .filter(|f| loaded.contains(&f.node_id))
                .cloned()
                .collect(),
            posts: snapshot
                .posts
                .iter()
                .filter(|p| loaded.contains(&p.node_id))
                .cloned()
                .collect(),
        };
        report.posts_loaded = accepted.posts.len();
        report.posts_skipped = snapshot.posts.len() - accepted.posts.len();

        self.file_stats.seed(&accepted.node_files, &accepted.posts);
        self.activity.seed(&accepted.posts);
        self.coordinator.seed(&accepted);
        // Skipped rows still exist in the store, so their ids stay taken.
        self.coordinator.reserve_ids(snapshot);

        info!(
            nodes = report.nodes_loaded,
            skipped = report.nodes_skipped.len(),
            posts = report.posts_loaded,
            "space index seeded"
        );
        report
    }

    pub fn cache(&self) -> &Arc<TreeCache> {
        &self.cache
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub fn file_stats(&self) -> &FileStatsAggregator {
        &self.file_stats
    }

    pub fn activity(&self) -> &ActivityAggregator {
        &self.activity
    }

    pub fn coordinator(&self) -> &HierarchyCoordinator {
        &self.coordinator
    }
}
