//! In-memory hierarchy engine: the tree cache, the event bus and the
//! aggregators that keep per-space file and activity statistics current.

pub mod activity;
pub mod aggregate;
pub mod bus;
pub mod coordinator;
pub mod error;
pub mod file_stats;
pub mod index;
pub mod tree;

pub use activity::{Activity, ActivityAggregator, ActivityPeriod, ActivityRecord, ActivityStats};
pub use aggregate::{AggregatePair, AggregateStore, AggregateValue, ImpactSource};
pub use bus::{
    handler_fn, AsyncDispatcher, BusStatsSnapshot, EventBus, EventHandler, SyncDispatcher,
};
pub use coordinator::{HierarchyCoordinator, NewSpace, PostRecord, SpaceUpdate};
pub use error::CoordinatorError;
pub use file_stats::{FileStats, FileStatsAggregator};
pub use index::{SeedReport, SpaceIndex};
pub use tree::{AncestorChain, TreeCache, TreeError};
