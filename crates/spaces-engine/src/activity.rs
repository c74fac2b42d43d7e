//! Per-day posting histograms per space.
//!
//! Each record keeps a Direct histogram (posts owned by the space) and a
//! Recursive one (the whole subtree), keyed by the UTC date a post was created.
//! Buckets that reach zero are pruned, so the number of active days is always
//! the number of keys.
//!
//! First/last post times are running min/max. Removing the earliest or latest
//! post does not pull them back in; they reset only when a record empties out.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use spaces_core::{EventKind, HandlerError, NodeId, SeedPost, SpaceEvent};
use tracing::{debug, info};

use crate::aggregate::{AggregateStore, AggregateValue, ImpactSource};
use crate::bus::{EventBus, EventHandler};
use crate::tree::TreeCache;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Activity {
    pub days: BTreeMap<NaiveDate, i64>,
    pub posts: i64,
    pub first_post: Option<DateTime<Utc>>,
    pub last_post: Option<DateTime<Utc>>,
}

impl Activity {
    /// One post created at `at`.
    pub fn single(at: DateTime<Utc>) -> Self {
        Self {
            days: BTreeMap::from([(at.date_naive(), 1)]),
            posts: 1,
            first_post: Some(at),
            last_post: Some(at),
        }
    }

    pub fn active_days(&self) -> usize {
        self.days.len()
    }
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn latest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

impl AggregateValue for Activity {
    fn merge(&self, other: &Self) -> Self {
        let mut days = self.days.clone();
        for (day, count) in &other.days {
            let slot = days.entry(*day).or_insert(0);
            *slot += count;
            if *slot == 0 {
                days.remove(day);
            }
        }
        Self {
            days,
            posts: self.posts + other.posts,
            first_post: earliest(self.first_post, other.first_post),
            last_post: latest(self.last_post, other.last_post),
        }
    }

    /// Counts flip sign; timestamps are dropped since a removal carries no
    /// information about the surviving min/max.
    fn negate(&self) -> Self {
        Self {
            days: self.days.iter().map(|(day, count)| (*day, -count)).collect(),
            posts: -self.posts,
            first_post: None,
            last_post: None,
        }
    }

    fn clamp(&mut self) -> bool {
        let under = self.posts < 0 || self.days.values().any(|count| *count < 0);
        self.days.retain(|_, count| *count > 0);
        self.posts = self.posts.max(0);
        if self.posts == 0 && self.days.is_empty() {
            self.first_post = None;
            self.last_post = None;
        }
        under
    }

    fn is_empty(&self) -> bool {
        self.posts == 0 && self.days.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub total_posts: i64,
    pub total_active_days: usize,
    pub recursive_posts: i64,
    pub recursive_active_days: usize,
    pub first_post_time: Option<DateTime<Utc>>,
    pub last_post_time: Option<DateTime<Utc>>,
    pub recursive_first_post_time: Option<DateTime<Utc>>,
    pub recursive_last_post_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub days: BTreeMap<NaiveDate, i64>,
    pub recursive: BTreeMap<NaiveDate, i64>,
    pub stats: ActivityStats,
}

/// A window of the histogram, `(start, end]` in UTC dates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub period_index: u32,
    pub period_months: u32,
    pub days: BTreeMap<NaiveDate, i64>,
    pub stats: ActivityStats,
    pub max_periods: u32,
}

const SUBSCRIPTIONS: [EventKind; 5] = [
    EventKind::PostCreated,
    EventKind::PostDeleted,
    EventKind::PostMoved,
    EventKind::NodeUpdated,
    EventKind::NodeDeleted,
];

pub struct ActivityAggregator {
    store: AggregateStore<Activity>,
}

impl ActivityAggregator {
    /// Create the aggregator and subscribe it to `bus`.
    pub fn new(bus: &dyn EventBus, cache: Arc<TreeCache>) -> Arc<Self> {
        let aggregator = Arc::new(Self::detached(cache));
        for kind in SUBSCRIPTIONS {
            bus.subscribe(kind, aggregator.clone());
        }
        aggregator
    }

    pub fn detached(cache: Arc<TreeCache>) -> Self {
        Self {
            store: AggregateStore::new("activity", cache),
        }
    }

    pub fn store(&self) -> &AggregateStore<Activity> {
        &self.store
    }

    /// Replay every post into its space's Direct histogram, then rebuild Recursive.
    pub fn seed(&self, posts: &[SeedPost]) {
        for post in posts {
            self.store
                .seed_direct(post.node_id, &Activity::single(post.created_at));
        }
        self.store.rebuild_all();
        info!(posts = posts.len(), "activity seeded");
    }

    /// Full record for a space; empty for unknown or deleted spaces.
    pub fn record(&self, node: NodeId) -> ActivityRecord {
        let pair = self.store.get(node).unwrap_or_default();
        ActivityRecord {
            stats: stats_of(&pair.direct, &pair.recursive),
            days: pair.direct.days,
            recursive: pair.recursive.days,
        }
    }

    pub fn activity_period(
        &self,
        node: NodeId,
        recursive: bool,
        period_index: u32,
        period_months: u32,
    ) -> ActivityPeriod {
        self.activity_period_at(node, recursive, period_index, period_months, Utc::now())
    }

    /// Histogram window `period_index` periods back from `now`.
    ///
    /// Period 0 covers the `period_months` months ending on `now`'s date.
    pub fn activity_period_at(
        &self,
        node: NodeId,
        recursive: bool,
        period_index: u32,
        period_months: u32,
        now: DateTime<Utc>,
    ) -> ActivityPeriod {
        let months = period_months.max(1);
        let record = self.record(node);
        let (start, end) = window(now.date_naive(), period_index, months);

        let source = if recursive {
            &record.recursive
        } else {
            &record.days
        };
        let days = if start < end {
            source
                .range((Bound::Excluded(start), Bound::Included(end)))
                .map(|(day, count)| (*day, *count))
                .collect()
        } else {
            BTreeMap::new()
        };

        let first = if recursive {
            record.stats.recursive_first_post_time
        } else {
            record.stats.first_post_time
        };

        ActivityPeriod {
            start,
            end,
            period_index,
            period_months: months,
            days,
            max_periods: max_periods(first, now, months),
            stats: record.stats,
        }
    }

    pub fn apply(&self, event: &SpaceEvent) -> Result<(), HandlerError> {
        match event {
            SpaceEvent::PostCreated {
                node_id,
                created_at,
                ..
            } => {
                self.store
                    .update_direct(*node_id, &Activity::single(*created_at));
            }
            SpaceEvent::PostDeleted {
                node_id,
                created_at,
                ..
            } => {
                self.store
                    .update_direct(*node_id, &Activity::single(*created_at).negate());
            }
            SpaceEvent::PostMoved {
                post_id,
                old_node,
                new_node,
                created_at,
            } => {
                if old_node == new_node {
                    return Ok(());
                }
                let delta = Activity::single(*created_at);
                self.store.update_direct(*old_node, &delta.negate());
                self.store.update_direct(*new_node, &delta);
                debug!(post_id = %post_id, from = %old_node, to = %new_node, "post activity moved");
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
                        ImpactSource::Recomputed,
                    );
                }
            }
            SpaceEvent::NodeDeleted {
                node_id, old_parent, ..
            } => {
                self.store.remove_node(*node_id, *old_parent);
            }
            SpaceEvent::NodeCreated { .. }
            | SpaceEvent::FileUploaded { .. }
            | SpaceEvent::FileDeleted { .. } => {}
        }
        Ok(())
    }
}

impl EventHandler for ActivityAggregator {
    fn name(&self) -> &str {
        "activity"
    }

    fn handle(&self, event: &SpaceEvent) -> Result<(), HandlerError> {
        self.apply(event)
    }
}

fn stats_of(direct: &Activity, recursive: &Activity) -> ActivityStats {
    ActivityStats {
        total_posts: direct.posts,
        total_active_days: direct.active_days(),
        recursive_posts: recursive.posts,
        recursive_active_days: recursive.active_days(),
        first_post_time: direct.first_post,
        last_post_time: direct.last_post,
        recursive_first_post_time: recursive.first_post,
        recursive_last_post_time: recursive.last_post,
    }
}

/// `(start, end]` for period `index`, or an empty `(MIN, MIN]` on overflow.
fn window(today: NaiveDate, index: u32, months: u32) -> (NaiveDate, NaiveDate) {
    let end = index
        .checked_mul(months)
        .and_then(|back| today.checked_sub_months(Months::new(back)));
    let start = end.and_then(|end| end.checked_sub_months(Months::new(months)));
    match (start, end) {
        (Some(start), Some(end)) => (start, end),
        _ => (NaiveDate::MIN, NaiveDate::MIN),
    }
}

/// Number of periods needed to reach back to the first post, at least 1.
fn max_periods(first: Option<DateTime<Utc>>, now: DateTime<Utc>, months: u32) -> u32 {
    let Some(first) = first else {
        return 1;
    };
    let first_day = first.date_naive();
    let today = now.date_naive();
    if first_day >= today {
        return 1;
    }

    let elapsed = (today.year() - first_day.year()) * 12 + today.month() as i32
        - first_day.month() as i32;
    let estimate = (elapsed.max(0) as u32) / months;
    let covering = [estimate.saturating_sub(1), estimate, estimate + 1]
        .into_iter()
        .find(|&index| window(today, index, months).0 < first_day)
        .unwrap_or(estimate + 1);
    covering + 1
}
