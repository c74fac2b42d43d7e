//! End-to-end behaviour of the engine through the coordinator.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use spaces_core::{
    EventKind, Node, NodeId, PostId, SeedNodeFiles, SeedPost, SeedSnapshot, SpaceEvent,
    SpacesSettings,
};
use spaces_engine::{
    handler_fn, AggregateValue, CoordinatorError, FileStats, NewSpace, SpaceIndex, SpaceUpdate,
    TreeError,
};

const FILE_SIZE: i64 = 1_024;

fn index() -> SpaceIndex {
    SpaceIndex::from_settings(&SpacesSettings::default())
}

fn space(index: &SpaceIndex, name: &str, parent: Option<NodeId>) -> NodeId {
    index
        .coordinator()
        .create_space(NewSpace {
            name: name.to_string(),
            parent_id: parent,
            ..Default::default()
        })
        .unwrap()
        .id
}

fn post_with_files(index: &SpaceIndex, node: NodeId, files: usize) -> PostId {
    let post = index.coordinator().create_post(node, Utc::now()).unwrap();
    for _ in 0..files {
        index.coordinator().upload_file(post.id, FILE_SIZE).unwrap();
    }
    post.id
}

/// Recursive == Direct merged with every child's Recursive, for every cached space.
fn assert_settled(index: &SpaceIndex) {
    let cache = index.cache();
    let stats = index.file_stats();
    for node in cache.get_all() {
        let mut expected = stats.stats(node.id, false);
        for child in cache.children(node.id) {
            expected = expected.merge(&stats.stats(child, true));
        }
        let actual = stats.stats(node.id, true);
        assert_eq!(actual, expected, "recursive mismatch at {}", node.id);
        assert!(actual.file_count >= stats.stats(node.id, false).file_count);
        assert!(stats.stats(node.id, false).file_count >= 0);

        let activity = index.activity().record(node.id);
        let mut posts = activity.stats.total_posts;
        for child in cache.children(node.id) {
            posts += index.activity().record(child).stats.recursive_posts;
        }
        assert_eq!(activity.stats.recursive_posts, posts, "activity mismatch at {}", node.id);
    }
}

/// A -> B -> C with five two-file posts under C.
fn chain() -> (SpaceIndex, NodeId, NodeId, NodeId) {
    let index = index();
    let a = space(&index, "A", None);
    let b = space(&index, "B", Some(a));
    let c = space(&index, "C", Some(b));
    for _ in 0..5 {
        post_with_files(&index, c, 2);
    }
    (index, a, b, c)
}

#[test]
fn content_under_leaf_rolls_up_the_chain() {
    let (index, a, b, c) = chain();
    let stats = index.file_stats();
    let total = FileStats::new(10, 10 * FILE_SIZE);

    assert_eq!(stats.stats(a, true), total);
    assert_eq!(stats.stats(a, false), FileStats::default());
    assert_eq!(stats.stats(b, true), total);
    assert_eq!(stats.stats(c, false), total);
    assert_eq!(stats.global_stats(), total);
    assert_eq!(index.activity().record(a).stats.recursive_posts, 5);
    assert_settled(&index);
}

#[test]
fn reparent_to_grandparent() {
    let (index, a, b, c) = chain();
    let before_a = index.file_stats().stats(a, true);

    index
        .coordinator()
        .update_space(
            c,
            SpaceUpdate {
                parent: Some(Some(a)),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(index.file_stats().stats(b, true), FileStats::default());
    assert_eq!(index.file_stats().stats(a, true), before_a);
    assert_eq!(index.activity().record(b).stats.recursive_posts, 0);
    assert_eq!(index.activity().record(a).stats.recursive_posts, 5);
    assert_eq!(index.cache().children(a), vec![b, c]);
    assert_settled(&index);
}

#[test]
fn delete_reports_affected_posts_and_zeroes_the_node() {
    let p = NodeId::new(1);
    let d = NodeId::new(2);
    let created = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
    let seed_post = |id: i64, node: NodeId| SeedPost {
        post_id: PostId::new(id),
        node_id: node,
        created_at: created,
        file_count: 1,
        file_size: 50,
        files: Vec::new(),
    };
    let snapshot = SeedSnapshot {
        nodes: vec![Node::new(p, None, "P"), Node::new(d, Some(p), "D")],
        node_files: vec![
            SeedNodeFiles {
                node_id: p,
                file_count: 1,
                total_size: 50,
            },
            SeedNodeFiles {
                node_id: d,
                file_count: 2,
                total_size: 100,
            },
        ],
        posts: vec![seed_post(100, p), seed_post(101, d), seed_post(102, d)],
    };

    let index = index();
    index.seed(&snapshot);

    let deleted = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&deleted);
    index.bus().subscribe(
        EventKind::NodeDeleted,
        handler_fn("capture", move |event| {
            sink.lock().push(event.clone());
            Ok(())
        }),
    );

    let direct_before = index.file_stats().stats(p, false);
    let recursive_before = index.file_stats().stats(p, true);
    let removed = index.file_stats().stats(d, false);

    index.coordinator().delete_space(d).unwrap();

    assert_eq!(
        deleted.lock().as_slice(),
        &[SpaceEvent::NodeDeleted {
            node_id: d,
            old_parent: Some(p),
            affected_posts: vec![PostId::new(101), PostId::new(102)],
        }]
    );
    assert_eq!(index.file_stats().stats(p, false), direct_before);
    assert_eq!(
        index.file_stats().stats(p, true),
        recursive_before.merge(&removed.negate())
    );
    assert_eq!(index.file_stats().stats(d, true), FileStats::default());
    assert_eq!(index.activity().record(d).stats.total_posts, 0);
    assert_eq!(index.activity().record(p).stats.recursive_posts, 1);
    assert_settled(&index);
}

#[test]
fn moving_a_post_touches_only_both_chains() {
    let index = index();
    let root = space(&index, "root", None);
    let left = space(&index, "left", Some(root));
    let left_leaf = space(&index, "left-leaf", Some(left));
    let right = space(&index, "right", Some(root));
    let bystander = space(&index, "bystander", Some(root));
    post_with_files(&index, bystander, 1);

    let post = post_with_files(&index, left_leaf, 3);
    let untouched = index.file_stats().stats(bystander, true);
    let root_before = index.file_stats().stats(root, true);

    index.coordinator().move_post(post, right).unwrap();

    let moved = FileStats::new(3, 3 * FILE_SIZE);
    assert_eq!(index.file_stats().stats(left_leaf, false), FileStats::default());
    assert_eq!(index.file_stats().stats(left, true), FileStats::default());
    assert_eq!(index.file_stats().stats(right, false), moved);
    assert_eq!(index.file_stats().stats(root, true), root_before);
    assert_eq!(index.file_stats().stats(bystander, true), untouched);
    assert_eq!(index.file_stats().post_stats(right, post), moved);
    assert_settled(&index);
}

#[test]
fn files_added_after_creation_follow_the_post() {
    let index = index();
    let a = space(&index, "a", None);
    let b = space(&index, "b", None);
    let post = post_with_files(&index, a, 1);
    index.coordinator().upload_file(post, 10).unwrap();

    index.coordinator().move_post(post, b).unwrap();
    assert_eq!(
        index.file_stats().stats(b, true),
        FileStats::new(2, FILE_SIZE + 10)
    );

    index.coordinator().delete_post(post).unwrap();
    assert_eq!(index.file_stats().global_stats(), FileStats::default());
    assert_settled(&index);
}

#[test]
fn rejected_reparent_leaves_everything_unchanged() {
    let (index, a, _b, c) = chain();
    let before: Vec<Node> = index.cache().get_all();
    let stats_before = index.file_stats().stats(a, true);

    for target in [c, a] {
        let err = index
            .coordinator()
            .update_space(
                a,
                SpaceUpdate {
                    parent: Some(Some(target)),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::Tree(TreeError::CircularReference { .. })
        ));
        assert!(err.is_validation());
    }

    assert_eq!(index.cache().get_all(), before);
    assert_eq!(index.file_stats().stats(a, true), stats_before);
}

#[test]
fn depth_limit_counts_the_moved_subtree() {
    let mut settings = SpacesSettings::default();
    settings.hierarchy.max_depth = 3;
    let index = SpaceIndex::from_settings(&settings);
    let a = space(&index, "a", None);
    let b = space(&index, "b", Some(a));
    let other = space(&index, "other", None);
    let leaf = space(&index, "leaf", Some(other));

    let err = index
        .coordinator()
        .update_space(
            other,
            SpaceUpdate {
                parent: Some(Some(b)),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Tree(TreeError::DepthExceeded { depth: 4, .. })
    ));
    assert_eq!(index.cache().parent(leaf), Some(other));
    assert!(index.cache().get(other).unwrap().is_root());
}

#[test]
fn activity_window_sees_posts_in_range() {
    let index = index();
    let a = space(&index, "a", None);
    let b = space(&index, "b", Some(a));
    let now = Utc.with_ymd_and_hms(2026, 6, 15, 10, 0, 0).unwrap();
    for days_back in [1, 2, 2, 40, 200] {
        index
            .coordinator()
            .create_post(b, now - Duration::days(days_back))
            .unwrap();
    }

    let recent = index.activity().activity_period_at(a, true, 0, 1, now);
    assert_eq!(recent.days.values().sum::<i64>(), 3);
    assert!(index
        .activity()
        .activity_period_at(a, false, 0, 1, now)
        .days
        .is_empty());

    let older = index.activity().activity_period_at(a, true, 1, 1, now);
    assert_eq!(older.days.values().sum::<i64>(), 1);
    assert_eq!(recent.max_periods, older.max_periods);
    assert!(recent.max_periods >= 7);
}
