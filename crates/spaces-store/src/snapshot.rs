//! Startup snapshot for seeding the in-memory engine.

use tracing::{info, instrument};

use spaces_core::{FileId, NodeId, PostId, SeedFile, SeedNodeFiles, SeedPost, SeedSnapshot};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::parse_time;
use crate::spaces::SpaceRepo;

/// Read every space, every post with its files, and per-space file totals.
#[instrument(skip(db))]
pub fn load_snapshot(db: &Database) -> Result<SeedSnapshot, StoreError> {
    let nodes = SpaceRepo::new(db.clone()).list()?;

    let node_files = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT p.space_id, COUNT(f.id), COALESCE(SUM(f.size), 0)
             FROM post_files f JOIN posts p ON p.id = f.post_id
             GROUP BY p.space_id ORDER BY p.space_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SeedNodeFiles {
                    node_id: NodeId::new(row.get(0)?),
                    file_count: row.get(1)?,
                    total_size: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT p.id, p.space_id, p.created_at, f.id, f.size
             FROM posts p LEFT JOIN post_files f ON f.post_id = p.id
             ORDER BY p.id, f.id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    let mut posts: Vec<SeedPost> = Vec::new();
    for (post_id, space_id, created_at, file_id, size) in rows {
        let post_id = PostId::new(post_id);
        if posts.last().map(|p| p.post_id) != Some(post_id) {
            posts.push(SeedPost {
                post_id,
                node_id: NodeId::new(space_id),
                created_at: parse_time(&created_at, "posts", "created_at")?,
                file_count: 0,
                file_size: 0,
                files: Vec::new(),
            });
        }
        if let (Some(file_id), Some(size), Some(post)) = (file_id, size, posts.last_mut()) {
            post.file_count += 1;
            post.file_size += size;
            post.files.push(SeedFile {
                file_id: FileId::new(file_id),
                size,
            });
        }
    }

    info!(
        spaces = nodes.len(),
        posts = posts.len(),
        "snapshot loaded"
    );
    Ok(SeedSnapshot {
        nodes,
        node_files,
        posts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posts::PostRepo;
    use chrono::{TimeZone, Utc};
    use spaces_core::Node;

    #[test]
    fn empty_database_gives_empty_snapshot() {
        let db = Database::in_memory().unwrap();
        let snapshot = load_snapshot(&db).unwrap();
        assert!(snapshot.nodes.is_empty());
        assert!(snapshot.node_files.is_empty());
        assert!(snapshot.posts.is_empty());
    }

    #[test]
    fn posts_carry_their_files_and_totals() {
        let db = Database::in_memory().unwrap();
        let spaces = SpaceRepo::new(db.clone());
        let posts = PostRepo::new(db.clone());
        spaces.insert(&Node::new(NodeId::new(1), None, "root")).unwrap();
        spaces
            .insert(&Node::new(NodeId::new(2), Some(NodeId::new(1)), "child"))
            .unwrap();

        let at = Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap();
        posts.insert(PostId::new(1), NodeId::new(2), at).unwrap();
        posts.insert(PostId::new(2), NodeId::new(2), at).unwrap();
        posts.insert(PostId::new(3), NodeId::new(1), at).unwrap();
        posts.attach_file(FileId::new(1), PostId::new(1), 100).unwrap();
        posts.attach_file(FileId::new(2), PostId::new(1), 50).unwrap();
        posts.attach_file(FileId::new(3), PostId::new(3), 7).unwrap();

        let snapshot = load_snapshot(&db).unwrap();
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(
            snapshot.node_files,
            vec![
                SeedNodeFiles {
                    node_id: NodeId::new(1),
                    file_count: 1,
                    total_size: 7,
                },
                SeedNodeFiles {
                    node_id: NodeId::new(2),
                    file_count: 2,
                    total_size: 150,
                },
            ]
        );

        assert_eq!(snapshot.posts.len(), 3);
        let first = &snapshot.posts[0];
        assert_eq!((first.file_count, first.file_size), (2, 150));
        assert_eq!(first.files.len(), 2);
        assert_eq!(first.created_at, at);
        let empty = &snapshot.posts[1];
        assert_eq!((empty.file_count, empty.file_size), (0, 0));
        assert!(empty.files.is_empty());
    }
}
