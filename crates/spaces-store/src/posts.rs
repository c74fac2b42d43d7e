use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use spaces_core::{FileId, NodeId, PostId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{format_time, parse_time};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRow {
    pub id: PostId,
    pub space_id: NodeId,
    pub created_at: DateTime<Utc>,
}

pub struct PostRepo {
    db: Database,
}

impl PostRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(post_id = %id, node_id = %space))]
    pub fn insert(
        &self,
        id: PostId,
        space: NodeId,
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO posts (id, space_id, created_at) VALUES (?1, ?2, ?3)",
                params![id.get(), space.get(), format_time(&created_at)],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(post_id = %post, file_id = %file))]
    pub fn attach_file(&self, file: FileId, post: PostId, size: i64) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO post_files (id, post_id, size) VALUES (?1, ?2, ?3)",
                params![file.get(), post.get(), size],
            )?;
            Ok(())
        })
    }

    /// Remove one attachment and return its size.
    #[instrument(skip(self), fields(file_id = %file))]
    pub fn delete_file(&self, file: FileId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            let size: i64 = conn
                .query_row(
                    "SELECT size FROM post_files WHERE id = ?1",
                    [file.get()],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("file {file}")))?;
            conn.execute("DELETE FROM post_files WHERE id = ?1", [file.get()])?;
            Ok(size)
        })
    }

    /// Delete a post together with its files.
    #[instrument(skip(self), fields(post_id = %id))]
    pub fn delete(&self, id: PostId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM posts WHERE id = ?1", [id.get()])?;
            if removed == 0 {
                return Err(StoreError::NotFound(format!("post {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(post_id = %id, node_id = %space))]
    pub fn move_to(&self, id: PostId, space: NodeId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE posts SET space_id = ?2 WHERE id = ?1",
                params![id.get(), space.get()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("post {id}")));
            }
            Ok(())
        })
    }

    /// All posts, ordered by id.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<PostRow>, StoreError> {
        let raw = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, space_id, created_at FROM posts ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        raw.into_iter()
            .map(|(id, space, created_at)| {
                Ok(PostRow {
                    id: PostId::new(id),
                    space_id: NodeId::new(space),
                    created_at: parse_time(&created_at, "posts", "created_at")?,
                })
            })
            .collect()
    }

    /// Attachments of one post as `(file, size)`, ordered by file id.
    pub fn files(&self, post: PostId) -> Result<Vec<(FileId, i64)>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, size FROM post_files WHERE post_id = ?1 ORDER BY id")?;
            let rows = stmt
                .query_map([post.get()], |row| {
                    Ok((FileId::new(row.get(0)?), row.get::<_, i64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
