use rusqlite::{params, OptionalExtension, Row};
use tracing::instrument;

use spaces_core::{Node, NodeId, PostId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{format_time, parse_time};

const COLUMNS: &str = "id, parent_id, name, description, created_at";

fn read_node(row: &Row<'_>) -> rusqlite::Result<(i64, Option<i64>, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_node(raw: (i64, Option<i64>, String, String, String)) -> Result<Node, StoreError> {
    let (id, parent, name, description, created_at) = raw;
    Ok(Node {
        id: NodeId::new(id),
        parent_id: parent.map(NodeId::new),
        name,
        description,
        created_at: parse_time(&created_at, "spaces", "created_at")?,
    })
}

pub struct SpaceRepo {
    db: Database,
}

impl SpaceRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a space under the id the engine assigned it.
    #[instrument(skip(self, node), fields(node_id = %node.id))]
    pub fn insert(&self, node: &Node) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO spaces (id, parent_id, name, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    node.id.get(),
                    node.parent_id.map(NodeId::get),
                    node.name,
                    node.description,
                    format_time(&node.created_at),
                ],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(node_id = %id))]
    pub fn get(&self, id: NodeId) -> Result<Node, StoreError> {
        let raw = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM spaces WHERE id = ?1"),
                    [id.get()],
                    read_node,
                )
                .optional()?)
        })?;
        into_node(raw.ok_or_else(|| StoreError::NotFound(format!("space {id}")))?)
    }

    /// All spaces, ordered by id.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<Node>, StoreError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM spaces ORDER BY id"))?;
            let rows = stmt
                .query_map([], read_node)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(into_node).collect()
    }

    /// Write name, description and parent of an existing space.
    #[instrument(skip(self, node), fields(node_id = %node.id))]
    pub fn update(&self, node: &Node) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE spaces SET parent_id = ?2, name = ?3, description = ?4 WHERE id = ?1",
                params![
                    node.id.get(),
                    node.parent_id.map(NodeId::get),
                    node.name,
                    node.description,
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("space {}", node.id)));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(node_id = %id))]
    pub fn set_parent(&self, id: NodeId, parent: Option<NodeId>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE spaces SET parent_id = ?2 WHERE id = ?1",
                params![id.get(), parent.map(NodeId::get)],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("space {id}")));
            }
            Ok(())
        })
    }

    /// Delete a leaf space and every post it owns, returning the post ids.
    #[instrument(skip(self), fields(node_id = %id))]
    pub fn delete(&self, id: NodeId) -> Result<Vec<PostId>, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let children: i64 = tx.query_row(
                "SELECT COUNT(*) FROM spaces WHERE parent_id = ?1",
                [id.get()],
                |row| row.get(0),
            )?;
            if children > 0 {
                return Err(StoreError::Conflict(format!(
                    "space {id} still has {children} child spaces"
                )));
            }

            let posts: Vec<PostId> = {
                let mut stmt = tx.prepare("SELECT id FROM posts WHERE space_id = ?1 ORDER BY id")?;
                let rows = stmt
                    .query_map([id.get()], |row| row.get::<_, i64>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(PostId::new).collect()
            };
            tx.execute("DELETE FROM posts WHERE space_id = ?1", [id.get()])?;

            let removed = tx.execute("DELETE FROM spaces WHERE id = ?1", [id.get()])?;
            if removed == 0 {
                return Err(StoreError::NotFound(format!("space {id}")));
            }
            tx.commit()?;
            Ok(posts)
        })
    }
}
