//! Subcommand execution. Mutations go through the coordinator first so the
//! tree rules are checked before anything is written to the store.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use spaces_core::NodeId;
use spaces_engine::{CoordinatorError, NewSpace, SpaceIndex, SpaceUpdate};
use spaces_store::{Database, PostRepo, SpaceRepo};

use crate::Command;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TreeEntry {
    id: NodeId,
    name: String,
    depth: usize,
    file_count: i64,
    total_size: i64,
    posts: i64,
    children: Vec<TreeEntry>,
}

fn tree_entry(index: &SpaceIndex, id: NodeId, depth: usize) -> Option<TreeEntry> {
    let node = index.cache().get(id)?;
    let files = index.file_stats().stats(id, true);
    let activity = index.activity().record(id);
    let children = index
        .cache()
        .children(id)
        .into_iter()
        .filter_map(|child| tree_entry(index, child, depth + 1))
        .collect();
    Some(TreeEntry {
        id,
        name: node.name,
        depth,
        file_count: files.file_count,
        total_size: files.total_size,
        posts: activity.stats.recursive_posts,
        children,
    })
}

fn space_summary(index: &SpaceIndex, id: NodeId) -> Value {
    json!({
        "space": index.cache().get(id),
        "direct": index.file_stats().stats(id, false),
        "recursive": index.file_stats().stats(id, true),
    })
}

fn parse_at(raw: Option<String>) -> Result<DateTime<Utc>> {
    match raw {
        Some(raw) => Ok(DateTime::parse_from_rfc3339(&raw)
            .with_context(|| format!("Invalid timestamp: {raw}"))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

/// Exit status for a failed command: 2 when the request itself was invalid.
pub(crate) fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<CoordinatorError>() {
        Some(e) if e.is_validation() => 2,
        _ => 1,
    }
}

pub(crate) fn run(index: &SpaceIndex, db: &Database, command: Command) -> Result<Value> {
    let coordinator = index.coordinator();
    let spaces = SpaceRepo::new(db.clone());
    let posts = PostRepo::new(db.clone());

    let value = match command {
        Command::Tree => {
            let roots: Vec<TreeEntry> = index
                .cache()
                .roots()
                .into_iter()
                .filter_map(|root| tree_entry(index, root, 1))
                .collect();
            serde_json::to_value(roots)?
        }
        Command::Stats { id, recursive } => {
            serde_json::to_value(index.file_stats().stats(id, recursive))?
        }
        Command::Global => serde_json::to_value(index.file_stats().global_stats())?,
        Command::Activity {
            id,
            recursive,
            period,
            months,
        } => match period {
            Some(period) => serde_json::to_value(
                index
                    .activity()
                    .activity_period(id, recursive, period, months),
            )?,
            None => serde_json::to_value(index.activity().record(id))?,
        },
        Command::AddSpace {
            name,
            parent,
            description,
        } => {
            let node = coordinator.create_space(NewSpace {
                name,
                description,
                parent_id: parent,
            })?;
            spaces.insert(&node).context("Failed to store space")?;
            serde_json::to_value(node)?
        }
        Command::MoveSpace { id, parent } => {
            let node = coordinator.update_space(
                id,
                SpaceUpdate {
                    parent: Some(parent),
                    ..Default::default()
                },
            )?;
            spaces
                .set_parent(id, node.parent_id)
                .context("Failed to store space parent")?;
            space_summary(index, id)
        }
        Command::RenameSpace { id, name } => {
            let node = coordinator.update_space(
                id,
                SpaceUpdate {
                    name: Some(name),
                    ..Default::default()
                },
            )?;
            spaces.update(&node).context("Failed to store space")?;
            serde_json::to_value(node)?
        }
        Command::RemoveSpace { id } => {
            let parent = index.cache().parent(id);
            coordinator.delete_space(id)?;
            let removed = spaces.delete(id).context("Failed to delete space")?;
            json!({
                "deleted": id,
                "affectedPosts": removed,
                "parent": parent.map(|p| space_summary(index, p)),
            })
        }
        Command::AddPost { space, at } => {
            let record = coordinator.create_post(space, parse_at(at)?)?;
            posts
                .insert(record.id, record.node_id, record.created_at)
                .context("Failed to store post")?;
            serde_json::to_value(record)?
        }
        Command::MovePost { post, space } => {
            let record = coordinator.move_post(post, space)?;
            posts.move_to(post, space).context("Failed to store post move")?;
            serde_json::to_value(record)?
        }
        Command::RemovePost { post } => {
            let record = coordinator.delete_post(post)?;
            posts.delete(post).context("Failed to delete post")?;
            space_summary(index, record.node_id)
        }
        Command::AddFile { post, size } => {
            let file = coordinator.upload_file(post, size)?;
            posts
                .attach_file(file, post, size)
                .context("Failed to store file")?;
            json!({ "post": post, "file": file, "size": size })
        }
        Command::RemoveFile { post, file } => {
            let size = coordinator.delete_file(post, file)?;
            posts.delete_file(file).context("Failed to delete file")?;
            json!({ "post": post, "file": file, "size": size })
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spaces_core::{PostId, SpacesSettings};

    fn setup() -> (SpaceIndex, Database) {
        (
            SpaceIndex::from_settings(&SpacesSettings::default()),
            Database::in_memory().unwrap(),
        )
    }

    #[test]
    fn add_space_writes_through_to_the_store() {
        let (index, db) = setup();
        let value = run(
            &index,
            &db,
            Command::AddSpace {
                name: "notes".into(),
                parent: None,
                description: String::new(),
            },
        )
        .unwrap();
        assert_eq!(value["name"], "notes");
        assert_eq!(SpaceRepo::new(db).list().unwrap().len(), 1);
    }

    #[test]
    fn invalid_requests_exit_with_two() {
        let (index, db) = setup();
        let err = run(
            &index,
            &db,
            Command::AddSpace {
                name: "child".into(),
                parent: Some(NodeId::new(404)),
                description: String::new(),
            },
        )
        .unwrap_err();
        assert_eq!(exit_code(&err), 2);
        assert!(SpaceRepo::new(db).list().unwrap().is_empty());
    }

    #[test]
    fn missing_targets_exit_with_one() {
        let (index, db) = setup();
        let err = run(&index, &db, Command::RemovePost { post: PostId::new(3) }).unwrap_err();
        assert_eq!(exit_code(&err), 1);
    }
}
