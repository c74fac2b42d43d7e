//! # spaces
//!
//! Command-line front end: opens the SQLite store, seeds the in-memory
//! hierarchy engine from it, then answers one query or applies one mutation
//! and prints the result as JSON.

#![deny(unsafe_code)]

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spaces_core::settings::{load_settings_from_path, settings_path};
use spaces_core::{NodeId, PostId};
use spaces_engine::SpaceIndex;
use spaces_store::{load_snapshot, Database};
use spaces_telemetry::{init_telemetry, TelemetryConfig};

/// Hierarchical spaces with per-space file and activity statistics.
#[derive(Parser, Debug)]
#[command(name = "spaces", about = "Inspect and edit the spaces hierarchy")]
struct Cli {
    /// Path to the SQLite database (overrides settings).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Settings file (defaults to ~/.spaces/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Print the whole tree with recursive totals.
    Tree,
    /// File totals for one space.
    Stats {
        id: NodeId,
        #[arg(long)]
        recursive: bool,
    },
    /// File totals across every space.
    Global,
    /// Activity histogram for one space, or one window of it with --period.
    Activity {
        id: NodeId,
        #[arg(long)]
        recursive: bool,
        /// Window index counting back from today (0 = most recent).
        #[arg(long)]
        period: Option<u32>,
        /// Window length in months.
        #[arg(long, default_value = "1")]
        months: u32,
    },
    /// Create a space.
    AddSpace {
        name: String,
        #[arg(long)]
        parent: Option<NodeId>,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Move a space under another one, or to the top level without --parent.
    MoveSpace {
        id: NodeId,
        #[arg(long)]
        parent: Option<NodeId>,
    },
    /// Rename a space.
    RenameSpace { id: NodeId, name: String },
    /// Delete a space that has no child spaces, along with its posts.
    RemoveSpace { id: NodeId },
    /// Create a post in a space.
    AddPost {
        space: NodeId,
        /// Creation time as RFC 3339 (defaults to now).
        #[arg(long)]
        at: Option<String>,
    },
    /// Move a post to another space.
    MovePost { post: PostId, space: NodeId },
    /// Delete a post and its files.
    RemovePost { post: PostId },
    /// Attach a file of `size` bytes to a post.
    AddFile { post: PostId, size: i64 },
    /// Remove a file from a post.
    RemoveFile {
        post: PostId,
        file: spaces_core::FileId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_file = cli.settings.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&settings_file)
        .with_context(|| format!("Failed to load settings from {}", settings_file.display()))?;
    if let Some(db) = cli.db.clone() {
        settings.database.path = db;
    }

    let _ = init_telemetry(&TelemetryConfig::from(&settings.logging));

    let db = Database::open(&settings.database.path).with_context(|| {
        format!(
            "Failed to open database at {}",
            settings.database.path.display()
        )
    })?;
    let snapshot = load_snapshot(&db).context("Failed to load snapshot")?;

    let index = SpaceIndex::from_settings(&settings);
    let report = index.seed(&snapshot);
    if !report.nodes_skipped.is_empty() {
        tracing::warn!(skipped = ?report.nodes_skipped, "some spaces could not be loaded");
    }

    let output = match commands::run(&index, &db, cli.command) {
        Ok(output) => output,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e:#}");
            std::process::exit(commands::exit_code(&e));
        }
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
