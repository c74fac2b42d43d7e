//! SQLite persistence for spaces, posts and post files.

pub mod database;
pub mod error;
pub mod posts;
pub mod row_helpers;
pub mod schema;
pub mod snapshot;
pub mod spaces;

pub use database::Database;
pub use error::StoreError;
pub use posts::{PostRepo, PostRow};
pub use snapshot::load_snapshot;
pub use spaces::SpaceRepo;
