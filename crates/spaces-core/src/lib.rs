//! Shared types for the spaces hierarchy: ids, nodes, events, seed data and settings.

pub mod errors;
pub mod events;
pub mod ids;
pub mod node;
pub mod seed;
pub mod settings;

pub use errors::HandlerError;
pub use events::{EventKind, SpaceEvent};
pub use ids::{FileId, NodeId, PostId};
pub use node::Node;
pub use seed::{SeedFile, SeedNodeFiles, SeedPost, SeedSnapshot};
pub use settings::{DispatchMode, SpacesSettings};
