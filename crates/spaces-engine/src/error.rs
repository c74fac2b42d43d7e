use spaces_core::{FileId, NodeId, PostId};

use crate::tree::TreeError;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("space {0} still has child spaces")]
    HasChildren(NodeId),

    #[error("post {0} does not exist")]
    UnknownPost(PostId),

    #[error("file {file} does not belong to post {post}")]
    UnknownFile { post: PostId, file: FileId },

    #[error("invalid space name: {0}")]
    InvalidName(String),

    #[error("invalid file size {0}")]
    InvalidSize(i64),
}

impl CoordinatorError {
    /// True for errors caused by the request rather than by state drift.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Tree(TreeError::CircularReference { .. })
                | Self::Tree(TreeError::DepthExceeded { .. })
                | Self::Tree(TreeError::UnknownParent(_))
                | Self::InvalidName(_)
                | Self::InvalidSize(_)
                | Self::HasChildren(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_errors_pass_through_display() {
        let err: CoordinatorError = TreeError::UnknownParent(NodeId::new(4)).into();
        assert_eq!(err.to_string(), "parent space 4 does not exist");
        assert!(err.is_validation());
    }

    #[test]
    fn missing_post_is_not_validation() {
        assert!(!CoordinatorError::UnknownPost(PostId::new(1)).is_validation());
    }
}
