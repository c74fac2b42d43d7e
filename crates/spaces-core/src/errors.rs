use thiserror::Error;

use crate::events::EventKind;

/// Failure reported by an event subscriber.
///
/// The bus logs these and moves on; they never reach the publisher.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{handler} rejected {kind} event: {reason}")]
    Rejected {
        handler: String,
        kind: EventKind,
        reason: String,
    },
}

impl HandlerError {
    pub fn rejected(handler: &str, kind: EventKind, reason: impl Into<String>) -> Self {
        Self::Rejected {
            handler: handler.to_string(),
            kind,
            reason: reason.into(),
        }
    }
}
