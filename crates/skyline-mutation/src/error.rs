//! Error types for relationship mutations.

use skyline_atproto::{RelationshipAction, ServiceError};
use thiserror::Error;

/// Why a queued mutation did not confirm the requested state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    /// Network or server trouble; the request may succeed if repeated.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The server rejected the request.
    #[error("rejected by server: {0}")]
    Conflict(String),

    /// Superseded by a newer request, or its owner went away.
    #[error("mutation aborted")]
    Aborted,

    /// No confirmed snapshot of the subject is cached.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// The entity type has no such relationship.
    #[error("{action} is not supported for {key}")]
    UnsupportedAction {
        key: String,
        action: RelationshipAction,
    },
}

impl MutationError {
    /// Errors the UI should not report to the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, MutationError::Aborted)
    }
}

impl From<ServiceError> for MutationError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Transient(msg) => MutationError::Transient(msg),
            ServiceError::Conflict(msg) => MutationError::Conflict(msg),
            ServiceError::Aborted => MutationError::Aborted,
        }
    }
}
