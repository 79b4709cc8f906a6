//! Error types for feed paging.

use skyline_atproto::ServiceError;
use thiserror::Error;

/// Why a page could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// The last page had no cursor. A normal end of feed, not a failure.
    #[error("no more pages")]
    Exhausted,

    /// `fetch_next_page` was called before a first page was loaded.
    #[error("no first page loaded")]
    NotLoaded,

    /// Network or server trouble; already loaded pages are intact.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The server refused the request.
    #[error("rejected by server: {0}")]
    Conflict(String),

    /// Cancelled, or made obsolete by a reload.
    #[error("fetch aborted")]
    Aborted,
}

impl FeedError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Transient(_))
    }

    /// Errors the UI should not report to the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, FeedError::Aborted | FeedError::Exhausted)
    }
}

impl From<ServiceError> for FeedError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Transient(msg) => FeedError::Transient(msg),
            ServiceError::Conflict(msg) => FeedError::Conflict(msg),
            ServiceError::Aborted => FeedError::Aborted,
        }
    }
}
