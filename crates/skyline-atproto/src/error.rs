//! Error types for the ATProto client and the remote entity service.

use thiserror::Error;

/// XRPC error names that indicate a temporary upstream problem.
const TRANSIENT_XRPC_ERRORS: &[&str] = &[
    "UpstreamFailure",
    "UpstreamTimeout",
    "InternalServerError",
    "ServiceUnavailable",
];

/// Errors that can occur when talking to a PDS over XRPC.
#[derive(Debug, Error)]
pub enum AtprotoError {
    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limited.
    #[error("rate limited{}", match (endpoint, retry_after_secs) {
        (Some(ep), Some(secs)) => format!(" on {} (retry after {}s)", ep, secs),
        (Some(ep), None) => format!(" on {}", ep),
        (None, Some(secs)) => format!(" (retry after {}s)", secs),
        (None, None) => String::new(),
    })]
    RateLimited {
        /// The endpoint that was rate limited (optional).
        endpoint: Option<String>,
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// XRPC error from server.
    #[error("XRPC error: {error} - {message}")]
    Xrpc { error: String, message: String },

    /// The app view has no record of the requested entity.
    #[error("not found: {0}")]
    NotFound(String),
}

impl AtprotoError {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AtprotoError::Xrpc { error, .. } => TRANSIENT_XRPC_ERRORS.contains(&error.as_str()),
            AtprotoError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            AtprotoError::RateLimited { .. } => true,
            _ => false,
        }
    }

    /// Whether the error means the access token has expired.
    pub fn is_expired_token(&self) -> bool {
        matches!(self, AtprotoError::Xrpc { error, .. } if error == "ExpiredToken")
    }
}

/// Errors surfaced by an [`EntityService`](crate::EntityService).
///
/// Exhaustion of a feed is not an error at this boundary: a page without a
/// cursor is the terminal signal, and the pager turns it into its own
/// `Exhausted` variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Network or server failure; the caller may retry.
    #[error("transient network error: {0}")]
    Transient(String),

    /// The server rejected the requested state (e.g. a blocked relationship).
    #[error("rejected by server: {0}")]
    Conflict(String),

    /// The operation was abandoned because its owner went away.
    #[error("operation aborted")]
    Aborted,
}

impl From<AtprotoError> for ServiceError {
    fn from(err: AtprotoError) -> Self {
        if err.is_transient() {
            ServiceError::Transient(err.to_string())
        } else {
            ServiceError::Conflict(err.to_string())
        }
    }
}
