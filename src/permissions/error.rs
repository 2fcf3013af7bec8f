//! Error types for permission queries and the storage collaborator.

use std::fmt;
use std::sync::Arc;

use super::{Permissions, Snowflake};

/// The kind of resource a query referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Guild(Snowflake),
    Channel(Snowflake),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guild(id) => write!(f, "guild {id}"),
            Self::Channel(id) => write!(f, "channel {id}"),
        }
    }
}

/// Failure reported by a [`PermissionStore`](super::PermissionStore).
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("mongodb: {0}")]
    Mongo(Arc<mongodb::error::Error>),

    #[error("malformed {collection} document: {reason}")]
    Malformed {
        collection: &'static str,
        reason: String,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Mongo(Arc::new(err))
    }
}

/// Errors surfaced by the permission guard.
///
/// `Clone` so a single failed computation can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PermissionError {
    #[error("{0} not found")]
    NotFound(Resource),

    /// Upstream data is corrupt (e.g. a guild without a default role).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("missing permissions: {}", .required.names().join(", "))]
    PermissionDenied { required: Permissions },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The background computation panicked or was aborted.
    #[error("permission computation interrupted: {0}")]
    Interrupted(String),
}

impl From<tokio::task::JoinError> for PermissionError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Interrupted(err.to_string())
    }
}

impl PermissionError {
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
