//! Error types for mule-core

use thiserror::Error;

/// Result type alias using mule-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mule-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote unreachable or the call never completed
    #[error("Remote unreachable: {0}")]
    Connectivity(String),

    /// Entity type or field unknown to the remote, or a read the remote refused
    #[error("Schema error for {entity_type}: {message}")]
    Schema {
        entity_type: String,
        message: String,
    },

    /// Remote rejected a queued mutation
    #[error("Remote rejected mutation: {0}")]
    Apply(String),

    /// Record or row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Build a schema error for the given entity type
    pub fn schema(entity_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            entity_type: entity_type.into(),
            message: message.into(),
        }
    }

    /// Whether this error means the remote could not be reached at all
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}
