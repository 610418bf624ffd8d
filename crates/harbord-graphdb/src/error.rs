//! Error types for harbord-graphdb.

use std::path::PathBuf;

/// Result type alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised by the name graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The name is already bound to a different entity.
    #[error("name is not unique: {0}")]
    NonUniqueName(String),

    /// No entity is reachable at the given path.
    #[error("entity not found: {0}")]
    NotFound(String),

    /// The path cannot name an edge (empty, relative, or the root itself).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Reading or writing the backing file failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Backing file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The backing file does not hold a valid graph.
    #[error("corrupt graph store {}: {message}", path.display())]
    Corrupt {
        /// Backing file.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },
}

impl GraphError {
    /// Returns true if the error is a name collision.
    #[must_use]
    pub const fn is_non_unique_name(&self) -> bool {
        matches!(self, Self::NonUniqueName(_))
    }

    /// Returns true if the error reports a missing entity.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
