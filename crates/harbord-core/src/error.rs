//! Error types for harbord-core.
//!
//! Errors fall into four classes: lookups that match nothing, conflicts
//! (duplicate names, double registration), per-container load and recovery
//! failures, and fatal startup failures. Only the last class aborts daemon
//! initialization; the restore pass logs and skips everything else.

use std::path::PathBuf;
use std::time::Duration;

use harbord_graphdb::GraphError;

use crate::truncindex::IndexError;

/// Result type alias for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Error type for daemon operations.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// No container matches the lookup token.
    #[error("no such container: {0}")]
    NoSuchContainer(String),

    /// A short-ID prefix matches more than one container.
    #[error("multiple containers match prefix {0}")]
    AmbiguousPrefix(String),

    /// The container identifier is already registered.
    #[error("container {0} is already loaded")]
    AlreadyLoaded(String),

    /// The container identifier is empty.
    #[error("invalid empty container id")]
    EmptyId,

    /// The container name is empty.
    #[error("container name cannot be empty")]
    EmptyName,

    /// The container name contains characters outside the allowed set.
    #[error("invalid container name ({0}), only [a-zA-Z0-9][a-zA-Z0-9_.-] are allowed")]
    InvalidName(String),

    /// The name is bound to another container.
    #[error(
        "conflict: the name {name:?} is already in use by container {owner}, remove or rename that container to reuse the name"
    )]
    NameConflict {
        /// Requested name without the leading slash.
        name: String,
        /// Truncated identifier of the current owner.
        owner: String,
    },

    /// The persisted record of a container cannot be read.
    #[error("failed to load container {id}: {reason}")]
    Load {
        /// Directory name the record was read from.
        id: String,
        /// What went wrong.
        reason: String,
    },

    /// The persisted record carries a different identifier than its directory.
    #[error("container {stored} is stored at {dir}")]
    IdMismatch {
        /// Identifier found in the record.
        stored: String,
        /// Directory the record lives in.
        dir: String,
    },

    /// Writable layer error.
    #[error("layer error: {0}")]
    Layer(String),

    /// Execution driver error.
    #[error("execution driver error: {0}")]
    Driver(String),

    /// Volume error.
    #[error("volume error: {0}")]
    Volume(String),

    /// Invalid state for the requested operation.
    #[error("invalid state: {0}")]
    State(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The container repository cannot be created or enumerated.
    #[error("container repository {}: {source}", path.display())]
    Repository {
        /// Repository directory.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The name graph storage cannot be opened.
    #[error("cannot open name graph: {0}")]
    GraphInit(#[source] GraphError),

    /// Name graph error.
    #[error("name graph error: {0}")]
    Graph(#[from] GraphError),

    /// ID index error.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Waiting for a container timed out.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The daemon is shutting down.
    #[error("daemon is shutting down")]
    ShuttingDown,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DaemonError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a layer error.
    #[must_use]
    pub fn layer(msg: impl Into<String>) -> Self {
        Self::Layer(msg.into())
    }

    /// Creates an execution driver error.
    #[must_use]
    pub fn driver(msg: impl Into<String>) -> Self {
        Self::Driver(msg.into())
    }

    /// Creates a volume error.
    #[must_use]
    pub fn volume(msg: impl Into<String>) -> Self {
        Self::Volume(msg.into())
    }

    /// Creates an invalid state error.
    #[must_use]
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Creates a load error for the container stored under `id`.
    #[must_use]
    pub fn load(id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Load {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if the error means nothing matched a lookup.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NoSuchContainer(_) | Self::Index(IndexError::NotFound(_))
        )
    }

    /// Returns true if the error is a naming or registration conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::AlreadyLoaded(_) | Self::NameConflict { .. } | Self::AmbiguousPrefix(_) => true,
            Self::Graph(e) => e.is_non_unique_name(),
            Self::Index(e) => matches!(e, IndexError::Ambiguous(_) | IndexError::Duplicate(_)),
            _ => false,
        }
    }

    /// Returns true if the error must abort daemon startup.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Repository { .. } | Self::GraphInit(_)
        )
    }
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
