//! Writable filesystem layers.
//!
//! Every container owns one read-write layer, created with the daemon's
//! graph driver and looked up again by container identifier at restore.
//! [`LayerStore`] is the seam between the daemon and the storage backend;
//! [`crate::layers::VfsLayerStore`] is the built-in implementation.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Kind of filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Existing path modified.
    Modify,
    /// Path added.
    Add,
    /// Path removed.
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Self::Modify => "C",
            Self::Add => "A",
            Self::Delete => "D",
        };
        f.write_str(c)
    }
}

/// One entry of a filesystem diff.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Change {
    /// Absolute path inside the container.
    pub path: PathBuf,
    /// What happened to it.
    pub kind: ChangeKind,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.path.display())
    }
}

/// A container's writable layer.
pub trait RwLayer: Send + Sync + fmt::Debug {
    /// Identifier of the owning container.
    fn id(&self) -> &str;

    /// Mounts the layer and returns its root. Mounts are reference counted.
    ///
    /// # Errors
    /// Returns an error if the backend cannot mount the layer.
    fn mount(&self, mount_label: &str) -> Result<PathBuf>;

    /// Drops one mount reference.
    ///
    /// # Errors
    /// Returns an error if the backend cannot unmount the layer.
    fn unmount(&self) -> Result<()>;

    /// Returns true if at least one mount reference is held.
    fn is_mounted(&self) -> bool;

    /// Lists changes relative to the parent image.
    ///
    /// # Errors
    /// Returns an error if the layer contents cannot be read.
    fn changes(&self) -> Result<Vec<Change>>;
}

/// Storage backend for writable layers.
pub trait LayerStore: Send + Sync {
    /// Graph driver name recorded on containers created through this store.
    fn driver_name(&self) -> &str;

    /// Creates the writable layer for container `id`.
    ///
    /// # Errors
    /// Returns an error if the layer already exists or cannot be created.
    fn create_rw_layer(&self, id: &str) -> Result<Arc<dyn RwLayer>>;

    /// Looks up the writable layer of container `id`.
    ///
    /// # Errors
    /// Returns an error if no such layer exists.
    fn get_rw_layer(&self, id: &str) -> Result<Arc<dyn RwLayer>>;

    /// Deletes the writable layer of container `id`.
    ///
    /// # Errors
    /// Returns an error if the layer is still mounted or cannot be removed.
    fn release_rw_layer(&self, id: &str) -> Result<()>;

    /// Releases backend resources at daemon shutdown.
    ///
    /// # Errors
    /// Returns an error if cleanup fails.
    fn cleanup(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_display() {
        let change = Change {
            path: PathBuf::from("/etc/hosts"),
            kind: ChangeKind::Add,
        };
        assert_eq!(change.to_string(), "A /etc/hosts");
        assert_eq!(ChangeKind::Modify.to_string(), "C");
        assert_eq!(ChangeKind::Delete.to_string(), "D");
    }
}
