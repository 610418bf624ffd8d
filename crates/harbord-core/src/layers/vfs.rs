//! Directory-backed writable layers.
//!
//! Each layer is a plain directory `<root>/dir/<id>`. Mounting hands out
//! that directory and counts references; nothing is mounted in the kernel.
//! With no parent image, every path in the layer is reported as added.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use walkdir::WalkDir;

use crate::error::{DaemonError, Result};
use crate::layer::{Change, ChangeKind, LayerStore, RwLayer};

/// Driver name recorded on containers.
pub const DRIVER_NAME: &str = "vfs";

/// A directory-backed writable layer.
#[derive(Debug)]
pub struct VfsLayer {
    id: String,
    path: PathBuf,
    mounts: AtomicUsize,
}

impl VfsLayer {
    /// Layer directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current mount reference count.
    #[must_use]
    pub fn mount_count(&self) -> usize {
        self.mounts.load(Ordering::SeqCst)
    }
}

impl RwLayer for VfsLayer {
    fn id(&self) -> &str {
        &self.id
    }

    fn mount(&self, _mount_label: &str) -> Result<PathBuf> {
        if !self.path.is_dir() {
            return Err(DaemonError::layer(format!(
                "layer directory {} is missing",
                self.path.display()
            )));
        }
        self.mounts.fetch_add(1, Ordering::SeqCst);
        Ok(self.path.clone())
    }

    fn unmount(&self) -> Result<()> {
        // Unmounting an unmounted layer is a no-op.
        let _ = self
            .mounts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        Ok(())
    }

    fn is_mounted(&self) -> bool {
        self.mount_count() > 0
    }

    fn changes(&self) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        for entry in WalkDir::new(&self.path).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| DaemonError::layer(format!("walk {}: {e}", self.path.display())))?;
            let rel = entry
                .path()
                .strip_prefix(&self.path)
                .map_err(|e| DaemonError::layer(e.to_string()))?;
            changes.push(Change {
                path: Path::new("/").join(rel),
                kind: ChangeKind::Add,
            });
        }
        Ok(changes)
    }
}

/// Layer store keeping one directory per container.
#[derive(Debug)]
pub struct VfsLayerStore {
    root: PathBuf,
    layers: Mutex<HashMap<String, Arc<VfsLayer>>>,
}

impl VfsLayerStore {
    /// Opens a store rooted at `root`, creating it if needed.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("dir"))?;
        Ok(Self {
            root,
            layers: Mutex::new(HashMap::new()),
        })
    }

    fn layer_path(&self, id: &str) -> PathBuf {
        self.root.join("dir").join(id)
    }

    fn handle(&self, id: &str) -> Arc<VfsLayer> {
        let mut layers = self.layers.lock();
        Arc::clone(layers.entry(id.to_string()).or_insert_with(|| {
            Arc::new(VfsLayer {
                id: id.to_string(),
                path: self.layer_path(id),
                mounts: AtomicUsize::new(0),
            })
        }))
    }
}

impl LayerStore for VfsLayerStore {
    fn driver_name(&self) -> &str {
        DRIVER_NAME
    }

    fn create_rw_layer(&self, id: &str) -> Result<Arc<dyn RwLayer>> {
        let path = self.layer_path(id);
        if path.exists() {
            return Err(DaemonError::layer(format!("layer {id} already exists")));
        }
        std::fs::create_dir_all(&path)?;
        tracing::debug!(id = %id, path = %path.display(), "created writable layer");
        Ok(self.handle(id))
    }

    fn get_rw_layer(&self, id: &str) -> Result<Arc<dyn RwLayer>> {
        if !self.layer_path(id).is_dir() {
            return Err(DaemonError::layer(format!("no writable layer for {id}")));
        }
        Ok(self.handle(id))
    }

    fn release_rw_layer(&self, id: &str) -> Result<()> {
        if let Some(layer) = self.layers.lock().get(id) {
            if layer.is_mounted() {
                return Err(DaemonError::layer(format!("layer {id} is still mounted")));
            }
        }
        let path = self.layer_path(id);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        self.layers.lock().remove(id);
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        let layers = self.layers.lock();
        let mounted = layers.values().filter(|l| l.is_mounted()).count();
        if mounted > 0 {
            tracing::warn!(mounted, "layer store cleanup with layers still mounted");
        }
        for layer in layers.values() {
            layer.mounts.store(0, Ordering::SeqCst);
        }
        Ok(())
    }
}
