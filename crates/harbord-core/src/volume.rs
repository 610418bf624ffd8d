//! Named volumes.
//!
//! Containers declare named volumes in their mount points; registration
//! resolves each name to a host directory and records a reference so the
//! volume cannot be removed while a container uses it.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::error::{DaemonError, Result};
use crate::names::is_valid_name;

/// Store of named volumes.
pub trait VolumeStore: Send + Sync {
    /// Returns the host path of volume `name`, creating it if needed, and
    /// records that `container` references it.
    ///
    /// # Errors
    /// Returns an error if the name is invalid or the volume cannot be
    /// created.
    fn get_with_ref(&self, name: &str, container: &str) -> Result<PathBuf>;

    /// Drops the reference `container` holds on `name`.
    fn dereference(&self, name: &str, container: &str);

    /// Removes volume `name`.
    ///
    /// # Errors
    /// Returns an error if the volume is referenced or cannot be deleted.
    fn remove(&self, name: &str) -> Result<()>;
}

/// Volumes stored as `<root>/<name>/_data`.
#[derive(Debug)]
pub struct LocalVolumes {
    root: PathBuf,
    refs: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl LocalVolumes {
    /// Opens the volume root, creating it if needed.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            refs: Mutex::new(HashMap::new()),
        })
    }

    /// Host path of volume `name`.
    #[must_use]
    pub fn data_path(&self, name: &str) -> PathBuf {
        self.root.join(name).join("_data")
    }

    /// Names of every volume on disk.
    ///
    /// # Errors
    /// Returns an error if the volume root cannot be read.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Containers referencing `name`.
    #[must_use]
    pub fn references(&self, name: &str) -> Vec<String> {
        self.refs
            .lock()
            .get(name)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl VolumeStore for LocalVolumes {
    fn get_with_ref(&self, name: &str, container: &str) -> Result<PathBuf> {
        if !is_valid_name(name) {
            return Err(DaemonError::volume(format!("invalid volume name {name:?}")));
        }
        let path = self.data_path(name);
        std::fs::create_dir_all(&path)
            .map_err(|e| DaemonError::volume(format!("create {}: {e}", path.display())))?;
        self.refs
            .lock()
            .entry(name.to_string())
            .or_default()
            .insert(container.to_string());
        Ok(path)
    }

    fn dereference(&self, name: &str, container: &str) {
        let mut refs = self.refs.lock();
        if let Some(holders) = refs.get_mut(name) {
            holders.remove(container);
            if holders.is_empty() {
                refs.remove(name);
            }
        }
    }

    fn remove(&self, name: &str) -> Result<()> {
        let holders = self.references(name);
        if !holders.is_empty() {
            return Err(DaemonError::volume(format!(
                "volume {name} is in use by {}",
                holders.join(", ")
            )));
        }
        let dir = self.root.join(name);
        if !dir.exists() {
            return Err(DaemonError::volume(format!("no such volume: {name}")));
        }
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
