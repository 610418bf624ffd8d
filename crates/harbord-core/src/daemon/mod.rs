//! The daemon context object.
//!
//! [`Daemon`] owns the container store, the ID index, the name graph and
//! the storage/execution collaborators. It is built once through
//! [`DaemonBuilder`] and shared as `Arc<Daemon>`; every operation goes
//! through it.
//!
//! Submodules:
//! - `register`: naming and registration of loaded containers
//! - `restore`: the boot-time load/reconcile/restart pass
//! - `lifecycle`: create, start, stop, remove and shutdown

mod lifecycle;
mod register;
mod restore;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use harbord_graphdb::Database;

use crate::config::DaemonConfig;
use crate::container::Container;
use crate::driver::ExecDriver;
use crate::error::{DaemonError, Result};
use crate::layer::{Change, LayerStore};
use crate::layers::VfsLayerStore;
use crate::store::ContainerStore;
use crate::truncindex::{IndexError, TruncIndex};
use crate::types::Signal;
use crate::volume::{LocalVolumes, VolumeStore};

pub use lifecycle::CreateOptions;
pub use register::{full_container_name, validate_id};

/// Builder for [`Daemon`].
///
/// Collaborators left unset default to [`VfsLayerStore`],
/// [`crate::drivers::NativeDriver`] and [`LocalVolumes`] under the
/// configured root.
pub struct DaemonBuilder {
    config: DaemonConfig,
    layers: Option<Arc<dyn LayerStore>>,
    driver: Option<Arc<dyn ExecDriver>>,
    volumes: Option<Arc<dyn VolumeStore>>,
}

impl DaemonBuilder {
    /// Starts a builder from `config`.
    #[must_use]
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            layers: None,
            driver: None,
            volumes: None,
        }
    }

    /// Uses `layers` as the layer store.
    #[must_use]
    pub fn with_layer_store(mut self, layers: Arc<dyn LayerStore>) -> Self {
        self.layers = Some(layers);
        self
    }

    /// Uses `driver` as the execution driver.
    #[must_use]
    pub fn with_exec_driver(mut self, driver: Arc<dyn ExecDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Uses `volumes` as the volume store.
    #[must_use]
    pub fn with_volume_store(mut self, volumes: Arc<dyn VolumeStore>) -> Self {
        self.volumes = Some(volumes);
        self
    }

    /// Validates the configuration and opens persistent state: the
    /// container repository first, then the name graph.
    ///
    /// # Errors
    /// Fatal errors only: invalid configuration, an unusable repository
    /// directory, or a name graph that cannot be opened.
    pub fn build(self) -> Result<Daemon> {
        let config = self.config;
        config.validate()?;

        let repository = config.repository();
        std::fs::create_dir_all(&repository).map_err(|source| DaemonError::Repository {
            path: repository.clone(),
            source,
        })?;

        let layers: Arc<dyn LayerStore> = match self.layers {
            Some(layers) => layers,
            None => {
                if config.graph_driver != crate::layers::VFS_DRIVER {
                    return Err(DaemonError::config(format!(
                        "graph driver {} requires an explicit layer store",
                        config.graph_driver
                    )));
                }
                Arc::new(VfsLayerStore::new(config.layers_root()).map_err(|e| {
                    DaemonError::config(format!("cannot open layer store: {e}"))
                })?)
            }
        };
        let driver = match self.driver {
            Some(driver) => driver,
            None => default_driver(&config)?,
        };
        let volumes: Arc<dyn VolumeStore> = match self.volumes {
            Some(volumes) => volumes,
            None => Arc::new(LocalVolumes::new(config.volumes_root()).map_err(|e| {
                DaemonError::config(format!("cannot open volume store: {e}"))
            })?),
        };

        let containers = ContainerStore::new();
        let id_index = TruncIndex::default();
        let graph = Database::open(config.graph_path()).map_err(DaemonError::GraphInit)?;

        tracing::info!(
            root = %config.root.display(),
            graph_driver = layers.driver_name(),
            exec_driver = driver.name(),
            "daemon initialized"
        );

        Ok(Daemon {
            config,
            repository,
            containers,
            id_index,
            graph,
            layers,
            driver,
            volumes,
            shutting_down: AtomicBool::new(false),
        })
    }
}

#[cfg(unix)]
fn default_driver(config: &DaemonConfig) -> Result<Arc<dyn ExecDriver>> {
    let driver = crate::drivers::NativeDriver::new(config.exec_root())
        .map_err(|e| DaemonError::config(format!("cannot open exec root: {e}")))?;
    Ok(Arc::new(driver))
}

#[cfg(not(unix))]
fn default_driver(_config: &DaemonConfig) -> Result<Arc<dyn ExecDriver>> {
    Err(DaemonError::config(
        "no default execution driver on this platform",
    ))
}

/// The container daemon.
pub struct Daemon {
    config: DaemonConfig,
    repository: PathBuf,
    containers: ContainerStore,
    id_index: TruncIndex,
    graph: Database,
    layers: Arc<dyn LayerStore>,
    driver: Arc<dyn ExecDriver>,
    volumes: Arc<dyn VolumeStore>,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("root", &self.config.root)
            .field("containers", &self.containers.len())
            .field("graph_driver", &self.layers.driver_name())
            .field("exec_driver", &self.driver.name())
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// Returns a builder for `config`.
    #[must_use]
    pub fn builder(config: DaemonConfig) -> DaemonBuilder {
        DaemonBuilder::new(config)
    }

    /// Builds a daemon with default collaborators and restores persisted
    /// containers.
    ///
    /// # Errors
    /// Returns fatal initialization errors only.
    pub async fn init(config: DaemonConfig) -> Result<Arc<Self>> {
        let daemon = Arc::new(Self::builder(config).build()?);
        daemon.restore().await?;
        Ok(daemon)
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Directory holding one subdirectory per container.
    #[must_use]
    pub fn repository(&self) -> &Path {
        &self.repository
    }

    /// Persisted name graph.
    #[must_use]
    pub fn graph(&self) -> &Database {
        &self.graph
    }

    /// Prefix index over registered identifiers.
    #[must_use]
    pub fn id_index(&self) -> &TruncIndex {
        &self.id_index
    }

    /// Graph driver of the layer store in use.
    #[must_use]
    pub fn graph_driver_name(&self) -> &str {
        self.layers.driver_name()
    }

    /// Returns true once [`Daemon::shutdown`] has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Every registered container, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Container>> {
        self.containers.list()
    }

    /// Resolves `token` to a container.
    ///
    /// Tries, in order: an exact identifier, an exact name, then a unique
    /// identifier prefix.
    ///
    /// # Errors
    /// - [`DaemonError::NoSuchContainer`] if nothing matches.
    /// - [`DaemonError::AmbiguousPrefix`] if the prefix matches several
    ///   identifiers.
    pub fn get_container(&self, token: &str) -> Result<Arc<Container>> {
        if token.is_empty() {
            return Err(DaemonError::NoSuchContainer(String::new()));
        }
        if let Some(container) = self.containers.get(token) {
            return Ok(container);
        }
        if let Ok(container) = self.get_by_name(token) {
            return Ok(container);
        }
        match self.id_index.get(token) {
            Ok(id) => self
                .containers
                .get(&id)
                .ok_or_else(|| DaemonError::NoSuchContainer(token.to_string())),
            Err(IndexError::Ambiguous(_)) => Err(DaemonError::AmbiguousPrefix(token.to_string())),
            Err(_) => Err(DaemonError::NoSuchContainer(token.to_string())),
        }
    }

    /// Resolves an exact name, with or without the leading `/`.
    ///
    /// # Errors
    /// Returns [`DaemonError::NoSuchContainer`] if the name is unbound or
    /// bound to an unregistered container.
    pub fn get_by_name(&self, name: &str) -> Result<Arc<Container>> {
        let full = full_container_name(name)?;
        let entity = self
            .graph
            .get(&full)
            .ok_or_else(|| DaemonError::NoSuchContainer(name.to_string()))?;
        self.containers
            .get(entity.id())
            .ok_or_else(|| DaemonError::NoSuchContainer(entity.id().to_string()))
    }

    /// Returns true if `token` resolves to a container.
    #[must_use]
    pub fn exists(&self, token: &str) -> bool {
        self.get_container(token).is_ok()
    }

    /// Returns true if the container `token` resolves to is paused.
    ///
    /// # Errors
    /// Returns a lookup error if `token` does not resolve.
    pub fn is_paused(&self, token: &str) -> Result<bool> {
        Ok(self.get_container(token)?.is_paused())
    }

    /// Containers linked directly under `name`, keyed by link path.
    ///
    /// # Errors
    /// Fails if `name` is unknown or a link target is not registered.
    pub fn children(&self, name: &str) -> Result<BTreeMap<String, Arc<Container>>> {
        let full = full_container_name(name)?;
        let mut children = BTreeMap::new();
        self.graph.walk(&full, Some(0), |path, entity| {
            let child = self.get_container(entity.id())?;
            children.insert(path.to_string(), child);
            Ok::<(), DaemonError>(())
        })?;
        Ok(children)
    }

    /// Names of the containers that link to `name`.
    ///
    /// # Errors
    /// Fails if `name` is unknown.
    pub fn parents(&self, name: &str) -> Result<Vec<String>> {
        let full = full_container_name(name)?;
        Ok(self.graph.parents(&full)?)
    }

    /// Links `child` under `parent` as `alias`. Existing links are kept.
    ///
    /// # Errors
    /// Fails if the link cannot be written to the graph.
    pub fn register_link(&self, parent: &Container, child: &Container, alias: &str) -> Result<()> {
        let alias = alias.trim_matches('/');
        if !crate::names::is_valid_name(alias) {
            return Err(DaemonError::InvalidName(alias.to_string()));
        }
        let full = format!("{}/{alias}", parent.name());
        if !self.graph.exists(&full) {
            self.graph.set(&full, child.id().as_str())?;
            tracing::debug!(link = %full, child = %child.id(), "registered link");
        }
        Ok(())
    }

    /// Mounts the container's writable layer and records the mount path.
    ///
    /// # Errors
    /// Fails if the container has no layer, the mount fails, or the layer
    /// comes back at a different path than before.
    pub fn mount(&self, container: &Container) -> Result<PathBuf> {
        let layer = container.rw_layer().ok_or_else(|| {
            DaemonError::layer(format!("container {} has no writable layer", container.id()))
        })?;
        let dir = layer.mount("")?;
        tracing::debug!(id = %container.id(), path = %dir.display(), "container mounted");

        if let Some(previous) = container.base_fs() {
            if previous != dir {
                self.unmount(container);
                return Err(DaemonError::layer(format!(
                    "driver {} is returning inconsistent paths for container {} ({} then {})",
                    self.graph_driver_name(),
                    container.id(),
                    previous.display(),
                    dir.display()
                )));
            }
        }
        container.set_base_fs(Some(dir.clone()));
        Ok(dir)
    }

    /// Releases one mount of the container's writable layer. Errors are
    /// logged.
    pub fn unmount(&self, container: &Container) {
        let Some(layer) = container.rw_layer() else {
            return;
        };
        if let Err(e) = layer.unmount() {
            tracing::error!(id = %container.id(), error = %e, "error unmounting container");
        }
    }

    /// Filesystem changes in the container's writable layer.
    ///
    /// # Errors
    /// Fails if the container has no layer or the layer cannot be read.
    pub fn changes(&self, container: &Container) -> Result<Vec<Change>> {
        let layer = container.rw_layer().ok_or_else(|| {
            DaemonError::layer(format!("container {} has no writable layer", container.id()))
        })?;
        layer.changes()
    }

    /// Sends `signal` to the container's process.
    ///
    /// # Errors
    /// Fails if the container is not running or delivery fails.
    pub async fn kill(&self, container: &Container, signal: Signal) -> Result<()> {
        if !container.is_running() {
            return Err(DaemonError::state(format!(
                "container {} is not running",
                container.id()
            )));
        }
        self.driver.kill(container.id(), signal).await
    }
}
