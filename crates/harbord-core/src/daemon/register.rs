//! Naming and registration.

use std::sync::Arc;

use crate::container::Container;
use crate::error::{DaemonError, Result};
use crate::names::{self, is_valid_name};
use crate::types::{ABNORMAL_EXIT_CODE, ContainerId, ExitStatus, truncate_id};

use super::Daemon;

/// Random names tried before falling back to the truncated identifier.
const NAME_ATTEMPTS: u32 = 6;

/// Returns `name` with a leading `/`.
///
/// # Errors
/// Returns [`DaemonError::EmptyName`] for an empty name.
pub fn full_container_name(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(DaemonError::EmptyName);
    }
    if name.starts_with('/') {
        Ok(name.to_string())
    } else {
        Ok(format!("/{name}"))
    }
}

/// Rejects empty identifiers.
///
/// # Errors
/// Returns [`DaemonError::EmptyId`] for an empty identifier.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(DaemonError::EmptyId);
    }
    Ok(())
}

impl Daemon {
    /// Makes a loaded container live: resolvable through the store and the
    /// ID index, crash-recovered if it claims to be running, and with its
    /// named volumes prepared. On failure the container is left
    /// unregistered.
    ///
    /// # Errors
    /// - [`DaemonError::AlreadyLoaded`] if the identifier is registered.
    /// - Volume errors from preparing mount points.
    pub async fn register(&self, container: Arc<Container>) -> Result<()> {
        let id = container.id().clone();
        validate_id(id.as_str())?;
        if !self.containers.add_if_absent(Arc::clone(&container)) {
            return Err(DaemonError::AlreadyLoaded(id.to_string()));
        }

        container.setup_stdio();
        if let Err(e) = self.id_index.add(id.as_str()) {
            self.containers.delete(id.as_str());
            return Err(e.into());
        }

        if container.is_running() {
            self.recover_crashed(&container).await;
        }

        if let Err(e) = self.prepare_mount_points(&container) {
            self.containers.delete(id.as_str());
            let _ = self.id_index.delete(id.as_str());
            return Err(e);
        }
        Ok(())
    }

    /// Marks a container that was running when the daemon died as killed
    /// and releases what it held. Failures are logged.
    async fn recover_crashed(&self, container: &Container) {
        let id = container.id();
        tracing::debug!(id = %id, "killing old running container");
        container.set_stopped(&ExitStatus::code(ABNORMAL_EXIT_CODE));

        if let Err(e) = self.driver.terminate(id).await {
            tracing::warn!(id = %id, error = %e, "failed to terminate leftover process");
        }
        if let Err(e) = container.unmount_ipc_mounts() {
            tracing::warn!(id = %id, error = %e, "failed to unmount ipc mounts");
        }
        self.unmount(container);
        if let Err(e) = container.to_disk() {
            tracing::error!(id = %id, error = %e, "error saving stopped state to disk");
        }
    }

    fn prepare_mount_points(&self, container: &Container) -> Result<()> {
        let named: Vec<(String, String)> = container
            .record()
            .mount_points
            .into_iter()
            .filter(|(_, mp)| mp.is_named())
            .map(|(dest, mp)| (dest, mp.name))
            .collect();

        for (dest, name) in named {
            let source = self.volumes.get_with_ref(&name, container.id().as_str())?;
            container.update(|record| {
                if let Some(mp) = record.mount_points.get_mut(&dest) {
                    mp.source = source;
                }
            });
        }
        Ok(())
    }

    /// Binds `name` to `id` in the name graph and returns it with a leading
    /// `/`.
    ///
    /// # Errors
    /// - [`DaemonError::InvalidName`] if the name has disallowed characters.
    /// - [`DaemonError::NameConflict`] if another container owns the name.
    pub fn reserve_name(&self, id: &str, name: &str) -> Result<String> {
        let bare = name.strip_prefix('/').unwrap_or(name);
        if !is_valid_name(bare) {
            return Err(DaemonError::InvalidName(name.to_string()));
        }
        let full = format!("/{bare}");

        match self.graph.set(&full, id) {
            Ok(_) => Ok(full),
            Err(e) if e.is_non_unique_name() => {
                let owner = self
                    .graph
                    .get(&full)
                    .map(|entity| truncate_id(entity.id()).to_string())
                    .unwrap_or_default();
                Err(DaemonError::NameConflict {
                    name: bare.to_string(),
                    owner,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Binds a random name to `id`, falling back to the truncated
    /// identifier when every random attempt collides.
    ///
    /// # Errors
    /// Fails on graph errors other than collisions, or if the fallback name
    /// is taken too.
    pub fn generate_new_name(&self, id: &str) -> Result<String> {
        self.generate_new_name_with(id, names::random_name)
    }

    pub(crate) fn generate_new_name_with(
        &self,
        id: &str,
        mut generate: impl FnMut(u32) -> String,
    ) -> Result<String> {
        for attempt in 0..NAME_ATTEMPTS {
            let name = full_container_name(&generate(attempt))?;
            match self.graph.set(&name, id) {
                Ok(_) => return Ok(name),
                Err(e) if e.is_non_unique_name() => {
                    tracing::trace!(id = %id, name = %name, "generated name taken");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let name = format!("/{}", truncate_id(id));
        self.graph.set(&name, id)?;
        Ok(name)
    }

    /// Allocates a fresh identifier and binds `name` to it, or a generated
    /// name when `name` is empty.
    ///
    /// # Errors
    /// Propagates naming errors.
    pub fn generate_id_and_name(&self, name: &str) -> Result<(ContainerId, String)> {
        let id = ContainerId::generate();
        let name = if name.is_empty() {
            self.generate_new_name(id.as_str())?
        } else {
            self.reserve_name(id.as_str(), name)?
        };
        Ok((id, name))
    }

    /// Gives an unnamed container a generated name and persists it. Save
    /// failures are logged.
    pub(crate) fn register_name(&self, container: &Container) -> Result<()> {
        validate_id(container.id().as_str())?;
        if self.containers.contains(container.id().as_str()) {
            return Err(DaemonError::AlreadyLoaded(container.id().to_string()));
        }
        let name = self.generate_new_name(container.id().as_str())?;
        container.set_name(name);
        if let Err(e) = container.to_disk() {
            tracing::error!(id = %container.id(), error = %e, "error saving container name to disk");
        }
        Ok(())
    }
}
