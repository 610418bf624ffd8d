//! Container lifecycle: create, start, stop, pause, remove and daemon
//! shutdown.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};

use crate::container::{Container, ContainerConfig, ContainerRecord, HostConfig, MountPoint};
use crate::driver::{Command, Hooks, Pipes};
use crate::error::{DaemonError, Result};
use crate::types::{ContainerId, ExitStatus, Signal};

use super::Daemon;

/// Parameters of [`Daemon::create_container`].
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Requested name; empty for a generated one.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Entrypoint; its first element is the executable.
    pub entrypoint: Vec<String>,
    /// Command, appended to the entrypoint or run on its own.
    pub cmd: Vec<String>,
    /// Process configuration.
    pub config: ContainerConfig,
    /// Host configuration, including links as `name:alias`.
    pub host_config: HostConfig,
    /// Declared mounts.
    pub mounts: Vec<MountPoint>,
}

impl CreateOptions {
    /// Options running `cmd`.
    #[must_use]
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the host configuration.
    #[must_use]
    pub fn with_host_config(mut self, host_config: HostConfig) -> Self {
        self.host_config = host_config;
        self
    }

    /// Adds a mount.
    #[must_use]
    pub fn with_mount(mut self, mount: MountPoint) -> Self {
        self.mounts.push(mount);
        self
    }
}

/// Splits entrypoint and command into executable and arguments.
fn entrypoint_and_args(entrypoint: &[String], cmd: &[String]) -> Result<(String, Vec<String>)> {
    match (entrypoint.split_first(), cmd.split_first()) {
        (Some((path, rest)), _) => Ok((
            path.clone(),
            rest.iter().chain(cmd).cloned().collect(),
        )),
        (None, Some((path, rest))) => Ok((path.clone(), rest.to_vec())),
        (None, None) => Err(DaemonError::config("no command specified")),
    }
}

impl Daemon {
    /// Creates, persists and registers a new container.
    ///
    /// # Errors
    /// Fails on naming conflicts, layer creation errors, unknown link
    /// targets or registration errors. Partial state is rolled back.
    pub async fn create_container(&self, opts: CreateOptions) -> Result<Arc<Container>> {
        if self.is_shutting_down() {
            return Err(DaemonError::ShuttingDown);
        }
        let (path, args) = entrypoint_and_args(&opts.entrypoint, &opts.cmd)?;
        let (id, name) = self.generate_id_and_name(&opts.name)?;

        match self.create_with(&id, name, path, args, opts).await {
            Ok(container) => Ok(container),
            Err(e) => {
                self.rollback_create(&id);
                Err(e)
            }
        }
    }

    async fn create_with(
        &self,
        id: &ContainerId,
        name: String,
        path: String,
        args: Vec<String>,
        opts: CreateOptions,
    ) -> Result<Arc<Container>> {
        let mut record = ContainerRecord::new(id.clone(), self.graph_driver_name());
        record.name = name;
        record.image = opts.image;
        record.path = path;
        record.args = args;
        record.config = opts.config;
        if record.config.hostname.is_empty() {
            record.config.hostname = id.truncate().to_string();
        }
        record.host_config = opts.host_config;
        record.mount_points = opts
            .mounts
            .into_iter()
            .map(|mp| (mp.destination.to_string_lossy().into_owned(), mp))
            .collect();
        let links = record.host_config.links.clone();

        let container = Arc::new(Container::new(self.repository.join(id.as_str()), record));
        container.set_rw_layer(self.layers.create_rw_layer(id.as_str())?);
        container.to_disk()?;
        self.register(Arc::clone(&container)).await?;

        for link in &links {
            let (target, alias) = link.split_once(':').unwrap_or((link.as_str(), link.as_str()));
            let child = self.get_container(target)?;
            self.register_link(&container, &child, alias)?;
        }

        tracing::info!(id = %id, name = %container.name(), "created container");
        Ok(container)
    }

    fn rollback_create(&self, id: &ContainerId) {
        if let Some(container) = self.containers.delete(id.as_str()) {
            let _ = self.id_index.delete(id.as_str());
            for mp in container.mount_points().iter().filter(|mp| mp.is_named()) {
                self.volumes.dereference(&mp.name, id.as_str());
            }
        }
        if let Err(e) = self.graph.purge(id.as_str()) {
            tracing::warn!(id = %id, error = %e, "failed to release name");
        }
        if let Err(e) = self.layers.release_rw_layer(id.as_str()) {
            tracing::debug!(id = %id, error = %e, "no layer to release");
        }
        let root = self.repository.join(id.as_str());
        if root.exists() {
            if let Err(e) = std::fs::remove_dir_all(&root) {
                tracing::warn!(id = %id, error = %e, "failed to remove container directory");
            }
        }
    }

    /// Starts the container's process and returns once it is running.
    ///
    /// The process is supervised by a background task that records its
    /// exit, unmounts the layer and persists the final state.
    ///
    /// # Errors
    /// Fails if the daemon is shutting down, the container is dead, its
    /// layer cannot be mounted, or the driver cannot start the process.
    pub async fn start_container(&self, container: &Arc<Container>) -> Result<()> {
        if self.is_shutting_down() {
            return Err(DaemonError::ShuttingDown);
        }
        let _starting = container.lock_start().await;
        if container.is_running() {
            return Ok(());
        }
        if container.state().dead {
            return Err(DaemonError::state(format!(
                "container {} is marked for removal and cannot be started",
                container.id()
            )));
        }

        let rootfs = self.mount(container)?;
        let cmd = Command::for_container(container, rootfs);
        let pipes = Pipes {
            stdin: container.take_stdin_reader(),
            log_path: Some(container.log_path()),
        };
        let (started_tx, started_rx) = oneshot::channel();
        let hooks = Hooks::on_start(move |pid| {
            let _ = started_tx.send(pid);
        });

        let driver = Arc::clone(&self.driver);
        let run = tokio::spawn(async move { driver.run(cmd, pipes, hooks).await });

        if let Ok(pid) = started_rx.await {
            container.update(|record| {
                record.state.set_running(pid);
                record.state.has_been_manually_stopped = false;
            });
            container.notify_state();
            if let Err(e) = container.to_disk() {
                tracing::error!(id = %container.id(), error = %e, "error saving running state to disk");
            }
            tracing::info!(id = %container.id(), pid, "container started");
            tokio::spawn(monitor(Arc::clone(container), run));
            return Ok(());
        }

        // The start hook was dropped unfired: the process never came up.
        let err = match run.await {
            Ok(Err(e)) => e,
            Ok(Ok(exit)) => DaemonError::driver(format!(
                "process exited with code {} before starting",
                exit.exit_code
            )),
            Err(e) => DaemonError::driver(format!("run task failed: {e}")),
        };
        container.update(|record| record.state.error = err.to_string());
        self.unmount(container);
        if let Err(e) = container.to_disk() {
            tracing::error!(id = %container.id(), error = %e, "error saving start error to disk");
        }
        Err(err)
    }

    /// Stops the container at the user's request: SIGTERM, up to `grace`
    /// for it to exit, then SIGKILL.
    ///
    /// # Errors
    /// Fails if waiting for the exit fails.
    pub async fn stop_container(&self, container: &Container, grace: Duration) -> Result<()> {
        if !container.is_running() {
            return Ok(());
        }
        container.update(|record| record.state.has_been_manually_stopped = true);
        self.stop_with_grace(container, grace).await
    }

    async fn stop_with_grace(&self, container: &Container, grace: Duration) -> Result<()> {
        if !container.is_running() {
            return Ok(());
        }
        let id = container.id();
        if let Err(e) = self.kill(container, Signal::Term).await {
            tracing::warn!(id = %id, error = %e, "failed to send SIGTERM");
        }
        if container.wait_stop(Some(grace)).await.is_err() {
            tracing::info!(id = %id, ?grace, "container did not stop in time, sending SIGKILL");
            if let Err(e) = self.kill(container, Signal::Kill).await {
                tracing::warn!(id = %id, error = %e, "failed to send SIGKILL");
            }
            container.wait_stop(None).await?;
        }
        Ok(())
    }

    /// Freezes the container.
    ///
    /// # Errors
    /// Fails if the container is not running, already paused, or the driver
    /// refuses.
    pub async fn pause(&self, container: &Container) -> Result<()> {
        if !container.is_running() {
            return Err(DaemonError::state(format!(
                "container {} is not running",
                container.id()
            )));
        }
        if container.is_paused() {
            return Err(DaemonError::state(format!(
                "container {} is already paused",
                container.id()
            )));
        }
        self.driver.pause(container.id()).await?;
        container.set_paused(true);
        if let Err(e) = container.to_disk() {
            tracing::error!(id = %container.id(), error = %e, "error saving paused state to disk");
        }
        Ok(())
    }

    /// Thaws the container.
    ///
    /// # Errors
    /// Fails if the container is not paused or the driver refuses.
    pub async fn unpause(&self, container: &Container) -> Result<()> {
        if !container.is_paused() {
            return Err(DaemonError::state(format!(
                "container {} is not paused",
                container.id()
            )));
        }
        self.driver.unpause(container.id()).await?;
        container.set_paused(false);
        if let Err(e) = container.to_disk() {
            tracing::error!(id = %container.id(), error = %e, "error saving unpaused state to disk");
        }
        Ok(())
    }

    /// Removes a stopped container: its layer, names, links, volume
    /// references and directory.
    ///
    /// # Errors
    /// Fails if the container is running or its layer cannot be released.
    /// A failed layer release marks the container dead.
    pub async fn remove_container(&self, token: &str) -> Result<()> {
        let container = self.get_container(token)?;
        if container.is_running() {
            return Err(DaemonError::state(format!(
                "cannot remove running container {}, stop it first",
                container.id()
            )));
        }
        let id = container.id().clone();

        if let Err(e) = self.layers.release_rw_layer(id.as_str()) {
            container.update(|record| record.state.dead = true);
            if let Err(save) = container.to_disk() {
                tracing::error!(id = %id, error = %save, "error saving dead state to disk");
            }
            return Err(DaemonError::layer(format!(
                "driver {} failed to remove root filesystem of {id}: {e}",
                self.graph_driver_name()
            )));
        }

        if let Err(e) = self.graph.purge(id.as_str()) {
            tracing::error!(id = %id, error = %e, "failed to remove names");
        }
        self.containers.delete(id.as_str());
        let _ = self.id_index.delete(id.as_str());
        for mp in container.mount_points().iter().filter(|mp| mp.is_named()) {
            self.volumes.dereference(&mp.name, id.as_str());
        }
        std::fs::remove_dir_all(container.root())?;

        tracing::info!(id = %id, "removed container");
        Ok(())
    }

    /// Stops every running container, then flushes the name graph and
    /// cleans up the layer store. Per-container failures are logged.
    ///
    /// # Errors
    /// Currently always returns `Ok`.
    pub async fn shutdown(self: &Arc<Self>) -> Result<()> {
        self.shutting_down.store(true, Ordering::SeqCst);
        let grace = self.config.shutdown_timeout;

        tracing::debug!("starting clean shutdown of all containers");
        let mut stops = JoinSet::new();
        for container in self.list() {
            if !container.is_running() {
                continue;
            }
            tracing::debug!(id = %container.id(), "stopping container");
            let daemon = Arc::clone(self);
            stops.spawn(async move {
                match daemon.shutdown_container(&container, grace).await {
                    Ok(()) => tracing::debug!(id = %container.id(), "container stopped"),
                    Err(e) => tracing::error!(id = %container.id(), error = %e, "stop container error"),
                }
            });
        }
        while let Some(joined) = stops.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "stop task failed");
            }
        }

        if let Err(e) = self.graph.close() {
            tracing::error!(error = %e, "error closing name graph");
        }
        if let Err(e) = self.layers.cleanup() {
            tracing::error!(error = %e, "error cleaning up layer store");
        }
        tracing::info!("daemon shut down");
        Ok(())
    }

    /// Stops one container during shutdown. A paused container gets
    /// SIGTERM before it is thawed so it exits as soon as it runs.
    async fn shutdown_container(&self, container: &Container, grace: Duration) -> Result<()> {
        let id = container.id();
        if container.is_paused() {
            tracing::debug!(id = %id, "container is paused, sending SIGTERM before unpausing");
            self.kill(container, Signal::Term).await?;
            self.unpause(container).await?;
            if container.wait_stop(Some(grace)).await.is_err() {
                tracing::debug!(id = %id, ?grace, "container did not exit after SIGTERM, sending SIGKILL");
                if let Err(e) = self.kill(container, Signal::Kill).await {
                    tracing::error!(id = %id, error = %e, "failed to SIGKILL container");
                }
                container.wait_stop(None).await?;
                return Err(DaemonError::Timeout(grace));
            }
        }

        self.stop_with_grace(container, grace).await?;
        container.wait_stop(None).await?;
        Ok(())
    }
}

/// Waits for the process to exit, then records the exit, releases the
/// mount and persists the final state before waking waiters.
async fn monitor(container: Arc<Container>, run: JoinHandle<Result<ExitStatus>>) {
    let id = container.id().clone();
    let exit = match run.await {
        Ok(Ok(exit)) => exit,
        Ok(Err(e)) => {
            tracing::error!(id = %id, error = %e, "error waiting for container process");
            ExitStatus::code(-1)
        }
        Err(e) => {
            tracing::error!(id = %id, error = %e, "container monitor failed");
            ExitStatus::code(-1)
        }
    };

    container.update(|record| record.state.set_stopped(&exit));
    if let Some(layer) = container.rw_layer() {
        if let Err(e) = layer.unmount() {
            tracing::error!(id = %id, error = %e, "error unmounting container");
        }
    }
    if let Err(e) = container.to_disk() {
        tracing::error!(id = %id, error = %e, "error saving exit state to disk");
    }
    container.notify_state();
    tracing::info!(id = %id, exit_code = exit.exit_code, "container exited");
}
