//! Execution driver abstraction.
//!
//! The execution driver turns a [`Command`] into a running process and
//! reports its exit. [`ExecDriver::run`] resolves only when the process has
//! exited; the start hook tells the caller the process is up.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::DuplexStream;

use crate::container::{Container, MountPoint};
use crate::error::Result;
use crate::types::{ContainerId, ExitStatus, Signal};

/// Everything the driver needs to launch a container process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Container identifier.
    pub id: ContainerId,
    /// Mounted writable layer, used as the working directory.
    pub rootfs: PathBuf,
    /// Entrypoint.
    pub entrypoint: String,
    /// Entrypoint arguments.
    pub args: Vec<String>,
    /// Environment in `KEY=value` form.
    pub env: Vec<String>,
    /// Hostname.
    pub hostname: String,
    /// Allocate a terminal.
    pub tty: bool,
    /// Resolved mounts.
    pub mounts: Vec<MountPoint>,
}

impl Command {
    /// Builds the command for `container` with its layer mounted at
    /// `rootfs`.
    #[must_use]
    pub fn for_container(container: &Container, rootfs: PathBuf) -> Self {
        let record = container.record();
        Self {
            id: record.id,
            rootfs,
            entrypoint: record.path,
            args: record.args,
            env: record.config.env,
            hostname: record.config.hostname,
            tty: record.config.tty,
            mounts: record.mount_points.into_values().collect(),
        }
    }
}

/// Process I/O plumbing.
#[derive(Debug, Default)]
pub struct Pipes {
    /// Standard input; `None` means a null input.
    pub stdin: Option<DuplexStream>,
    /// File receiving stdout and stderr; `None` discards output.
    pub log_path: Option<PathBuf>,
}

/// Callback invoked with the host pid once the process is running.
pub type StartCallback = Box<dyn FnOnce(u32) + Send>;

/// Lifecycle callbacks passed to [`ExecDriver::run`].
#[derive(Default)]
pub struct Hooks {
    /// Called once after the process has been spawned.
    pub start: Option<StartCallback>,
}

impl Hooks {
    /// Hooks with a start callback.
    #[must_use]
    pub fn on_start(f: impl FnOnce(u32) + Send + 'static) -> Self {
        Self {
            start: Some(Box::new(f)),
        }
    }

    /// Fires the start callback, at most once.
    pub fn started(&mut self, pid: u32) {
        if let Some(start) = self.start.take() {
            start(pid);
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("start", &self.start.is_some())
            .finish()
    }
}

/// Runs and signals container processes.
#[async_trait]
pub trait ExecDriver: Send + Sync {
    /// Driver name.
    fn name(&self) -> &str;

    /// Runs `cmd` to completion, firing `hooks` along the way.
    ///
    /// # Errors
    /// Returns an error if the process cannot be started or waited on.
    async fn run(&self, cmd: Command, pipes: Pipes, hooks: Hooks) -> Result<ExitStatus>;

    /// Sends `signal` to the container's process.
    ///
    /// # Errors
    /// Returns an error if no process is tracked for `id` or delivery fails.
    async fn kill(&self, id: &ContainerId, signal: Signal) -> Result<()>;

    /// Reaps whatever the driver still holds for `id`. Best effort.
    ///
    /// # Errors
    /// Returns an error if the driver failed to release resources.
    async fn terminate(&self, id: &ContainerId) -> Result<()>;

    /// Freezes the container's process.
    ///
    /// # Errors
    /// Returns an error if the process cannot be frozen.
    async fn pause(&self, id: &ContainerId) -> Result<()>;

    /// Thaws the container's process.
    ///
    /// # Errors
    /// Returns an error if the process cannot be thawed.
    async fn unpause(&self, id: &ContainerId) -> Result<()>;
}
