//! Native execution driver using fork/exec.
//!
//! Runs the container entrypoint as a plain host process with the mounted
//! writable layer as its working directory. No namespaces or cgroups;
//! pause and unpause map to SIGSTOP and SIGCONT.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use nix::sys::signal::{Signal as NixSignal, kill as nix_kill};
use nix::unistd::Pid;
use parking_lot::Mutex;

use crate::driver::{Command, ExecDriver, Hooks, Pipes};
use crate::error::{DaemonError, Result};
use crate::types::{ContainerId, ExitStatus, Signal};

/// Driver name.
pub const DRIVER_NAME: &str = "native";

/// Execution driver running containers as host processes.
#[derive(Debug)]
pub struct NativeDriver {
    root: PathBuf,
    /// Live pids indexed by container.
    processes: Arc<Mutex<HashMap<ContainerId, u32>>>,
}

impl NativeDriver {
    /// Creates a driver keeping runtime state under `root`.
    ///
    /// # Errors
    /// Returns an error if `root` cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            processes: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Runtime state directory.
    #[must_use]
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Number of tracked processes.
    #[must_use]
    pub fn process_count(&self) -> usize {
        self.processes.lock().len()
    }

    fn pid_of(&self, id: &ContainerId) -> Result<u32> {
        self.processes
            .lock()
            .get(id)
            .copied()
            .ok_or_else(|| DaemonError::driver(format!("no process for container {id}")))
    }

    fn signal_pid(pid: u32, signal: Signal) -> Result<()> {
        let sig = NixSignal::try_from(signal.as_i32())
            .map_err(|e| DaemonError::driver(format!("unsupported signal {signal:?}: {e}")))?;
        #[allow(clippy::cast_possible_wrap)] // pids fit in i32
        let raw = pid as i32;
        match nix_kill(Pid::from_raw(raw), sig) {
            // Already gone; the run loop will observe the exit.
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(DaemonError::driver(format!("kill {pid}: {e}"))),
        }
    }
}

fn exit_status(status: std::process::ExitStatus) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    let exit_code = status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1);
    ExitStatus::code(exit_code)
}

#[async_trait]
impl ExecDriver for NativeDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    async fn run(&self, cmd: Command, pipes: Pipes, mut hooks: Hooks) -> Result<ExitStatus> {
        let Pipes { stdin, log_path } = pipes;

        let mut command = tokio::process::Command::new(&cmd.entrypoint);
        command
            .args(&cmd.args)
            .env_clear()
            .envs(cmd.env.iter().filter_map(|kv| kv.split_once('=')))
            .current_dir(&cmd.rootfs)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        if let Some(path) = &log_path {
            let out = OpenOptions::new().create(true).append(true).open(path)?;
            let err = out.try_clone()?;
            command.stdout(Stdio::from(out)).stderr(Stdio::from(err));
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let mut child = command
            .spawn()
            .map_err(|e| DaemonError::driver(format!("failed to spawn {}: {e}", cmd.entrypoint)))?;
        let pid = child
            .id()
            .ok_or_else(|| DaemonError::driver("spawned process has no pid"))?;

        if let (Some(mut input), Some(mut child_stdin)) = (stdin, child.stdin.take()) {
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut input, &mut child_stdin).await;
            });
        }

        self.processes.lock().insert(cmd.id.clone(), pid);
        tracing::info!(id = %cmd.id, pid, "spawned container process");
        hooks.started(pid);

        let waited = child.wait().await;
        self.processes.lock().remove(&cmd.id);
        let status = waited.map_err(|e| DaemonError::driver(format!("wait {pid}: {e}")))?;

        let exit = exit_status(status);
        tracing::debug!(id = %cmd.id, pid, exit_code = exit.exit_code, "container process exited");
        Ok(exit)
    }

    async fn kill(&self, id: &ContainerId, signal: Signal) -> Result<()> {
        let pid = self.pid_of(id)?;
        Self::signal_pid(pid, signal)?;
        tracing::debug!(id = %id, signal = ?signal, pid, "sent signal");
        Ok(())
    }

    async fn terminate(&self, id: &ContainerId) -> Result<()> {
        let pid = self.processes.lock().remove(id);
        if let Some(pid) = pid {
            Self::signal_pid(pid, Signal::Kill)?;
            tracing::debug!(id = %id, pid, "terminated leftover process");
        }
        Ok(())
    }

    async fn pause(&self, id: &ContainerId) -> Result<()> {
        self.kill(id, Signal::Stop).await
    }

    async fn unpause(&self, id: &ContainerId) -> Result<()> {
        self.kill(id, Signal::Cont).await
    }
}
