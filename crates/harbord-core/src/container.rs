//! Container handle and its persisted record.
//!
//! Each container lives in its own directory under the repository root,
//! named after its identifier. The directory holds `config.v2.json`, the
//! serialized [`ContainerRecord`]. The in-memory [`Container`] wraps the
//! record together with runtime-only state (writable layer, stdio pipes,
//! mount path) that is never persisted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::DuplexStream;
use tokio::sync::{MutexGuard, watch};

use crate::error::{DaemonError, Result};
use crate::layer::RwLayer;
use crate::types::{ContainerId, ExitStatus, RestartPolicy, State};

/// File name of the persisted record inside a container directory.
pub const CONFIG_FILE_NAME: &str = "config.v2.json";

const STDIN_BUFFER: usize = 64 * 1024;

/// Process configuration of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ContainerConfig {
    /// Hostname inside the container.
    pub hostname: String,
    /// Environment in `KEY=value` form.
    pub env: Vec<String>,
    /// Keep stdin open for attach.
    pub open_stdin: bool,
    /// Allocate a terminal.
    pub tty: bool,
    /// Free-form labels.
    pub labels: BTreeMap<String, String>,
}

/// A volume or bind mount declared for a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountPoint {
    /// Named volume, empty for bind mounts.
    #[serde(default)]
    pub name: String,
    /// Host path. Filled in for named volumes once the volume is resolved.
    #[serde(default)]
    pub source: PathBuf,
    /// Path inside the container.
    pub destination: PathBuf,
    /// Mounted read-write.
    #[serde(default = "default_rw", rename = "RW")]
    pub rw: bool,
}

const fn default_rw() -> bool {
    true
}

impl MountPoint {
    /// Declares a named volume mounted at `destination`.
    #[must_use]
    pub fn volume(name: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: PathBuf::new(),
            destination: destination.into(),
            rw: true,
        }
    }

    /// Declares a bind mount of `source` at `destination`.
    #[must_use]
    pub fn bind(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            name: String::new(),
            source: source.into(),
            destination: destination.into(),
            rw: true,
        }
    }

    /// Returns true if this mount refers to a named volume.
    #[must_use]
    pub fn is_named(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Host-side configuration of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct HostConfig {
    /// Rule applied when the container exits or the daemon boots.
    pub restart_policy: RestartPolicy,
    /// Containers to link to, as `name:alias`.
    pub links: Vec<String>,
}

/// Serialized form of a container, stored as `config.v2.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerRecord {
    /// Container identifier.
    #[serde(rename = "ID")]
    pub id: ContainerId,
    /// Name including the leading `/`. Empty until a name is reserved.
    #[serde(default)]
    pub name: String,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Graph driver the writable layer was created with.
    #[serde(default)]
    pub driver: String,
    /// Image reference the container was created from.
    #[serde(default)]
    pub image: String,
    /// Entrypoint.
    #[serde(default)]
    pub path: String,
    /// Entrypoint arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Process configuration.
    #[serde(default)]
    pub config: ContainerConfig,
    /// Host configuration.
    #[serde(default)]
    pub host_config: HostConfig,
    /// Declared mounts keyed by destination.
    #[serde(default)]
    pub mount_points: BTreeMap<String, MountPoint>,
    /// Runtime state as of the last save.
    #[serde(default)]
    pub state: State,
}

impl ContainerRecord {
    /// Creates a record for a new container.
    #[must_use]
    pub fn new(id: ContainerId, driver: impl Into<String>) -> Self {
        Self {
            id,
            name: String::new(),
            created: Utc::now(),
            driver: driver.into(),
            image: String::new(),
            path: String::new(),
            args: Vec::new(),
            config: ContainerConfig::default(),
            host_config: HostConfig::default(),
            mount_points: BTreeMap::new(),
            state: State::default(),
        }
    }
}

/// Standard input plumbing of a registered container.
#[derive(Debug, Default)]
struct Stdio {
    /// Handed to the execution driver at start.
    reader: Option<DuplexStream>,
    /// Handed to an attaching client.
    writer: Option<DuplexStream>,
}

#[derive(Debug)]
struct Inner {
    record: ContainerRecord,
    rw_layer: Option<Arc<dyn RwLayer>>,
    base_fs: Option<PathBuf>,
    stdio: Stdio,
}

/// In-memory handle of one container.
///
/// Shared as `Arc<Container>` between the store and in-flight operations.
/// Every accessor takes the internal lock only for the duration of a
/// memory copy; disk I/O happens on snapshots.
#[derive(Debug)]
pub struct Container {
    id: ContainerId,
    root: PathBuf,
    inner: Mutex<Inner>,
    running: watch::Sender<bool>,
    /// Serializes start attempts.
    starting: tokio::sync::Mutex<()>,
}

impl Container {
    /// Wraps `record`, stored under the directory `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, record: ContainerRecord) -> Self {
        let (running, _) = watch::channel(record.state.running);
        Self {
            id: record.id.clone(),
            root: root.into(),
            inner: Mutex::new(Inner {
                record,
                rw_layer: None,
                base_fs: None,
                stdio: Stdio::default(),
            }),
            running,
            starting: tokio::sync::Mutex::new(()),
        }
    }

    /// Reads the container stored in `repository/<dir_id>`.
    ///
    /// # Errors
    /// - [`DaemonError::Load`] if the record is missing or unreadable.
    /// - [`DaemonError::IdMismatch`] if the record names a different
    ///   identifier than its directory.
    pub fn load(repository: &Path, dir_id: &str) -> Result<Self> {
        let root = repository.join(dir_id);
        let path = root.join(CONFIG_FILE_NAME);
        let bytes = std::fs::read(&path).map_err(|e| DaemonError::load(dir_id, e))?;
        let record: ContainerRecord =
            serde_json::from_slice(&bytes).map_err(|e| DaemonError::load(dir_id, e))?;

        if record.id.as_str() != dir_id {
            return Err(DaemonError::IdMismatch {
                stored: record.id.to_string(),
                dir: dir_id.to_string(),
            });
        }
        Ok(Self::new(root, record))
    }

    /// Persists the current record atomically.
    ///
    /// # Errors
    /// Returns an error if the record cannot be serialized or written.
    pub fn to_disk(&self) -> Result<()> {
        let record = self.record();
        let encoded = serde_json::to_vec(&record)?;

        std::fs::create_dir_all(&self.root)?;
        let path = self.config_path();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &encoded)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Container identifier.
    #[must_use]
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Container directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the persisted record.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// Path of the container's shared-memory mount.
    #[must_use]
    pub fn shm_path(&self) -> PathBuf {
        self.root.join("shm")
    }

    /// Path the execution driver writes process output to.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.root.join("container.log")
    }

    /// Snapshot of the full record.
    #[must_use]
    pub fn record(&self) -> ContainerRecord {
        self.inner.lock().record.clone()
    }

    /// Applies `f` to the record.
    pub fn update<R>(&self, f: impl FnOnce(&mut ContainerRecord) -> R) -> R {
        f(&mut self.inner.lock().record)
    }

    /// Name including the leading `/`.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.lock().record.name.clone()
    }

    /// Sets the name.
    pub fn set_name(&self, name: impl Into<String>) {
        self.inner.lock().record.name = name.into();
    }

    /// Creation time.
    #[must_use]
    pub fn created(&self) -> DateTime<Utc> {
        self.inner.lock().record.created
    }

    /// Graph driver tag.
    #[must_use]
    pub fn driver(&self) -> String {
        self.inner.lock().record.driver.clone()
    }

    /// Snapshot of the runtime state.
    #[must_use]
    pub fn state(&self) -> State {
        self.inner.lock().record.state.clone()
    }

    /// Process configuration.
    #[must_use]
    pub fn config(&self) -> ContainerConfig {
        self.inner.lock().record.config.clone()
    }

    /// Restart policy.
    #[must_use]
    pub fn restart_policy(&self) -> RestartPolicy {
        self.inner.lock().record.host_config.restart_policy
    }

    /// Declared mounts.
    #[must_use]
    pub fn mount_points(&self) -> Vec<MountPoint> {
        self.inner.lock().record.mount_points.values().cloned().collect()
    }

    /// Returns true if the process is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lock().record.state.running
    }

    /// Returns true if the process is running and frozen.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        let inner = self.inner.lock();
        inner.record.state.running && inner.record.state.paused
    }

    /// Evaluates the restart policy against the last exit.
    #[must_use]
    pub fn should_restart(&self) -> bool {
        let inner = self.inner.lock();
        inner
            .record
            .host_config
            .restart_policy
            .should_restart(&inner.record.state)
    }

    /// Marks the container running with `pid` and wakes waiters.
    pub fn set_running(&self, pid: u32) {
        self.inner.lock().record.state.set_running(pid);
        self.running.send_replace(true);
    }

    /// Marks the container stopped and wakes waiters.
    pub fn set_stopped(&self, exit: &ExitStatus) {
        self.inner.lock().record.state.set_stopped(exit);
        self.running.send_replace(false);
    }

    /// Wakes [`Container::wait_stop`] callers if the record says the
    /// process is no longer running. Used after updating the state through
    /// [`Container::update`].
    pub fn notify_state(&self) {
        let running = self.is_running();
        self.running.send_replace(running);
    }

    /// Sets the paused flag.
    pub fn set_paused(&self, paused: bool) {
        self.inner.lock().record.state.paused = paused;
    }

    /// Waits until the container is no longer running and returns its exit
    /// code. `None` waits without bound.
    ///
    /// # Errors
    /// Returns [`DaemonError::Timeout`] if `timeout` elapses first.
    pub async fn wait_stop(&self, timeout: Option<Duration>) -> Result<i32> {
        let mut rx = self.running.subscribe();
        let stopped = rx.wait_for(|running| !*running);
        match timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, stopped).await.is_err() {
                    return Err(DaemonError::Timeout(limit));
                }
            }
            None => {
                let _ = stopped.await;
            }
        }
        Ok(self.state().exit_code)
    }

    /// Attaches the writable layer.
    pub fn set_rw_layer(&self, layer: Arc<dyn RwLayer>) {
        self.inner.lock().rw_layer = Some(layer);
    }

    /// Writable layer, if attached.
    #[must_use]
    pub fn rw_layer(&self) -> Option<Arc<dyn RwLayer>> {
        self.inner.lock().rw_layer.clone()
    }

    /// Where the writable layer is currently mounted.
    #[must_use]
    pub fn base_fs(&self) -> Option<PathBuf> {
        self.inner.lock().base_fs.clone()
    }

    /// Records the mount path of the writable layer.
    pub fn set_base_fs(&self, path: Option<PathBuf>) {
        self.inner.lock().base_fs = path;
    }

    /// Sets up standard input: a pipe when the container keeps stdin open,
    /// otherwise a null input.
    pub fn setup_stdio(&self) {
        let mut inner = self.inner.lock();
        inner.stdio = if inner.record.config.open_stdin {
            let (writer, reader) = tokio::io::duplex(STDIN_BUFFER);
            Stdio {
                reader: Some(reader),
                writer: Some(writer),
            }
        } else {
            Stdio::default()
        };
    }

    /// Waits for any other start of this container to finish. Hold the
    /// guard for the whole start sequence.
    pub async fn lock_start(&self) -> MutexGuard<'_, ()> {
        self.starting.lock().await
    }

    /// Takes the stdin end handed to the execution driver.
    pub fn take_stdin_reader(&self) -> Option<DuplexStream> {
        self.inner.lock().stdio.reader.take()
    }

    /// Takes the stdin end handed to an attaching client.
    pub fn attach_stdin(&self) -> Option<DuplexStream> {
        self.inner.lock().stdio.writer.take()
    }

    /// Releases the shared-memory mount, if one exists.
    ///
    /// # Errors
    /// Returns an error if the path is mounted and cannot be unmounted.
    pub fn unmount_ipc_mounts(&self) -> Result<()> {
        let shm = self.shm_path();
        if !shm.exists() {
            return Ok(());
        }
        #[cfg(unix)]
        {
            use nix::mount::{MntFlags, umount2};
            match umount2(&shm, MntFlags::MNT_DETACH) {
                // Not a mount point.
                Ok(()) | Err(nix::errno::Errno::EINVAL) => {}
                Err(e) => {
                    return Err(DaemonError::state(format!(
                        "unmount {}: {e}",
                        shm.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ABNORMAL_EXIT_CODE, ContainerStatus};

    fn record(id: &str) -> ContainerRecord {
        let mut record = ContainerRecord::new(ContainerId::new(id), "vfs");
        record.name = "/web".to_string();
        record.path = "/bin/sh".to_string();
        record.host_config.restart_policy = RestartPolicy::Always;
        record
    }

    #[test]
    fn test_save_and_load() {
        let repo = tempfile::tempdir().unwrap();
        let container = Container::new(repo.path().join("abc123"), record("abc123"));
        container.set_running(7);
        container.to_disk().unwrap();

        let loaded = Container::load(repo.path(), "abc123").unwrap();
        assert_eq!(loaded.id().as_str(), "abc123");
        assert_eq!(loaded.name(), "/web");
        assert_eq!(loaded.driver(), "vfs");
        assert!(loaded.is_running());
        assert_eq!(loaded.state().pid, 7);
        assert_eq!(loaded.restart_policy(), RestartPolicy::Always);
        assert!(!repo.path().join("abc123/config.v2.json.tmp").exists());
    }

    #[test]
    fn test_load_missing_record() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::create_dir(repo.path().join("abc")).unwrap();
        let err = Container::load(repo.path(), "abc").unwrap_err();
        assert!(matches!(err, DaemonError::Load { .. }));
    }

    #[test]
    fn test_load_corrupt_record() {
        let repo = tempfile::tempdir().unwrap();
        let dir = repo.path().join("abc");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join(CONFIG_FILE_NAME), b"{not json").unwrap();
        let err = Container::load(repo.path(), "abc").unwrap_err();
        assert!(matches!(err, DaemonError::Load { .. }));
    }

    #[test]
    fn test_load_detects_id_mismatch() {
        let repo = tempfile::tempdir().unwrap();
        let container = Container::new(repo.path().join("yyy"), record("xxx"));
        container.to_disk().unwrap();

        let err = Container::load(repo.path(), "yyy").unwrap_err();
        match err {
            DaemonError::IdMismatch { stored, dir } => {
                assert_eq!(stored, "xxx");
                assert_eq!(dir, "yyy");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_record_json_shape() {
        let json = serde_json::to_value(record("abc")).unwrap();
        assert_eq!(json["ID"], "abc");
        assert_eq!(json["Name"], "/web");
        assert_eq!(json["HostConfig"]["RestartPolicy"]["Name"], "always");
        assert_eq!(json["State"]["Running"], false);
    }

    #[test]
    fn test_stdio_setup() {
        let mut rec = record("abc");
        rec.config.open_stdin = true;
        let interactive = Container::new("/tmp/abc", rec);
        interactive.setup_stdio();
        assert!(interactive.take_stdin_reader().is_some());
        assert!(interactive.attach_stdin().is_some());

        let detached = Container::new("/tmp/abc", record("abc"));
        detached.setup_stdio();
        assert!(detached.take_stdin_reader().is_none());
    }

    #[test]
    fn test_unmount_ipc_without_shm_is_noop() {
        let repo = tempfile::tempdir().unwrap();
        let container = Container::new(repo.path().join("abc"), record("abc"));
        container.unmount_ipc_mounts().unwrap();
    }

    #[tokio::test]
    async fn test_wait_stop() {
        let container = Arc::new(Container::new("/tmp/abc", record("abc")));
        container.set_running(1);

        let err = container
            .wait_stop(Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Timeout(_)));

        let waiter = {
            let container = Arc::clone(&container);
            tokio::spawn(async move { container.wait_stop(None).await })
        };
        container.set_stopped(&ExitStatus::code(ABNORMAL_EXIT_CODE));
        assert_eq!(waiter.await.unwrap().unwrap(), ABNORMAL_EXIT_CODE);
        assert_eq!(container.state().status(), ContainerStatus::Exited);
    }

    #[test]
    fn test_should_restart_follows_policy() {
        let container = Container::new("/tmp/abc", record("abc"));
        assert!(container.should_restart());
        container.update(|r| r.host_config.restart_policy = RestartPolicy::No);
        assert!(!container.should_restart());
    }
}
