//! Mock collaborators for daemon tests.
//!
//! [`MockDriver`] simulates container processes without spawning anything:
//! a "process" runs until it is signalled. Start delays and start failures
//! can be injected per container, and every run/start is appended to an
//! event log so tests can check ordering.
//!
//! [`MockLayerStore`] hands out in-memory layers and can be told to fail
//! the lookup for particular containers.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use crate::driver::{Command, ExecDriver, Hooks, Pipes};
use crate::error::{DaemonError, Result};
use crate::layer::{Change, ChangeKind, LayerStore, RwLayer};
use crate::types::{ContainerId, ExitStatus, Signal};

/// What the mock driver observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// `run` was entered for the container.
    Run(String),
    /// The container's start hook fired.
    Started(String),
    /// A signal was delivered.
    Signal(String, Signal),
    /// `terminate` was called.
    Terminate(String),
}

#[derive(Default)]
struct MockDriverState {
    start_delays: RwLock<HashMap<String, Duration>>,
    failing: RwLock<HashSet<String>>,
    ignore_term: RwLock<HashSet<String>>,
    frozen: Mutex<HashSet<String>>,
    pending: Mutex<HashMap<String, i32>>,
    exits: Mutex<HashMap<String, oneshot::Sender<ExitStatus>>>,
    events: Mutex<Vec<DriverEvent>>,
    next_pid: AtomicU32,
}

/// Execution driver that simulates processes.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<MockDriverState>,
}

impl MockDriver {
    /// Creates a mock driver where every start succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays the start of container `id` by `delay`.
    #[must_use]
    pub fn with_start_delay(self, id: &str, delay: Duration) -> Self {
        self.state.start_delays.write().insert(id.to_string(), delay);
        self
    }

    /// Makes starting container `id` fail.
    #[must_use]
    pub fn fail_start(self, id: &str) -> Self {
        self.state.failing.write().insert(id.to_string());
        self
    }

    /// Makes container `id` ignore SIGTERM.
    #[must_use]
    pub fn ignore_sigterm(self, id: &str) -> Self {
        self.state.ignore_term.write().insert(id.to_string());
        self
    }

    /// Everything observed so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<DriverEvent> {
        self.state.events.lock().clone()
    }

    /// Identifiers whose start hook fired, in order.
    #[must_use]
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DriverEvent::Started(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Position of `event` in the log.
    #[must_use]
    pub fn position(&self, event: &DriverEvent) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    /// Signals delivered to container `id`.
    #[must_use]
    pub fn signals(&self, id: &str) -> Vec<Signal> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DriverEvent::Signal(target, sig) if target == id => Some(sig),
                _ => None,
            })
            .collect()
    }

    /// Makes the simulated process of `id` exit with `code`.
    pub fn exit(&self, id: &str, code: i32) -> bool {
        self.state
            .exits
            .lock()
            .remove(id)
            .is_some_and(|tx| tx.send(ExitStatus::code(code)).is_ok())
    }

    fn record(&self, event: DriverEvent) {
        self.state.events.lock().push(event);
    }
}

#[async_trait]
impl ExecDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn run(&self, cmd: Command, _pipes: Pipes, mut hooks: Hooks) -> Result<ExitStatus> {
        let id = cmd.id.to_string();
        self.record(DriverEvent::Run(id.clone()));

        let delay = self.state.start_delays.read().get(&id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.failing.read().contains(&id) {
            return Err(DaemonError::driver(format!("injected start failure for {id}")));
        }

        let (tx, rx) = oneshot::channel();
        self.state.exits.lock().insert(id.clone(), tx);
        let pid = 1000 + self.state.next_pid.fetch_add(1, Ordering::SeqCst);
        self.record(DriverEvent::Started(id));
        hooks.started(pid);

        Ok(rx.await.unwrap_or(ExitStatus::code(ABNORMAL)))
    }

    async fn kill(&self, id: &ContainerId, signal: Signal) -> Result<()> {
        let id = id.to_string();
        if !self.state.exits.lock().contains_key(&id) {
            return Err(DaemonError::driver(format!("no process for container {id}")));
        }
        self.record(DriverEvent::Signal(id.clone(), signal));

        let code = 128 + signal.as_i32();
        match signal {
            Signal::Stop => {
                self.state.frozen.lock().insert(id);
            }
            Signal::Cont => {
                self.state.frozen.lock().remove(&id);
                let pending = self.state.pending.lock().remove(&id);
                if let Some(code) = pending {
                    self.exit(&id, code);
                }
            }
            // SIGKILL is delivered even to frozen processes.
            Signal::Kill => {
                self.exit(&id, code);
            }
            Signal::Term if self.state.ignore_term.read().contains(&id) => {}
            Signal::Term | Signal::Int | Signal::Quit => {
                if self.state.frozen.lock().contains(&id) {
                    self.state.pending.lock().insert(id, code);
                } else {
                    self.exit(&id, code);
                }
            }
            Signal::Hup | Signal::Usr1 | Signal::Usr2 => {}
        }
        Ok(())
    }

    async fn terminate(&self, id: &ContainerId) -> Result<()> {
        self.record(DriverEvent::Terminate(id.to_string()));
        self.exit(id.as_str(), ABNORMAL);
        Ok(())
    }

    async fn pause(&self, id: &ContainerId) -> Result<()> {
        self.kill(id, Signal::Stop).await
    }

    async fn unpause(&self, id: &ContainerId) -> Result<()> {
        self.kill(id, Signal::Cont).await
    }
}

const ABNORMAL: i32 = crate::types::ABNORMAL_EXIT_CODE;

/// In-memory writable layer.
#[derive(Debug)]
pub struct MockLayer {
    id: String,
    path: PathBuf,
    mounts: AtomicUsize,
    unmounts: AtomicUsize,
    /// Returned by `mount` instead of `path` when set.
    moved_to: RwLock<Option<PathBuf>>,
}

impl MockLayer {
    /// Number of `unmount` calls.
    #[must_use]
    pub fn unmount_calls(&self) -> usize {
        self.unmounts.load(Ordering::SeqCst)
    }

    /// Makes the next mounts report `path`.
    pub fn move_to(&self, path: impl Into<PathBuf>) {
        *self.moved_to.write() = Some(path.into());
    }
}

impl RwLayer for MockLayer {
    fn id(&self) -> &str {
        &self.id
    }

    fn mount(&self, _mount_label: &str) -> Result<PathBuf> {
        self.mounts.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .moved_to
            .read()
            .clone()
            .unwrap_or_else(|| self.path.clone()))
    }

    fn unmount(&self) -> Result<()> {
        self.unmounts.fetch_add(1, Ordering::SeqCst);
        let _ = self
            .mounts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        Ok(())
    }

    fn is_mounted(&self) -> bool {
        self.mounts.load(Ordering::SeqCst) > 0
    }

    fn changes(&self) -> Result<Vec<Change>> {
        Ok(vec![Change {
            path: PathBuf::from("/tmp/scratch"),
            kind: ChangeKind::Add,
        }])
    }
}

/// Layer store whose layers exist for every container unless told
/// otherwise.
pub struct MockLayerStore {
    driver: String,
    root: PathBuf,
    layers: Mutex<HashMap<String, Arc<MockLayer>>>,
    missing: RwLock<HashSet<String>>,
}

impl MockLayerStore {
    /// Creates a store reporting `driver` as its graph driver.
    #[must_use]
    pub fn new(driver: &str, root: &Path) -> Self {
        Self {
            driver: driver.to_string(),
            root: root.to_path_buf(),
            layers: Mutex::new(HashMap::new()),
            missing: RwLock::new(HashSet::new()),
        }
    }

    /// Reports `name` as the graph driver.
    #[must_use]
    pub fn with_driver_name(mut self, name: &str) -> Self {
        self.driver = name.to_string();
        self
    }

    /// Makes the layer lookup for `id` fail.
    #[must_use]
    pub fn fail_layer(self, id: &str) -> Self {
        self.missing.write().insert(id.to_string());
        self
    }

    /// The layer handed out for `id`, if any.
    #[must_use]
    pub fn layer(&self, id: &str) -> Option<Arc<MockLayer>> {
        self.layers.lock().get(id).cloned()
    }

    fn handle(&self, id: &str) -> Arc<MockLayer> {
        let mut layers = self.layers.lock();
        Arc::clone(layers.entry(id.to_string()).or_insert_with(|| {
            Arc::new(MockLayer {
                id: id.to_string(),
                path: self.root.join(id),
                mounts: AtomicUsize::new(0),
                unmounts: AtomicUsize::new(0),
                moved_to: RwLock::new(None),
            })
        }))
    }
}

impl LayerStore for MockLayerStore {
    fn driver_name(&self) -> &str {
        &self.driver
    }

    fn create_rw_layer(&self, id: &str) -> Result<Arc<dyn RwLayer>> {
        Ok(self.handle(id))
    }

    fn get_rw_layer(&self, id: &str) -> Result<Arc<dyn RwLayer>> {
        if self.missing.read().contains(id) {
            return Err(DaemonError::layer(format!("injected layer failure for {id}")));
        }
        Ok(self.handle(id))
    }

    fn release_rw_layer(&self, id: &str) -> Result<()> {
        if self.layer(id).is_some_and(|l| l.is_mounted()) {
            return Err(DaemonError::layer(format!("layer {id} is still mounted")));
        }
        self.layers.lock().remove(id);
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}
