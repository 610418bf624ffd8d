//! Boot-time restore.
//!
//! Restore runs once, before the daemon serves requests:
//!
//! 1. Load every container directory in the repository and attach its
//!    writable layer. Broken containers and containers of another graph
//!    driver are skipped.
//! 2. Mark containers the name graph already knows as registered.
//! 3. Name the rest, then register everything.
//! 4. Restart containers whose policy asks for it, concurrently. A
//!    container first waits, bounded per link, for the containers it links
//!    to.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::container::Container;
use crate::error::{DaemonError, Result};
use crate::types::ContainerId;

use super::Daemon;

/// Driver assumed for containers persisted without a driver tag.
const LEGACY_DRIVER: &str = "aufs";

/// A loaded container awaiting registration.
struct Candidate {
    container: Arc<Container>,
    registered: bool,
}

/// Completion signals of the containers being restarted.
type Notifiers = HashMap<ContainerId, watch::Receiver<bool>>;

impl Daemon {
    /// Loads, registers and restarts persisted containers.
    ///
    /// Per-container failures are logged and the container is left out.
    ///
    /// # Errors
    /// Returns [`DaemonError::Repository`] if the repository cannot be
    /// enumerated.
    pub async fn restore(self: &Arc<Self>) -> Result<()> {
        tracing::info!("loading containers: start");

        let mut candidates = self.load_candidates()?;

        for (_, entity) in self.graph.list("/", None).iter() {
            if let Some(candidate) = candidates.get_mut(entity.id()) {
                candidate.registered = true;
            }
        }

        let mut restart = Vec::new();
        for candidate in candidates.into_values() {
            let container = candidate.container;
            if !candidate.registered {
                if let Err(e) = self.register_name(&container) {
                    tracing::error!(id = %container.id(), error = %e, "failed to register container name");
                    continue;
                }
            }
            if let Err(e) = self.register(Arc::clone(&container)).await {
                tracing::error!(id = %container.id(), error = %e, "failed to register container");
                continue;
            }
            if self.config.auto_restart && container.should_restart() {
                restart.push(container);
            }
        }

        self.restart_containers(restart).await;

        tracing::info!(count = self.containers.len(), "loading containers: done");
        Ok(())
    }

    fn load_candidates(&self) -> Result<BTreeMap<String, Candidate>> {
        let repository_error = |source| DaemonError::Repository {
            path: self.repository.clone(),
            source,
        };
        let current_driver = self.graph_driver_name();
        let mut candidates = BTreeMap::new();

        for entry in std::fs::read_dir(&self.repository).map_err(repository_error)? {
            let entry = entry.map_err(repository_error)?;
            let Ok(id) = entry.file_name().into_string() else {
                tracing::debug!(path = %entry.path().display(), "skipping non-utf8 entry");
                continue;
            };
            if !entry.path().is_dir() {
                tracing::debug!(entry = %id, "skipping non-directory entry");
                continue;
            }

            let container = match Container::load(&self.repository, &id) {
                Ok(container) => container,
                Err(e) => {
                    tracing::error!(id = %id, error = %e, "failed to load container");
                    continue;
                }
            };

            match self.layers.get_rw_layer(container.id().as_str()) {
                Ok(layer) => container.set_rw_layer(layer),
                Err(e) => {
                    tracing::error!(id = %id, error = %e, "failed to load container mount");
                    continue;
                }
            }

            let driver = container.driver();
            if (driver.is_empty() && current_driver == LEGACY_DRIVER) || driver == current_driver {
                tracing::debug!(id = %id, "loaded container");
                candidates.insert(
                    id,
                    Candidate {
                        container: Arc::new(container),
                        registered: false,
                    },
                );
            } else {
                tracing::debug!(
                    id = %id,
                    driver = %driver,
                    current = %current_driver,
                    "cannot load container created with another graph driver"
                );
            }
        }
        Ok(candidates)
    }

    /// Starts `containers` concurrently and waits for all of them.
    async fn restart_containers(self: &Arc<Self>, containers: Vec<Arc<Container>>) {
        if containers.is_empty() {
            return;
        }

        let mut notifiers = Notifiers::new();
        let mut signals = Vec::with_capacity(containers.len());
        for container in &containers {
            let (done, rx) = watch::channel(false);
            notifiers.insert(container.id().clone(), rx);
            signals.push(done);
        }
        let notifiers = Arc::new(notifiers);
        let wait = self.config.restart_wait_timeout;

        let mut units = JoinSet::new();
        for (container, done) in containers.into_iter().zip(signals) {
            let daemon = Arc::clone(self);
            let notifiers = Arc::clone(&notifiers);
            units.spawn(async move {
                daemon.restart_one(&container, &notifiers, wait).await;
                done.send_replace(true);
            });
        }

        while let Some(joined) = units.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "restart task failed");
            }
        }
    }

    async fn restart_one(&self, container: &Arc<Container>, notifiers: &Notifiers, wait: Duration) {
        let id = container.id();
        tracing::debug!(id = %id, "starting container");

        let name = container.name();
        let children = self.children(&name).unwrap_or_else(|e| {
            tracing::warn!(name = %name, error = %e, "error getting children");
            BTreeMap::new()
        });

        for (link, child) in &children {
            let Some(rx) = notifiers.get(child.id()) else {
                continue;
            };
            let mut rx = rx.clone();
            let timed_out = tokio::time::timeout(wait, rx.wait_for(|done| *done))
                .await
                .is_err();
            if timed_out {
                tracing::debug!(id = %id, link = %link, ?wait, "linked container not started in time");
            }
        }

        match self.start_container(container).await {
            Ok(()) => {
                container.update(|record| record.state.restart_count += 1);
                if let Err(e) = container.to_disk() {
                    tracing::error!(id = %id, error = %e, "error saving restart count to disk");
                }
            }
            Err(e) => tracing::error!(id = %id, error = %e, "failed to start container"),
        }
    }
}
