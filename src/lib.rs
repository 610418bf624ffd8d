//! Harbord: container engine daemon core.
//!
//! Container registry, persisted name graph and boot-time restore.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use harbord::prelude::*;
//!
//! # async fn run() -> harbord::core::Result<()> {
//! let daemon = Daemon::init(DaemonConfig::new("/var/lib/harbord")).await?;
//! for container in daemon.list() {
//!     println!("{} {}", container.id().truncate(), container.name());
//! }
//! daemon.shutdown().await
//! # }
//! ```

pub use harbord_core as core;
pub use harbord_graphdb as graphdb;

/// Prelude module for common imports.
pub mod prelude {
    pub use harbord_core::{
        Container, ContainerId, ContainerStatus, CreateOptions, Daemon, DaemonConfig, DaemonError,
        ExecDriver, LayerStore, RestartPolicy, Signal, VolumeStore,
    };
    pub use harbord_graphdb::{Database, GraphError};
}
