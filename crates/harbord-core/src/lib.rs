// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # harbord-core
//!
//! Container registry and boot-time restore for the Harbord container
//! daemon.
//!
//! - [`Daemon`]: the context object owning every structure below
//! - [`ContainerStore`]: identifier → container handle
//! - [`TruncIndex`]: short-ID prefix resolution
//! - [`Container`] / [`ContainerRecord`]: in-memory handle and the
//!   `config.v2.json` record behind it
//! - [`LayerStore`], [`ExecDriver`], [`VolumeStore`]: storage, execution and
//!   volume collaborators, with [`VfsLayerStore`], `NativeDriver` and
//!   [`LocalVolumes`] as built-in implementations
//!
//! Names and links live in the persisted graph of `harbord-graphdb`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use harbord_core::{CreateOptions, Daemon, DaemonConfig};
//!
//! # async fn run() -> harbord_core::Result<()> {
//! let daemon = Daemon::init(DaemonConfig::new("/var/lib/harbord")).await?;
//!
//! let web = daemon
//!     .create_container(CreateOptions::new(["/bin/sleep", "300"]).with_name("web"))
//!     .await?;
//! daemon.start_container(&web).await?;
//!
//! let same = daemon.get_container(&web.id().as_str()[..6])?;
//! assert_eq!(same.name(), "/web");
//!
//! daemon.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Lock guards are scoped to single expressions throughout
#![allow(clippy::significant_drop_tightening)]

pub mod config;
pub mod container;
pub mod daemon;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod layer;
pub mod layers;
pub mod names;
pub mod store;
#[cfg(test)]
pub mod tests;
pub mod truncindex;
pub mod types;
pub mod volume;

pub use config::DaemonConfig;
pub use container::{Container, ContainerConfig, ContainerRecord, HostConfig, MountPoint};
pub use daemon::{CreateOptions, Daemon, DaemonBuilder, full_container_name, validate_id};
pub use driver::{Command, ExecDriver, Hooks, Pipes};
#[cfg(unix)]
pub use drivers::NativeDriver;
pub use error::{DaemonError, Result};
pub use layer::{Change, ChangeKind, LayerStore, RwLayer};
pub use layers::VfsLayerStore;
pub use store::ContainerStore;
pub use truncindex::{IndexError, TruncIndex};
pub use types::{
    ABNORMAL_EXIT_CODE, ContainerId, ContainerStatus, ExitStatus, RestartPolicy, Signal, State,
};
pub use volume::{LocalVolumes, VolumeStore};
