#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # harbord-graphdb
//!
//! Persisted name/link graph for the Harbord container daemon.
//!
//! Containers are entities keyed by their identifier. Names are edges: the
//! container name `/web` is the edge `web` from the root entity, and the
//! link alias `/web/db` is the edge `db` from the `/web` entity to the
//! linked container. Every mutation is written through to a single JSON
//! file so that the graph survives daemon restarts.
//!
//! ## Example
//!
//! ```rust,no_run
//! use harbord_graphdb::Database;
//!
//! # fn main() -> Result<(), harbord_graphdb::GraphError> {
//! let db = Database::open("/var/lib/harbord/linkgraph.json")?;
//! db.set("/web", "4d2c1a")?;
//! db.set("/db", "9f00be")?;
//! db.set("/web/db", "9f00be")?;
//!
//! let children = db.children("/web", Some(0))?;
//! assert_eq!(children[0].full_path, "/web/db");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod graph;

pub use error::{GraphError, Result};
pub use graph::{Database, Edge, Entities, Entity, ROOT_ID, WalkMeta};
