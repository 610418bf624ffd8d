//! Layer store implementations.
//!
//! - [`VfsLayerStore`]: plain directories, no copy-on-write.

mod vfs;

pub use vfs::{DRIVER_NAME as VFS_DRIVER, VfsLayer, VfsLayerStore};
