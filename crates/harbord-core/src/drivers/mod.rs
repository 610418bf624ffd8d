//! Execution driver implementations.
//!
//! - [`NativeDriver`]: host processes via fork/exec (Unix only)

#[cfg(unix)]
mod native;

#[cfg(unix)]
pub use native::NativeDriver;
