//! Daemon-level tests over mock collaborators.

pub mod mocks;
