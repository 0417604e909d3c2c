//! teamsync - Offline-first persistence core for team data
//!
//! This is the root workspace crate that provides integration tests.
//! The actual implementation is in the workspace member crates.

// Re-export main crates for convenience
pub use teamsync_operator as operator;
pub use teamsync_schema as schema;
pub use teamsync_storage as storage;
