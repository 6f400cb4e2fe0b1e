//! Filesystem access for backup folders.

pub mod walker;

pub use walker::{LocalFile, WalkEntry};
