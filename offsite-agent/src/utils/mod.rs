//! Utility modules for the backup client.

pub mod errors;
pub mod logger;

pub use errors::{Result, SyncError};
