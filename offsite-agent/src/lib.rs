//! Offsite backup client library
//!
//! Walks local folders and uploads every file whose content is not already
//! stored under its key in a versioned bucket.

pub mod commands;
pub mod config;
pub mod daemon;
pub mod fs;
pub mod hash;
pub mod ignore;
pub mod mapper;
pub mod store;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::SyncError;
pub type Result<T> = std::result::Result<T, SyncError>;
