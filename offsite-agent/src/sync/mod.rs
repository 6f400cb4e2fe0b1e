//! Incremental sync: walk, hash, check the bucket, upload what is missing.

pub mod cache;
pub mod engine;
pub mod report;

pub use cache::ExistenceCache;
pub use engine::SyncSession;
pub use report::{FileOutcome, SyncEvent, SyncReport};
