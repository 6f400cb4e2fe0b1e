//! Remote object store abstraction.
//!
//! The sync engine only ever needs three things from a bucket: the versions
//! stored under one key, a way to add a version, and (for `--print`) a
//! listing of everything.

pub mod http;
pub mod memory;

use crate::hash::ContentDigest;
use crate::mapper::RemoteKey;
use crate::utils::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub use http::{BucketInfo, HttpStore};
pub use memory::MemoryStore;

/// One stored version of an object, as reported by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteVersion {
    pub id: String,
    pub key: RemoteKey,
    #[serde(rename = "sha1")]
    pub digest: ContentDigest,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

impl RemoteVersion {
    /// Line printed by `--print`
    pub fn listing_line(&self) -> String {
        format!(
            "{}, uploaded at {}, SHA1: {}",
            self.key,
            self.uploaded_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.digest
        )
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All versions stored under `key`, newest first; empty when there are none
    async fn list_versions(&self, key: &RemoteKey) -> Result<Vec<RemoteVersion>>;

    /// Store `content` as a new version of `key`
    async fn upload(&self, key: &RemoteKey, content: Vec<u8>) -> Result<RemoteVersion>;

    /// Latest version of every key. Nothing is fetched until the stream is polled.
    fn list_all(&self) -> BoxStream<'_, Result<RemoteVersion>>;
}
