//! Per-run cache of remote versions, filled one key at a time.
//!
//! Listing a key's versions is a round trip to the store; comparing digests
//! is not. The first question about a key fetches all of its versions, and
//! every later question about that key is answered locally. Only keys the
//! run actually touches are ever listed.

use crate::hash::ContentDigest;
use crate::mapper::RemoteKey;
use crate::store::{RemoteStore, RemoteVersion};
use crate::utils::errors::Result;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ExistenceCache {
    versions: HashMap<RemoteKey, Vec<RemoteVersion>>,
}

impl ExistenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Does the store hold a version of `key` whose content hashes to `digest`?
    ///
    /// A failed listing is returned as an error and leaves the key uncached;
    /// it never counts as a hit.
    pub async fn has_version_with_digest(
        &mut self,
        store: &dyn RemoteStore,
        key: &RemoteKey,
        digest: &ContentDigest,
    ) -> Result<bool> {
        if !self.versions.contains_key(key) {
            let fetched = store.list_versions(key).await?;
            debug!("Cached {} remote version(s) of {}", fetched.len(), key);
            self.versions.insert(key.clone(), fetched);
        }

        Ok(self
            .versions
            .get(key)
            .is_some_and(|versions| versions.iter().any(|v| v.digest == *digest)))
    }

    /// Remember a version this run created, so the same key is not re-uploaded
    pub fn record(&mut self, version: RemoteVersion) {
        self.versions
            .entry(version.key.clone())
            .or_default()
            .insert(0, version);
    }

    /// Number of keys listed so far
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn is_cached(&self, key: &RemoteKey) -> bool {
        self.versions.contains_key(key)
    }
}
