//! In-process store used to exercise the sync engine without a server.
//!
//! Counts every call and can be told to fail listings or uploads.

use super::{RemoteStore, RemoteVersion};
use crate::hash::ContentDigest;
use crate::mapper::RemoteKey;
use crate::utils::errors::{Result, SyncError};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    objects: BTreeMap<RemoteKey, Vec<RemoteVersion>>,
    next_id: u64,
    used_bytes: u64,
    list_calls: usize,
    upload_calls: usize,
    unavailable_keys: HashSet<RemoteKey>,
    uploads_unavailable: bool,
}

/// Versioned bucket held in memory
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    quota_bytes: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject uploads that would push the bucket over `bytes`
    pub fn with_quota(bytes: u64) -> Self {
        Self {
            inner: Mutex::default(),
            quota_bytes: Some(bytes),
        }
    }

    /// Store a version directly, bypassing call counters
    pub fn seed(&self, key: &RemoteKey, content: &[u8]) -> RemoteVersion {
        let mut inner = self.lock();
        Self::insert(&mut inner, key, content)
    }

    /// Make `list_versions` fail for `key`
    pub fn fail_listing_for(&self, key: &RemoteKey) {
        self.lock().unavailable_keys.insert(key.clone());
    }

    /// Make every upload fail with `StoreUnavailable`
    pub fn fail_uploads(&self, fail: bool) {
        self.lock().uploads_unavailable = fail;
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    pub fn upload_calls(&self) -> usize {
        self.lock().upload_calls
    }

    /// Versions of `key`, newest first
    pub fn versions(&self, key: &RemoteKey) -> Vec<RemoteVersion> {
        self.lock().objects.get(key).cloned().unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<RemoteKey> {
        self.lock().objects.keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(inner: &mut Inner, key: &RemoteKey, content: &[u8]) -> RemoteVersion {
        inner.next_id += 1;
        inner.used_bytes += content.len() as u64;

        let version = RemoteVersion {
            id: format!("mem-{}", inner.next_id),
            key: key.clone(),
            digest: ContentDigest::of_bytes(content),
            size: content.len() as u64,
            uploaded_at: chrono::Utc::now(),
        };

        inner
            .objects
            .entry(key.clone())
            .or_default()
            .insert(0, version.clone());

        version
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_versions(&self, key: &RemoteKey) -> Result<Vec<RemoteVersion>> {
        let mut inner = self.lock();
        inner.list_calls += 1;

        if inner.unavailable_keys.contains(key) {
            return Err(SyncError::StoreUnavailable(format!("listing {} failed", key)));
        }

        Ok(inner.objects.get(key).cloned().unwrap_or_default())
    }

    async fn upload(&self, key: &RemoteKey, content: Vec<u8>) -> Result<RemoteVersion> {
        let mut inner = self.lock();
        inner.upload_calls += 1;

        if inner.uploads_unavailable {
            return Err(SyncError::StoreUnavailable(format!("upload of {} failed", key)));
        }

        if let Some(quota) = self.quota_bytes {
            if inner.used_bytes + content.len() as u64 > quota {
                return Err(SyncError::QuotaExceeded(format!(
                    "bucket quota of {} bytes reached",
                    quota
                )));
            }
        }

        Ok(Self::insert(&mut inner, key, &content))
    }

    fn list_all(&self) -> BoxStream<'_, Result<RemoteVersion>> {
        let latest: Vec<Result<RemoteVersion>> = self
            .lock()
            .objects
            .values()
            .filter_map(|versions| versions.first().cloned())
            .map(Ok)
            .collect();

        stream::iter(latest).boxed()
    }
}
