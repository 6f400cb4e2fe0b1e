//! Sync engine - decides, file by file, whether an upload is needed.
//!
//! Files are processed strictly one after another: walk, hash, ask the
//! existence cache, upload on a miss. A failure on one file is logged,
//! reported as a `Failed` event and the run moves on to the next file.
//! Cancellation is only observed between files; a hash or upload that has
//! started always runs to completion or failure.

use super::cache::ExistenceCache;
use super::report::{FileOutcome, SyncEvent, SyncReport};
use crate::fs::walker::{walk_folder_with_callback, LocalFile, WalkEntry};
use crate::hash::digest_file;
use crate::ignore::IgnoreMatcher;
use crate::mapper::remote_key;
use crate::store::RemoteStore;
use crate::utils::errors::{Result, SyncError};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Walk entries buffered ahead of the file being processed
const WALK_CHANNEL_CAPACITY: usize = 256;

/// Everything one run needs: the store, the rules, the per-run cache
pub struct SyncSession {
    store: Arc<dyn RemoteStore>,
    matcher: IgnoreMatcher,
    cache: ExistenceCache,
    cancel_token: CancellationToken,
    subscriber: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl SyncSession {
    /// Create a new session (no cancellation support)
    pub fn new(store: Arc<dyn RemoteStore>, matcher: IgnoreMatcher) -> Self {
        Self::with_cancel(store, matcher, CancellationToken::new())
    }

    /// Create a new session that stops between files once `cancel_token` fires
    pub fn with_cancel(
        store: Arc<dyn RemoteStore>,
        matcher: IgnoreMatcher,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            matcher,
            cache: ExistenceCache::new(),
            cancel_token,
            subscriber: None,
        }
    }

    /// Receive every event of subsequent runs
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriber = Some(tx);
        rx
    }

    pub fn cache(&self) -> &ExistenceCache {
        &self.cache
    }

    /// Back up every folder in order and summarize what happened
    pub async fn sync<P: AsRef<Path>>(&mut self, folders: &[P]) -> SyncReport {
        let mut report = SyncReport::default();
        let mut cancelled = false;

        for folder in folders {
            if self.cancel_token.is_cancelled() {
                cancelled = true;
                break;
            }

            // Walked as configured; keys are made absolute per file
            let folder = folder.as_ref();
            info!("Backing up folder: {}", folder.display());

            let (tx, mut rx) = mpsc::channel(WALK_CHANNEL_CAPACITY);
            let walk = self.spawn_walk(folder, tx);

            while let Some(entry) = rx.recv().await {
                if self.cancel_token.is_cancelled() {
                    break;
                }
                let event = self.handle_entry(entry).await;
                self.emit(&mut report, event);
            }

            // Dropping the receiver stops a walker blocked on a full channel
            drop(rx);
            if let Err(e) = walk.await {
                let event = SyncEvent::Failed {
                    path: folder.to_path_buf(),
                    error: format!("directory walk aborted: {}", e),
                };
                self.emit(&mut report, event);
            }

            if self.cancel_token.is_cancelled() {
                cancelled = true;
                break;
            }
        }

        if cancelled {
            self.emit(&mut report, SyncEvent::Cancelled);
        }

        info!("Sync finished: {}", report);
        report
    }

    async fn handle_entry(&mut self, entry: WalkEntry) -> SyncEvent {
        match entry {
            WalkEntry::IgnoredDirectory { path, rule } => SyncEvent::DirectoryIgnored { path, rule },
            WalkEntry::IgnoredFile { path, rule } => SyncEvent::FileIgnored { path, rule },
            WalkEntry::Error { path, error } => SyncEvent::Failed { path, error },
            WalkEntry::File(file) => match self.process_file(&file).await {
                Ok(outcome) => SyncEvent::from_outcome(file.path, outcome),
                Err(e) => SyncEvent::Failed {
                    path: file.path,
                    error: e.to_string(),
                },
            },
        }
    }

    /// Hash one file, consult the cache and upload on a miss
    pub async fn process_file(&mut self, file: &LocalFile) -> Result<FileOutcome> {
        let key = remote_key(&std::path::absolute(&file.path)?);

        let path = file.path.clone();
        let digest = tokio::task::spawn_blocking(move || digest_file(&path))
            .await
            .map_err(|e| SyncError::Io(std::io::Error::other(e)))??;

        if self
            .cache
            .has_version_with_digest(self.store.as_ref(), &key, &digest)
            .await?
        {
            return Ok(FileOutcome::Skipped { key, digest });
        }

        info!("Uploading {}...", file.path.display());
        let content = tokio::fs::read(&file.path).await?;
        let version = self.store.upload(&key, content).await?;

        if version.digest != digest {
            warn!(
                "{} changed while it was being backed up (hashed {}, stored {})",
                file.path.display(),
                digest,
                version.digest
            );
        }

        self.cache.record(version.clone());
        Ok(FileOutcome::Uploaded(version))
    }

    /// Walk one folder on the blocking pool, streaming entries into `tx`.
    /// The walk stops early on cancellation or once the receiver is gone.
    fn spawn_walk(&self, folder: &Path, tx: mpsc::Sender<WalkEntry>) -> JoinHandle<()> {
        let root = folder.to_path_buf();
        let matcher = self.matcher.clone();
        let cancel_token = self.cancel_token.clone();

        tokio::task::spawn_blocking(move || {
            walk_folder_with_callback(&root, &matcher, |entry| {
                if cancel_token.is_cancelled() || tx.blocking_send(entry).is_err() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
        })
    }

    fn emit(&self, report: &mut SyncReport, event: SyncEvent) {
        match &event {
            SyncEvent::DirectoryIgnored { path, .. } => info!("Ignoring directory: {}", path.display()),
            SyncEvent::FileIgnored { path, .. } => info!("Ignoring file: {}", path.display()),
            SyncEvent::Skipped { key, .. } => {
                info!("File {} already exists in the bucket. Skipping...", key)
            }
            SyncEvent::Uploaded { version, .. } => info!("Uploaded {} successfully!", version.key),
            SyncEvent::Failed { path, error } => {
                error!("Error occurred while processing file {}: {}", path.display(), error)
            }
            SyncEvent::Cancelled => warn!("Sync cancelled, remaining files were not processed"),
        }

        report.record(&event);

        if let Some(tx) = &self.subscriber {
            // A dropped receiver just means nobody is listening anymore
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentDigest;
    use crate::mapper::RemoteKey;
    use crate::store::{MemoryStore, RemoteVersion};
    use async_trait::async_trait;
    use futures_util::stream::BoxStream;
    use std::fs;
    use std::path::{Component, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;

    fn key_of(path: &Path) -> RemoteKey {
        remote_key(&std::path::absolute(path).unwrap())
    }

    fn session(store: &Arc<MemoryStore>, rules: &[&str]) -> SyncSession {
        SyncSession::new(store.clone(), IgnoreMatcher::new(rules).unwrap())
    }

    #[tokio::test]
    async fn test_example_tree_then_idempotent_rerun() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir(root.join("ignored"))?;
        fs::write(root.join("a.txt"), b"hello")?;
        fs::write(root.join("b.txt"), b"hello")?;
        fs::write(root.join("ignored/c.txt"), b"c")?;

        let store = Arc::new(MemoryStore::new());

        let first = session(&store, &["ignored/"]).sync(&[root]).await;
        assert_eq!(first.uploaded, 2);
        assert_eq!(first.skipped, 0);
        assert_eq!(first.ignored_directories, 1);
        assert_eq!(first.failed, 0);

        // Same digest, distinct keys: both stored
        assert_eq!(store.versions(&key_of(&root.join("a.txt"))).len(), 1);
        assert_eq!(store.versions(&key_of(&root.join("b.txt"))).len(), 1);
        assert!(store.versions(&key_of(&root.join("ignored/c.txt"))).is_empty());

        // Fresh session, fresh cache, nothing changed
        let second = session(&store, &["ignored/"]).sync(&[root]).await;
        assert_eq!(second.uploaded, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(store.upload_calls(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_ignored_subtree_is_never_listed() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("cache/nested"))?;
        fs::write(root.join("cache/nested/blob.bin"), b"blob")?;
        fs::write(root.join("cache/index.db"), b"index")?;
        fs::write(root.join("keep.txt"), b"keep")?;

        let store = Arc::new(MemoryStore::new());
        let report = session(&store, &["cache"]).sync(&[root]).await;

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.ignored_directories, 1);
        assert_eq!(report.ignored_files, 0);
        // Only keep.txt ever reached the cache
        assert_eq!(store.list_calls(), 1);
        assert_eq!(store.keys(), vec![key_of(&root.join("keep.txt"))]);

        Ok(())
    }

    #[tokio::test]
    async fn test_ignored_file_glob_is_not_hashed_or_uploaded() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::write(root.join("report.pdf"), b"pdf")?;
        fs::write(root.join("scratch.tmp"), b"tmp")?;

        let store = Arc::new(MemoryStore::new());
        let report = session(&store, &["*.tmp"]).sync(&[root]).await;

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.ignored_files, 1);
        assert_eq!(store.list_calls(), 1);
        assert!(store.versions(&key_of(&root.join("scratch.tmp"))).is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_changed_content_creates_new_version() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("x.txt");
        fs::write(&path, b"version two")?;

        let store = Arc::new(MemoryStore::new());
        let old = store.seed(&key_of(&path), b"version one");

        let report = session(&store, &[]).sync(&[temp_dir.path()]).await;
        assert_eq!(report.uploaded, 1);

        let versions = store.versions(&key_of(&path));
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].digest, ContentDigest::of_bytes(b"version two"));
        assert_eq!(versions[1], old);

        Ok(())
    }

    #[tokio::test]
    async fn test_failure_on_one_file_does_not_stop_the_run() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), b"a")?;
        fs::write(root.join("b.txt"), b"b")?;
        fs::write(root.join("c.txt"), b"c")?;

        let store = Arc::new(MemoryStore::new());
        store.fail_listing_for(&key_of(&root.join("a.txt")));

        let report = session(&store, &[]).sync(&[root]).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.uploaded, 2);
        assert_eq!(report.failures[0].0, root.join("a.txt"));
        // A failed lookup never counts as present
        assert!(store.versions(&key_of(&root.join("a.txt"))).is_empty());

        Ok(())
    }

    #[tokio::test]
    #[cfg(target_os = "linux")]
    async fn test_hash_failure_does_not_stop_later_files() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), b"a")?;
        // Reading offset 0 of our own address space fails with EIO
        std::os::unix::fs::symlink("/proc/self/mem", root.join("b.txt"))?;
        fs::write(root.join("c.txt"), b"c")?;

        let store = Arc::new(MemoryStore::new());
        let mut session = session(&store, &[]);
        let mut rx = session.subscribe();
        let report = session.sync(&[root]).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], SyncEvent::Uploaded { path, .. } if path == &root.join("a.txt")));
        assert!(matches!(&events[1], SyncEvent::Failed { path, .. } if path == &root.join("b.txt")));
        assert!(matches!(&events[2], SyncEvent::Uploaded { path, .. } if path == &root.join("c.txt")));

        assert_eq!(report.failed, 1);
        assert_eq!(report.uploaded, 2);
        // Hashing failed, so the bucket was never consulted for b.txt
        assert_eq!(store.list_calls(), 2);

        Ok(())
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_fifo_does_not_block_the_run() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), b"a")?;
        let status = std::process::Command::new("mkfifo").arg(root.join("pipe")).status()?;
        assert!(status.success());

        let store = Arc::new(MemoryStore::new());
        let report = tokio::time::timeout(Duration::from_secs(10), session(&store, &[]).sync(&[root]))
            .await
            .expect("sync must not wait on a FIFO");

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(store.keys(), vec![key_of(&root.join("a.txt"))]);

        Ok(())
    }

    /// `path` spelled relative to the working directory, starting with `./`
    fn relative_from_cwd(path: &Path) -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        let depth = cwd
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .count();

        let mut relative = PathBuf::from(".");
        for _ in 0..depth {
            relative.push("..");
        }
        relative.join(path.strip_prefix("/").unwrap())
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_relative_folder_with_relative_rule() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let base = fs::canonicalize(temp_dir.path())?;
        fs::create_dir_all(base.join("backup/tmp"))?;
        fs::write(base.join("backup/keep.txt"), b"keep")?;
        fs::write(base.join("backup/tmp/secret.txt"), b"secret")?;

        // Same spelling as the walk: "./<...>/backup/" and "./<...>/backup/tmp/"
        let folder = relative_from_cwd(&base.join("backup"));
        let folder_arg = format!("{}/", folder.display());
        let rule = format!("{}/tmp/", folder.display());

        let store = Arc::new(MemoryStore::new());
        let report = session(&store, &[rule.as_str()]).sync(&[folder_arg.as_str()]).await;

        assert_eq!(report.ignored_directories, 1);
        assert_eq!(report.uploaded, 1);
        assert_eq!(store.keys(), vec![key_of(&base.join("backup/keep.txt"))]);

        Ok(())
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_relative_folder_with_absolute_rule() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let base = fs::canonicalize(temp_dir.path())?;
        fs::create_dir_all(base.join("backup/tmp"))?;
        fs::write(base.join("backup/keep.txt"), b"keep")?;
        fs::write(base.join("backup/tmp/secret.txt"), b"secret")?;

        let folder = relative_from_cwd(&base.join("backup"));
        let rule = format!("{}/", base.join("backup/tmp").display());

        let store = Arc::new(MemoryStore::new());
        let report = session(&store, &[rule.as_str()]).sync(&[folder]).await;

        assert_eq!(report.ignored_directories, 1);
        assert_eq!(store.keys(), vec![key_of(&base.join("backup/keep.txt"))]);

        Ok(())
    }

    #[tokio::test]
    async fn test_upload_failures_are_counted() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("a.txt"), b"a")?;
        fs::write(temp_dir.path().join("b.txt"), b"b")?;

        let store = Arc::new(MemoryStore::new());
        store.fail_uploads(true);

        let report = session(&store, &[]).sync(&[temp_dir.path()]).await;
        assert_eq!(report.failed, 2);
        assert_eq!(store.upload_calls(), 2);
        assert!(report.failures.iter().all(|(_, e)| e.starts_with("Store unavailable")));

        Ok(())
    }

    #[tokio::test]
    async fn test_quota_exceeded_fails_only_the_large_file() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("small.txt"), b"1234")?;
        fs::write(temp_dir.path().join("large.bin"), vec![0u8; 64])?;

        let store = Arc::new(MemoryStore::with_quota(16));
        let report = session(&store, &[]).sync(&[temp_dir.path()]).await;

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].0, temp_dir.path().join("large.bin"));

        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_file_is_io_error() {
        let store = Arc::new(MemoryStore::new());
        let mut session = session(&store, &[]);

        let missing = LocalFile {
            path: PathBuf::from("/nonexistent/offsite/a.txt"),
            size: 0,
            is_symlink: false,
        };

        let err = session.process_file(&missing).await.unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));
        assert_eq!(store.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_folder_is_reported_and_others_continue() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("a.txt"), b"a")?;

        let store = Arc::new(MemoryStore::new());
        let missing = temp_dir.path().join("does-not-exist");
        let report = session(&store, &[])
            .sync(&[missing.as_path(), temp_dir.path()])
            .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.uploaded, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_overlapping_folders_upload_once() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let sub = temp_dir.path().join("sub");
        fs::create_dir(&sub)?;
        fs::write(sub.join("shared.txt"), b"shared")?;

        let store = Arc::new(MemoryStore::new());
        let mut session = session(&store, &[]);
        let report = session.sync(&[temp_dir.path(), sub.as_path()]).await;

        assert_eq!(report.uploaded, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.upload_calls(), 1);
        assert_eq!(store.list_calls(), 1);
        assert_eq!(session.cache().len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_report_matches_event_stream() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir(root.join("skip"))?;
        fs::write(root.join("skip/x"), b"x")?;
        fs::write(root.join("a.log"), b"log")?;
        fs::write(root.join("b.txt"), b"b")?;

        let store = Arc::new(MemoryStore::new());
        let mut session = session(&store, &["skip", "*.log"]);
        let mut rx = session.subscribe();

        let report = session.sync(&[root]).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert_eq!(SyncReport::from_events(&events), report);
        assert_eq!(report.ignored_directories, 1);
        assert_eq!(report.ignored_files, 1);
        assert_eq!(report.uploaded, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_before_start() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("a.txt"), b"a")?;

        let store = Arc::new(MemoryStore::new());
        let token = CancellationToken::new();
        token.cancel();

        let mut session = SyncSession::with_cancel(store.clone(), IgnoreMatcher::default(), token);
        let report = session.sync(&[temp_dir.path()]).await;

        assert!(report.cancelled);
        assert_eq!(report.processed(), 0);
        assert_eq!(store.list_calls(), 0);

        Ok(())
    }

    /// Cancels the run as soon as the first upload has been stored
    struct CancelAfterUpload {
        inner: MemoryStore,
        token: CancellationToken,
    }

    #[async_trait]
    impl RemoteStore for CancelAfterUpload {
        async fn list_versions(&self, key: &RemoteKey) -> Result<Vec<RemoteVersion>> {
            self.inner.list_versions(key).await
        }

        async fn upload(&self, key: &RemoteKey, content: Vec<u8>) -> Result<RemoteVersion> {
            let version = self.inner.upload(key, content).await;
            self.token.cancel();
            version
        }

        fn list_all(&self) -> BoxStream<'_, Result<RemoteVersion>> {
            self.inner.list_all()
        }
    }

    #[tokio::test]
    async fn test_cancellation_takes_effect_between_files() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        for name in ["a", "b", "c"] {
            fs::write(temp_dir.path().join(name), name.as_bytes())?;
        }

        let token = CancellationToken::new();
        let store = Arc::new(CancelAfterUpload {
            inner: MemoryStore::new(),
            token: token.clone(),
        });

        let mut session = SyncSession::with_cancel(store.clone(), IgnoreMatcher::default(), token);
        let report = session.sync(&[temp_dir.path()]).await;

        // The in-flight upload completed; nothing after it was started
        assert!(report.cancelled);
        assert_eq!(report.uploaded, 1);
        assert_eq!(store.inner.upload_calls(), 1);
        assert_eq!(store.inner.list_calls(), 1);

        Ok(())
    }
}
