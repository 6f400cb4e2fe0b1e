//! Directory traversal with ignore-rule pruning.
//!
//! Ignored directories are pruned before the walker descends into them, so
//! nothing below an ignored directory is ever stat'ed, hashed or uploaded.

use crate::ignore::IgnoreMatcher;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// A regular file discovered during walking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Path as found below the backup folder
    pub path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Was this reached through a symlink?
    pub is_symlink: bool,
}

impl LocalFile {
    /// Create a LocalFile from a DirEntry.
    /// Symlinks are resolved to their target. Returns None for anything that is
    /// not a regular file: directories, broken links, FIFOs, sockets, devices.
    fn from_entry(entry: &DirEntry) -> std::io::Result<Option<Self>> {
        let raw_metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let is_symlink = raw_metadata.is_symlink();

        let metadata = if is_symlink {
            match std::fs::metadata(&path) {
                Ok(resolved) => resolved,
                Err(_) => {
                    tracing::debug!("Skipping broken symlink: {}", path.display());
                    return Ok(None);
                }
            }
        } else {
            raw_metadata
        };

        // Opening a FIFO or device for reading can block forever
        if !metadata.is_file() {
            if !metadata.is_dir() {
                tracing::info!("Skipping special file: {}", path.display());
            }
            return Ok(None);
        }

        Ok(Some(Self {
            path,
            size: metadata.len(),
            is_symlink,
        }))
    }
}

/// Everything the walker reports for one backup folder
#[derive(Debug, Clone)]
pub enum WalkEntry {
    /// A file to consider for upload
    File(LocalFile),

    /// Directory pruned by a prefix rule; its subtree was not visited
    IgnoredDirectory { path: PathBuf, rule: String },

    /// File excluded by a glob rule
    IgnoredFile { path: PathBuf, rule: String },

    /// Entry that could not be read
    Error { path: PathBuf, error: String },
}

/// Walk a backup folder, reporting each entry to `callback`.
///
/// Directory entries are visited in file-name order. The walk stops as soon as
/// `callback` returns `ControlFlow::Break`.
pub fn walk_folder_with_callback<F>(root: &Path, matcher: &IgnoreMatcher, mut callback: F)
where
    F: FnMut(WalkEntry) -> ControlFlow<()>,
{
    let mut entries = WalkDir::new(root).sort_by_file_name().into_iter();

    while let Some(entry) = entries.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                if callback(WalkEntry::Error { path, error: e.to_string() }).is_break() {
                    return;
                }
                continue;
            }
        };

        let reported = if entry.file_type().is_dir() {
            match matcher.matching_directory_rule(entry.path(), root) {
                Some(rule) => {
                    entries.skip_current_dir();
                    Some(WalkEntry::IgnoredDirectory {
                        path: entry.path().to_path_buf(),
                        rule: rule.pattern().to_string(),
                    })
                }
                None => None,
            }
        } else if let Some(rule) = matcher.matching_file_rule(entry.path(), root) {
            Some(WalkEntry::IgnoredFile {
                path: entry.path().to_path_buf(),
                rule: rule.pattern().to_string(),
            })
        } else {
            match LocalFile::from_entry(&entry) {
                Ok(file) => file.map(WalkEntry::File),
                Err(e) => Some(WalkEntry::Error {
                    path: entry.path().to_path_buf(),
                    error: e.to_string(),
                }),
            }
        };

        if let Some(reported) = reported {
            if callback(reported).is_break() {
                return;
            }
        }
    }
}

/// Walk a backup folder and collect everything it reports
///
/// # Example
/// ```no_run
/// use offsite_agent::fs::walker::{walk_folder, WalkEntry};
/// use offsite_agent::ignore::IgnoreMatcher;
/// use std::path::Path;
///
/// let matcher = IgnoreMatcher::new(&["*.tmp"]).unwrap();
/// let entries = walk_folder(Path::new("/data"), &matcher);
/// let files = entries.iter().filter(|e| matches!(e, WalkEntry::File(_))).count();
/// println!("Found {} files", files);
/// ```
pub fn walk_folder(root: &Path, matcher: &IgnoreMatcher) -> Vec<WalkEntry> {
    let mut entries = Vec::new();
    walk_folder_with_callback(root, matcher, |entry| {
        entries.push(entry);
        ControlFlow::Continue(())
    });
    entries
}
