//! Sync events and the run summary folded from them.

use crate::hash::ContentDigest;
use crate::mapper::RemoteKey;
use crate::store::RemoteVersion;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Terminal state of one discovered file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// A version with the same digest already exists under the key
    Skipped { key: RemoteKey, digest: ContentDigest },

    /// A new version was stored
    Uploaded(RemoteVersion),
}

/// Everything observable about a run, in the order it happened
#[derive(Debug, Clone)]
pub enum SyncEvent {
    DirectoryIgnored { path: PathBuf, rule: String },
    FileIgnored { path: PathBuf, rule: String },
    Skipped { path: PathBuf, key: RemoteKey, digest: ContentDigest },
    Uploaded { path: PathBuf, version: RemoteVersion },
    Failed { path: PathBuf, error: String },
    Cancelled,
}

impl SyncEvent {
    pub fn from_outcome(path: PathBuf, outcome: FileOutcome) -> Self {
        match outcome {
            FileOutcome::Skipped { key, digest } => SyncEvent::Skipped { path, key, digest },
            FileOutcome::Uploaded(version) => SyncEvent::Uploaded { path, version },
        }
    }
}

/// Counts per terminal state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub uploaded: usize,
    pub skipped: usize,
    pub ignored_files: usize,
    pub ignored_directories: usize,
    pub failed: usize,
    pub uploaded_bytes: u64,
    pub failures: Vec<(PathBuf, String)>,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn record(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::DirectoryIgnored { .. } => self.ignored_directories += 1,
            SyncEvent::FileIgnored { .. } => self.ignored_files += 1,
            SyncEvent::Skipped { .. } => self.skipped += 1,
            SyncEvent::Uploaded { version, .. } => {
                self.uploaded += 1;
                self.uploaded_bytes += version.size;
            }
            SyncEvent::Failed { path, error } => {
                self.failed += 1;
                self.failures.push((path.clone(), error.clone()));
            }
            SyncEvent::Cancelled => self.cancelled = true,
        }
    }

    pub fn from_events<'a, I>(events: I) -> Self
    where
        I: IntoIterator<Item = &'a SyncEvent>,
    {
        let mut report = Self::default();
        for event in events {
            report.record(event);
        }
        report
    }

    /// Files that reached a terminal state other than ignored
    pub fn processed(&self) -> usize {
        self.uploaded + self.skipped + self.failed
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} uploaded ({}), {} already present, {} failed, {} files and {} directories ignored",
            self.uploaded,
            format_bytes(self.uploaded_bytes),
            self.skipped,
            self.failed,
            self.ignored_files,
            self.ignored_directories
        )?;
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}
