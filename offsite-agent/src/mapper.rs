//! Maps local file paths to bucket object keys.
//!
//! Keys are the file's absolute path with the filesystem root stripped, so
//! the bucket mirrors the local directory structure regardless of which
//! configured backup folder a file was found under.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};
use tracing::warn;

/// Object key in the bucket, always `/`-separated and never starting with `/`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteKey(String);

impl RemoteKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the object key for an absolute local path.
///
/// `.` and `..` are resolved lexically; symlinks are not followed. Root and
/// drive prefixes are dropped.
pub fn remote_key(path: &Path) -> RemoteKey {
    let mut parts: Vec<String> = Vec::new();

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Normal(name) => match name.to_str() {
                Some(name) => parts.push(name.to_string()),
                None => {
                    // Distinct undecodable names can collapse onto one key
                    let lossy = name.to_string_lossy().into_owned();
                    warn!("Path {} is not valid UTF-8, storing it as {}", path.display(), lossy);
                    parts.push(lossy);
                }
            },
        }
    }

    RemoteKey(parts.join("/"))
}
