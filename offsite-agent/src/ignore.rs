//! Ignore rules for directories and files.
//!
//! Every configured pattern yields two rules with different semantics:
//! a directory rule matched as a plain string prefix, and a file rule matched
//! as a shell glob (`*` also crosses `/`). Trailing separators are stripped
//! from the pattern for both. Rules are tried in configuration order and the
//! first hit wins.
//!
//! Paths are matched in the form the walk produced them, so a folder
//! configured as `./backup/` is pruned by `./backup/tmp/`. A relative walk
//! path is also matched in its absolute form so absolute rules still apply.
//! Patterns without a leading `/` are additionally tested against the path
//! relative to the backup folder being walked, so `cache/` prunes
//! `<folder>/cache` wherever the folder lives.

use crate::utils::errors::{Result, SyncError};
use globset::{GlobBuilder, GlobMatcher};
use std::path::{is_separator, Component, Path, PathBuf};

/// Prefix rule applied before descending into a directory
#[derive(Debug, Clone)]
pub struct DirectoryRule {
    prefix: String,
    relative: bool,
}

impl DirectoryRule {
    pub fn new(pattern: &str) -> Option<Self> {
        let prefix = strip_trailing_separators(pattern);
        if prefix.is_empty() {
            return None;
        }
        Some(Self {
            prefix: prefix.to_string(),
            relative: !Path::new(prefix).has_root(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.prefix
    }

    fn matches(&self, forms: &PathForms) -> bool {
        forms.full().any(|full| full.starts_with(&self.prefix))
            || (self.relative && forms.relative.as_deref().is_some_and(|rel| rel.starts_with(&self.prefix)))
    }
}

/// Glob rule applied to every file path
#[derive(Debug, Clone)]
pub struct FileRule {
    pattern: String,
    glob: GlobMatcher,
    relative: bool,
}

impl FileRule {
    pub fn new(pattern: &str) -> Result<Option<Self>> {
        let pattern = strip_trailing_separators(pattern);
        if pattern.is_empty() {
            return Ok(None);
        }

        let glob = GlobBuilder::new(pattern)
            .literal_separator(false)
            .build()
            .map_err(|e| SyncError::Config(format!("Invalid ignore pattern {}: {}", pattern, e)))?
            .compile_matcher();

        Ok(Some(Self {
            pattern: pattern.to_string(),
            glob,
            relative: !Path::new(pattern).has_root(),
        }))
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn matches(&self, forms: &PathForms) -> bool {
        forms.full().any(|full| self.glob.is_match(full))
            || (self.relative && forms.relative.as_deref().is_some_and(|rel| self.glob.is_match(rel)))
    }
}

/// Compiled ignore configuration
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    directory_rules: Vec<DirectoryRule>,
    file_rules: Vec<FileRule>,
}

impl IgnoreMatcher {
    /// Compile the configured patterns. An invalid glob is a configuration error.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut directory_rules = Vec::with_capacity(patterns.len());
        let mut file_rules = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let pattern = pattern.as_ref();
            match (DirectoryRule::new(pattern), FileRule::new(pattern)?) {
                (Some(dir), Some(file)) => {
                    directory_rules.push(dir);
                    file_rules.push(file);
                }
                _ => tracing::warn!("Skipping empty ignore pattern {:?}", pattern),
            }
        }

        Ok(Self { directory_rules, file_rules })
    }

    /// First directory rule matching `path`, if any
    pub fn matching_directory_rule(&self, path: &Path, root: &Path) -> Option<&DirectoryRule> {
        let forms = PathForms::new(path, root);
        self.directory_rules.iter().find(|rule| rule.matches(&forms))
    }

    /// First file rule matching `path`, if any
    pub fn matching_file_rule(&self, path: &Path, root: &Path) -> Option<&FileRule> {
        let forms = PathForms::new(path, root);
        self.file_rules.iter().find(|rule| rule.matches(&forms))
    }

    pub fn should_ignore_directory(&self, path: &Path, root: &Path) -> bool {
        self.matching_directory_rule(path, root).is_some()
    }

    pub fn should_ignore_file(&self, path: &Path, root: &Path) -> bool {
        self.matching_file_rule(path, root).is_some()
    }

    pub fn directory_rules(&self) -> &[DirectoryRule] {
        &self.directory_rules
    }

    pub fn file_rules(&self) -> &[FileRule] {
        &self.file_rules
    }
}

fn strip_trailing_separators(pattern: &str) -> &str {
    pattern.trim_end_matches(is_separator)
}

/// The spellings of one walked path that rules are tested against
struct PathForms {
    as_walked: String,
    absolute: Option<String>,
    relative: Option<String>,
}

impl PathForms {
    fn new(path: &Path, root: &Path) -> Self {
        let absolute = if path.is_absolute() {
            None
        } else {
            std::path::absolute(path).ok().map(|p| lexical_normalize(&p))
        };

        Self {
            as_walked: path.to_string_lossy().into_owned(),
            absolute,
            relative: relative_to(path, root),
        }
    }

    fn full(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.as_walked.as_str()).chain(self.absolute.as_deref())
    }
}

/// Drop `.` and resolve `..` without touching the filesystem
fn lexical_normalize(path: &Path) -> String {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized.to_string_lossy().into_owned()
}

/// Path below the backup folder, `/`-joined; `None` for the folder itself
fn relative_to(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    if rel.as_os_str().is_empty() {
        return None;
    }
    let parts: Vec<_> = rel.iter().map(|c| c.to_string_lossy()).collect();
    Some(parts.join("/"))
}
