//! Configuration management for the backup client.
//!
//! Loads the JSON configuration document (TOML is accepted for any other
//! extension) with environment variable overrides for credentials.

use crate::utils::errors::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub credentials: Credentials,

    /// Bucket server URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Folders walked on every run
    pub folders_to_backup: Vec<PathBuf>,

    /// Directory prefixes and file globs to skip
    #[serde(default)]
    pub folders_to_ignore: Vec<String>,

    /// Log file used unless `--show` is given
    #[serde(default = "default_log_output_file")]
    pub log_output_file: PathBuf,

    /// Log level (trace, debug, info, warning, error)
    #[serde(default = "default_log_level")]
    pub log_output_level: String,

    /// Upload body encoding
    #[serde(default)]
    pub compression: Compression,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "keyID")]
    pub key_id: String,

    #[serde(rename = "applicationKey")]
    pub application_key: String,

    #[serde(rename = "bucketName")]
    pub bucket_name: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("application_key", &"<redacted>")
            .field("bucket_name", &self.bucket_name)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Zstd,
    None,
}

// Default values
fn default_endpoint() -> String {
    "http://localhost:3000".to_string()
}

fn default_log_output_file() -> PathBuf {
    PathBuf::from("offsite-backup.log")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load, apply environment overrides and validate
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let mut config = if is_json {
            Self::from_json(&content)?
        } else {
            Self::from_toml(&content)?
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| SyncError::Config(format!("Invalid JSON configuration: {}", e)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| SyncError::Config(format!("Invalid TOML configuration: {}", e)))
    }

    /// Override credentials and endpoint from `OFFSITE_*` variables
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key_id) = lookup("OFFSITE_KEY_ID") {
            self.credentials.key_id = key_id;
        }
        if let Some(application_key) = lookup("OFFSITE_APPLICATION_KEY") {
            self.credentials.application_key = application_key;
        }
        if let Some(endpoint) = lookup("OFFSITE_ENDPOINT") {
            self.endpoint = endpoint;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.credentials.key_id.is_empty() || self.credentials.application_key.is_empty() {
            return Err(SyncError::Config("Credentials are missing keyID or applicationKey".into()));
        }
        if self.credentials.bucket_name.is_empty() {
            return Err(SyncError::Config("Credentials are missing bucketName".into()));
        }
        if self.folders_to_backup.is_empty() {
            return Err(SyncError::Config("folders_to_backup is empty".into()));
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(SyncError::Config(format!("Invalid endpoint: {}", self.endpoint)));
        }
        Ok(())
    }
}
