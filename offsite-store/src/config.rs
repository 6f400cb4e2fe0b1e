use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub blobs_dir: PathBuf,
    pub log_level: String,
    pub key_id: String,
    pub application_key: String,
    pub buckets: Vec<String>,
    pub max_bucket_bytes: Option<u64>,
    /// Largest accepted upload, both on the wire and after decompression
    pub max_upload_bytes: usize,
}

const DEFAULT_MAX_UPLOAD_BYTES: usize = 1 << 30;

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = PathBuf::from(lookup("DATA_DIR").unwrap_or_else(|| "./data".into()));

        let key_id = lookup("STORE_KEY_ID")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow::anyhow!("STORE_KEY_ID is not set"))?;
        let application_key = lookup("STORE_APPLICATION_KEY")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow::anyhow!("STORE_APPLICATION_KEY is not set"))?;

        let buckets: Vec<String> = lookup("BUCKETS")
            .unwrap_or_else(|| "backups".into())
            .split(',')
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();

        if buckets.is_empty() {
            anyhow::bail!("BUCKETS must name at least one bucket");
        }
        if let Some(bad) = buckets.iter().find(|b| !is_valid_bucket_name(b)) {
            anyhow::bail!("Invalid bucket name: {}", bad);
        }

        let max_bucket_bytes = match lookup("MAX_BUCKET_BYTES") {
            Some(v) => Some(
                v.parse()
                    .map_err(|e| anyhow::anyhow!("Invalid MAX_BUCKET_BYTES {}: {}", v, e))?,
            ),
            None => None,
        };

        let max_upload_bytes = match lookup("MAX_UPLOAD_BYTES") {
            Some(v) => v
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid MAX_UPLOAD_BYTES {}: {}", v, e))?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            port: lookup("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            db_path: data_dir.join("offsite-store.db"),
            blobs_dir: data_dir.join("blobs"),
            data_dir,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            key_id,
            application_key,
            buckets,
            max_bucket_bytes,
            max_upload_bytes,
        })
    }

    pub fn has_bucket(&self, name: &str) -> bool {
        self.buckets.iter().any(|b| b == name)
    }
}

/// Bucket names end up as directory names under the blob store
fn is_valid_bucket_name(name: &str) -> bool {
    !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("STORE_KEY_ID", "k"),
            ("STORE_APPLICATION_KEY", "s"),
        ]))
        .unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.buckets, vec!["backups".to_string()]);
        assert_eq!(config.max_bucket_bytes, None);
        assert_eq!(config.max_upload_bytes, 1 << 30);
        assert_eq!(config.blobs_dir, PathBuf::from("./data/blobs"));
    }

    #[test]
    fn test_bucket_list_and_quota() {
        let config = AppConfig::from_lookup(lookup(&[
            ("STORE_KEY_ID", "k"),
            ("STORE_APPLICATION_KEY", "s"),
            ("BUCKETS", "photos, documents,"),
            ("MAX_BUCKET_BYTES", "1048576"),
        ]))
        .unwrap();

        assert!(config.has_bucket("photos"));
        assert!(config.has_bucket("documents"));
        assert!(!config.has_bucket(""));
        assert_eq!(config.max_bucket_bytes, Some(1_048_576));
    }

    #[test]
    fn test_upload_limit() {
        let config = AppConfig::from_lookup(lookup(&[
            ("STORE_KEY_ID", "k"),
            ("STORE_APPLICATION_KEY", "s"),
            ("MAX_UPLOAD_BYTES", "4096"),
        ]))
        .unwrap();
        assert_eq!(config.max_upload_bytes, 4096);

        let result = AppConfig::from_lookup(lookup(&[
            ("STORE_KEY_ID", "k"),
            ("STORE_APPLICATION_KEY", "s"),
            ("MAX_UPLOAD_BYTES", "lots"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_credentials() {
        assert!(AppConfig::from_lookup(lookup(&[("STORE_KEY_ID", "k")])).is_err());
    }

    #[test]
    fn test_rejects_path_like_bucket() {
        let result = AppConfig::from_lookup(lookup(&[
            ("STORE_KEY_ID", "k"),
            ("STORE_APPLICATION_KEY", "s"),
            ("BUCKETS", "../etc"),
        ]));
        assert!(result.is_err());
    }
}
