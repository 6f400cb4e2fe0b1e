use crate::db::connection::DbPool;
use std::fs;
use std::path::Path;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS object_versions (
  id TEXT PRIMARY KEY,
  bucket TEXT NOT NULL,
  key TEXT NOT NULL,
  sha1 TEXT NOT NULL CHECK(length(sha1) = 40),
  size INTEGER NOT NULL CHECK(size >= 0),
  blob_path TEXT NOT NULL,
  uploaded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_object_versions_bucket_key ON object_versions(bucket, key);
CREATE INDEX IF NOT EXISTS idx_object_versions_uploaded_at ON object_versions(uploaded_at DESC);
"#;

pub fn migrate(pool: &DbPool, data_dir: &Path, blobs_dir: &Path) -> anyhow::Result<()> {
    tracing::info!("[DB] Starting database migration...");

    fs::create_dir_all(data_dir)?;
    fs::create_dir_all(blobs_dir)?;

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    tracing::info!("[DB] Migration completed successfully");
    Ok(())
}
