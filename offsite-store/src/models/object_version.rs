use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One stored version of an object. Serialized in the shape agents expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub id: String,
    pub bucket: String,
    pub key: String,
    pub sha1: String,
    pub size: i64,
    pub uploaded_at: String,
    #[serde(skip)]
    pub blob_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketUsage {
    pub objects: i64,
    pub total_bytes: i64,
}

fn row_to_version(row: &Row) -> rusqlite::Result<ObjectVersion> {
    Ok(ObjectVersion {
        id: row.get("id")?,
        bucket: row.get("bucket")?,
        key: row.get("key")?,
        sha1: row.get("sha1")?,
        size: row.get("size")?,
        uploaded_at: row.get("uploaded_at")?,
        blob_path: row.get("blob_path")?,
    })
}

pub fn new_version_id() -> String {
    Uuid::new_v4().to_string()
}

pub struct CreateVersionData {
    pub id: String,
    pub bucket: String,
    pub key: String,
    pub sha1: String,
    pub size: i64,
    pub blob_path: String,
}

pub fn create(conn: &Connection, data: &CreateVersionData) -> anyhow::Result<ObjectVersion> {
    // Fixed-width timestamps keep text ordering equal to time ordering
    let uploaded_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    conn.execute(
        "INSERT INTO object_versions (id, bucket, key, sha1, size, blob_path, uploaded_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            data.id,
            data.bucket,
            data.key,
            data.sha1,
            data.size,
            data.blob_path,
            uploaded_at
        ],
    )?;
    find_by_id(conn, &data.id)?
        .ok_or_else(|| anyhow::anyhow!("Failed to read back version {}", data.id))
}

/// Insert the version unless it would push the bucket past `max_bytes`.
/// Returns `None` when the quota refuses it. Usage is read and the row written
/// under one write lock, so concurrent uploads cannot both squeeze under the quota.
pub fn create_within_quota(
    conn: &mut Connection,
    data: &CreateVersionData,
    max_bytes: Option<u64>,
) -> anyhow::Result<Option<ObjectVersion>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if let Some(max) = max_bytes {
        let usage = bucket_usage(&tx, &data.bucket)?;
        let needed = usage.total_bytes.max(0) as u64 + data.size.max(0) as u64;
        if needed > max {
            tracing::warn!(bucket = %data.bucket, key = %data.key, needed, max, "Bucket quota exceeded");
            return Ok(None);
        }
    }

    let version = create(&tx, data)?;
    tx.commit()?;
    Ok(Some(version))
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<ObjectVersion>> {
    let mut stmt = conn.prepare("SELECT * FROM object_versions WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_version)?;
    Ok(rows.next().transpose()?)
}

/// All versions of `key`, newest first.
pub fn find_by_key(conn: &Connection, bucket: &str, key: &str) -> anyhow::Result<Vec<ObjectVersion>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM object_versions WHERE bucket = ? AND key = ?
         ORDER BY uploaded_at DESC, rowid DESC",
    )?;
    let rows = stmt.query_map(params![bucket, key], row_to_version)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// The newest version of every key in the bucket, ordered by key.
pub fn find_latest_per_key(conn: &Connection, bucket: &str) -> anyhow::Result<Vec<ObjectVersion>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM object_versions v
         WHERE v.bucket = ?1
           AND v.rowid = (
             SELECT w.rowid FROM object_versions w
             WHERE w.bucket = v.bucket AND w.key = v.key
             ORDER BY w.uploaded_at DESC, w.rowid DESC
             LIMIT 1
           )
         ORDER BY v.key",
    )?;
    let rows = stmt.query_map(params![bucket], row_to_version)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Distinct keys and bytes across every stored version.
pub fn bucket_usage(conn: &Connection, bucket: &str) -> anyhow::Result<BucketUsage> {
    let usage = conn.query_row(
        "SELECT COUNT(DISTINCT key), COALESCE(SUM(size), 0) FROM object_versions WHERE bucket = ?",
        params![bucket],
        |row| {
            Ok(BucketUsage {
                objects: row.get(0)?,
                total_bytes: row.get(1)?,
            })
        },
    )?;
    Ok(usage)
}
