//! Object content on disk, one file per version under `<blobs_dir>/<bucket>/<version-id>`.

use sha1::{Digest, Sha1};
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::fs;

pub struct StoredBlob {
    pub path: PathBuf,
    pub sha1: String,
    pub size: u64,
}

pub fn blob_path(blobs_dir: &Path, bucket: &str, version_id: &str) -> PathBuf {
    blobs_dir.join(bucket).join(version_id)
}

pub fn sha1_hex(content: &[u8]) -> String {
    hex::encode(Sha1::digest(content))
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Decoded body exceeds {0} bytes")]
    TooLarge(usize),
    #[error("Unsupported content-encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("Invalid zstd body: {0}")]
    Invalid(#[from] std::io::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Decode a request body according to its `content-encoding`, refusing more than `limit` bytes of output.
pub async fn decode_body(
    encoding: Option<&str>,
    body: Vec<u8>,
    limit: usize,
) -> Result<Vec<u8>, DecodeError> {
    match encoding {
        None | Some("identity") => Ok(body),
        Some("zstd") => tokio::task::spawn_blocking(move || decode_zstd(&body, limit))
            .await
            .map_err(|e| anyhow::anyhow!(e))?,
        Some(other) => Err(DecodeError::UnsupportedEncoding(other.to_string())),
    }
}

fn decode_zstd(body: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
    let decoder = zstd::stream::read::Decoder::new(body)?;
    let mut decoded = Vec::new();
    // One byte past the limit tells a full body from an oversized one
    decoder.take(limit as u64 + 1).read_to_end(&mut decoded)?;
    if decoded.len() > limit {
        return Err(DecodeError::TooLarge(limit));
    }
    Ok(decoded)
}

/// Write `content` for a new version. The file appears under its final name only once complete.
pub async fn write_blob(
    blobs_dir: &Path,
    bucket: &str,
    version_id: &str,
    content: Vec<u8>,
) -> anyhow::Result<StoredBlob> {
    let path = blob_path(blobs_dir, bucket, version_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let size = content.len() as u64;
    let (sha1, content) = tokio::task::spawn_blocking(move || (sha1_hex(&content), content))
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    let tmp_path = path.with_extension("partial");
    let written = match fs::write(&tmp_path, &content).await {
        Ok(()) => fs::rename(&tmp_path, &path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        remove_blob(&tmp_path).await;
        return Err(e.into());
    }

    Ok(StoredBlob { path, sha1, size })
}

pub async fn remove_blob(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        tracing::warn!("Failed to remove blob {}: {}", path.display(), e);
    }
}
