//! HTTP client for the `offsite-store` bucket server.

use super::{RemoteStore, RemoteVersion};
use crate::config::{Compression, Credentials};
use crate::mapper::RemoteKey;
use crate::utils::errors::{Result, SyncError};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Summary returned when the bucket is resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    pub objects: u64,
    pub total_bytes: u64,
}

/// Bucket on an `offsite-store` server
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    authorization: String,
    compression: Compression,
}

impl HttpStore {
    pub fn new(endpoint: &str, credentials: &Credentials, compression: Compression) -> Result<Self> {
        Self::with_read_timeout(endpoint, credentials, compression, READ_TIMEOUT)
    }

    /// Like `new`, failing any request whose response stalls for `read_timeout`
    pub fn with_read_timeout(
        endpoint: &str,
        credentials: &Credentials,
        compression: Compression,
        read_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: endpoint.trim_end_matches('/').to_string(),
            bucket: credentials.bucket_name.clone(),
            authorization: format!(
                "Bearer {}:{}",
                credentials.key_id, credentials.application_key
            ),
            compression,
        })
    }

    /// Create a client and verify the credentials against the bucket before any work starts
    pub async fn connect(
        endpoint: &str,
        credentials: &Credentials,
        compression: Compression,
    ) -> Result<Self> {
        let store = Self::new(endpoint, credentials, compression)?;
        let info = store.authorize().await?;
        info!(
            "Authorized against bucket {} ({} objects, {} bytes)",
            info.name, info.objects, info.total_bytes
        );
        Ok(store)
    }

    /// Resolve the bucket. Rejected credentials are an `Auth` error, an unknown bucket a `Config` error.
    pub async fn authorize(&self) -> Result<BucketInfo> {
        let resp = self
            .client
            .get(self.bucket_url(""))
            .header("authorization", &self.authorization)
            .send()
            .await
            .map_err(unavailable)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(SyncError::Config(format!("Bucket not found: {}", self.bucket)));
        }

        let resp = check_status(resp).await?;
        resp.json::<BucketInfo>().await.map_err(unavailable)
    }

    fn bucket_url(&self, suffix: &str) -> String {
        format!("{}/api/buckets/{}{}", self.base_url, self.bucket, suffix)
    }

    async fn fetch_objects(&self) -> Result<Vec<RemoteVersion>> {
        let resp = self
            .client
            .get(self.bucket_url("/objects"))
            .header("authorization", &self.authorization)
            .send()
            .await
            .map_err(unavailable)?;

        check_status(resp)
            .await?
            .json::<Vec<RemoteVersion>>()
            .await
            .map_err(unavailable)
    }
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn list_versions(&self, key: &RemoteKey) -> Result<Vec<RemoteVersion>> {
        debug!("Listing versions of {}", key);

        let resp = self
            .client
            .get(self.bucket_url("/versions"))
            .query(&[("key", key.as_str())])
            .header("authorization", &self.authorization)
            .send()
            .await
            .map_err(unavailable)?;

        check_status(resp)
            .await?
            .json::<Vec<RemoteVersion>>()
            .await
            .map_err(unavailable)
    }

    async fn upload(&self, key: &RemoteKey, content: Vec<u8>) -> Result<RemoteVersion> {
        let request = self
            .client
            .post(self.bucket_url("/objects"))
            .query(&[("key", key.as_str())])
            .header("authorization", &self.authorization)
            .header("content-type", "application/octet-stream");

        let request = match self.compression {
            Compression::Zstd => {
                let compressed = tokio::task::spawn_blocking(move || {
                    zstd::encode_all(content.as_slice(), zstd::DEFAULT_COMPRESSION_LEVEL)
                })
                .await
                .map_err(|e| SyncError::Io(std::io::Error::other(e)))??;

                request.header("content-encoding", "zstd").body(compressed)
            }
            Compression::None => request.body(content),
        };

        let resp = request.send().await.map_err(unavailable)?;

        check_status(resp)
            .await?
            .json::<RemoteVersion>()
            .await
            .map_err(unavailable)
    }

    fn list_all(&self) -> BoxStream<'_, Result<RemoteVersion>> {
        stream::once(self.fetch_objects())
            .flat_map(|result| {
                let items: Vec<Result<RemoteVersion>> = match result {
                    Ok(versions) => versions.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(items)
            })
            .boxed()
    }
}

fn unavailable(e: reqwest::Error) -> SyncError {
    SyncError::StoreUnavailable(e.to_string())
}

/// Map a failed response onto the error taxonomy
pub(crate) fn status_error(status: StatusCode, body: &str) -> SyncError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Auth(detail),
        StatusCode::INSUFFICIENT_STORAGE | StatusCode::PAYLOAD_TOO_LARGE => {
            SyncError::QuotaExceeded(detail)
        }
        _ => SyncError::StoreUnavailable(detail),
    }
}

async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}
