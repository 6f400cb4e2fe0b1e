use crate::auth::{authorize, resolve_bucket};
use crate::blobs::{self, DecodeError};
use crate::error::AppError;
use crate::models::object_version::{self, CreateVersionData, ObjectVersion};
use crate::state::AppState;
use axum::body::to_bytes;
use axum::extract::{Path, Query, Request, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{bucket}", get(get_bucket))
        .route("/{bucket}/versions", get(list_versions))
        .route("/{bucket}/objects", get(list_objects).post(upload_object))
}

#[derive(Serialize)]
pub struct BucketInfo {
    pub name: String,
    pub objects: i64,
    pub total_bytes: i64,
}

#[derive(Deserialize)]
pub struct KeyQuery {
    pub key: Option<String>,
}

impl KeyQuery {
    fn required(self) -> Result<String, AppError> {
        self.key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::BadRequest("Missing key query parameter".into()))
    }
}

async fn get_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    headers: HeaderMap,
) -> Result<Json<BucketInfo>, AppError> {
    authorize(&headers, &state.config)?;
    resolve_bucket(&bucket, &state.config)?;

    let db = state.db.clone();
    let name = bucket.clone();
    let usage = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        object_version::bucket_usage(&conn, &name)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    Ok(Json(BucketInfo {
        name: bucket,
        objects: usage.objects,
        total_bytes: usage.total_bytes,
    }))
}

async fn list_versions(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    Query(query): Query<KeyQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<ObjectVersion>>, AppError> {
    authorize(&headers, &state.config)?;
    resolve_bucket(&bucket, &state.config)?;
    let key = query.required()?;

    let db = state.db.clone();
    let versions = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        object_version::find_by_key(&conn, &bucket, &key)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(versions))
}

async fn list_objects(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<ObjectVersion>>, AppError> {
    authorize(&headers, &state.config)?;
    resolve_bucket(&bucket, &state.config)?;

    let db = state.db.clone();
    let versions = tokio::task::spawn_blocking(move || {
        let conn = db.get()?;
        object_version::find_latest_per_key(&conn, &bucket)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(versions))
}

async fn upload_object(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    Query(query): Query<KeyQuery>,
    headers: HeaderMap,
    request: Request,
) -> Result<Json<ObjectVersion>, AppError> {
    authorize(&headers, &state.config)?;
    resolve_bucket(&bucket, &state.config)?;
    let key = query.required()?;

    let content_encoding = headers
        .get("content-encoding")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    tracing::debug!(bucket = %bucket, key = %key, "Receiving object upload");

    let limit = state.config.max_upload_bytes;
    let body = to_bytes(request.into_body(), limit)
        .await
        .map_err(|e| body_error(e, limit))?;

    let content = blobs::decode_body(content_encoding.as_deref(), Vec::from(body), limit)
        .await
        .map_err(|e| match e {
            DecodeError::TooLarge(limit) => {
                AppError::PayloadTooLarge(format!("Decoded upload exceeds {} bytes", limit))
            }
            DecodeError::Internal(e) => AppError::Internal(e),
            other => AppError::BadRequest(format!("Invalid body: {}", other)),
        })?;

    let version_id = object_version::new_version_id();
    let blob = blobs::write_blob(&state.config.blobs_dir, &bucket, &version_id, content).await?;

    let data = CreateVersionData {
        id: version_id,
        bucket: bucket.clone(),
        key: key.clone(),
        sha1: blob.sha1.clone(),
        size: blob.size as i64,
        blob_path: blob.path.to_string_lossy().to_string(),
    };

    let db = state.db.clone();
    let max_bucket_bytes = state.config.max_bucket_bytes;
    let created = tokio::task::spawn_blocking(move || {
        let mut conn = db.get()?;
        object_version::create_within_quota(&mut conn, &data, max_bucket_bytes)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e));

    match created {
        Ok(Ok(Some(version))) => {
            tracing::info!(bucket = %bucket, key = %key, sha1 = %version.sha1, size = version.size, "Stored new version");
            Ok(Json(version))
        }
        Ok(Ok(None)) => {
            blobs::remove_blob(&blob.path).await;
            Err(AppError::InsufficientStorage(format!(
                "Bucket {} would exceed its quota",
                bucket
            )))
        }
        Ok(Err(e)) | Err(e) => {
            blobs::remove_blob(&blob.path).await;
            Err(e.into())
        }
    }
}

/// `to_bytes` reports an over-long body through its error source chain
fn body_error(err: axum::Error, limit: usize) -> AppError {
    let too_large = std::error::Error::source(&err)
        .is_some_and(|source| source.is::<http_body_util::LengthLimitError>());
    if too_large {
        AppError::PayloadTooLarge(format!("Upload exceeds {} bytes", limit))
    } else {
        AppError::BadRequest(format!("Read error: {}", err))
    }
}
