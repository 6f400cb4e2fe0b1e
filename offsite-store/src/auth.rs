use crate::config::AppConfig;
use crate::error::AppError;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

/// Check `authorization: Bearer <keyID>:<applicationKey>` against the configured account.
pub fn authorize(headers: &HeaderMap, config: &AppConfig) -> Result<(), AppError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Expected a bearer token".into()))?;

    let (key_id, application_key) = token
        .split_once(':')
        .ok_or_else(|| AppError::Unauthorized("Malformed bearer token".into()))?;

    let key_ok = key_id == config.key_id;
    let secret_ok = constant_time_eq(application_key.as_bytes(), config.application_key.as_bytes());
    if key_ok && secret_ok {
        Ok(())
    } else {
        Err(AppError::Unauthorized("Invalid credentials".into()))
    }
}

/// Resolve a bucket name from the path; unknown buckets are 404.
pub fn resolve_bucket(bucket: &str, config: &AppConfig) -> Result<(), AppError> {
    if config.has_bucket(bucket) {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("Bucket not found: {}", bucket)))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
