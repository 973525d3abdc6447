//! The backend seam: one operation contract, two complete implementations.
//!
//! Local-vs-remote branching happens once, at configuration time, by
//! selecting which [`ObjectStore`] implementation the facade holds. Call
//! sites never branch on the backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::StorageError;

/// Upload progress callback. Receives whole percentages; successive values
/// are non-decreasing and the final call reports 100.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Which implementation is serving storage operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Filesystem fallback under a configured root.
    Local,
    /// Remote object store.
    Remote,
}

/// One row of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectEntry {
    /// Object key relative to the store root.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time, when the backend reports one.
    pub modified_at: Option<DateTime<Utc>>,
}

/// Presigned URL for upload or download.
///
/// Local-fallback URLs share this shape so degradation is transparent to
/// callers.
#[derive(Debug, Clone)]
pub struct PresignedUrl {
    /// The URL to transfer against.
    pub url: String,
    /// HTTP method to use (PUT for upload, GET for download).
    pub method: String,
    /// When the URL expires.
    pub expires_at: DateTime<Utc>,
    /// Required headers for the request. Deliberately empty for uploads:
    /// the signature covers only the minimal header set so a browser's own
    /// `Content-Type` cannot invalidate it.
    pub headers: HashMap<String, String>,
}

/// Result of a connectivity self-test. Never an `Err`; operator UIs render
/// this directly.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    /// Whether the remote store answered.
    pub success: bool,
    /// Failure description, if any.
    pub error: Option<String>,
    /// Buckets confirmed reachable.
    pub reachable_buckets: Option<Vec<String>>,
}

impl ConnectionReport {
    /// Successful probe of one bucket.
    #[must_use]
    pub fn reachable(bucket: impl Into<String>) -> Self {
        Self {
            success: true,
            error: None,
            reachable_buckets: Some(vec![bucket.into()]),
        }
    }

    /// Failed probe.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            reachable_buckets: None,
        }
    }

    /// No remote store is configured; serving from the local fallback.
    #[must_use]
    pub fn not_configured() -> Self {
        Self::failed("remote object store not configured; serving from local fallback")
    }
}

/// Invoke a progress callback when one was supplied.
pub(crate) fn notify_progress(progress: Option<&ProgressFn>, pct: u8) {
    if let Some(callback) = progress {
        callback(pct);
    }
}

/// Absolute expiry timestamp for a validity window.
pub(crate) fn expires_at(expires_in: Duration) -> DateTime<Utc> {
    let secs = i64::try_from(expires_in.as_secs()).unwrap_or(i64::MAX);
    chrono::TimeDelta::try_seconds(secs)
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
}

/// The operation set a media-management application needs from a storage
/// backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Store a payload under `key`, single-shot.
    async fn put<'a>(
        &self,
        key: &str,
        payload: Bytes,
        content_type: &str,
        metadata: Option<&'a HashMap<String, String>>,
    ) -> Result<(), StorageError>;

    /// Store a large payload under `key` in `chunk_bytes` parts with bounded
    /// part concurrency. On any part failure the whole transfer is aborted
    /// and already-uploaded parts are cleaned up best-effort.
    async fn put_multipart<'a>(
        &self,
        key: &str,
        payload: Bytes,
        content_type: &str,
        metadata: Option<&'a HashMap<String, String>>,
        chunk_bytes: u64,
        progress: Option<ProgressFn>,
    ) -> Result<(), StorageError>;

    /// Read a whole object back.
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Existence check without downloading the body.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Delete one object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Delete a set of objects, chunked to the backend batch limit.
    async fn delete_many(&self, keys: &[String]) -> Result<(), StorageError>;

    /// Enumerate up to `max_keys` objects under `prefix`.
    async fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<ObjectEntry>, StorageError>;

    /// Issue a time-limited upload URL for `key`.
    async fn presign_upload(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<PresignedUrl, StorageError>;

    /// Issue a time-limited download URL for `key`, optionally forcing an
    /// attachment disposition with the given filename.
    async fn presign_download<'a>(
        &self,
        key: &str,
        expires_in: Duration,
        filename: Option<&'a str>,
    ) -> Result<PresignedUrl, StorageError>;

    /// Cheapest possible connectivity probe. Always returns a report.
    async fn check(&self) -> ConnectionReport;
}
