//! Remote object store client over Apache OpenDAL.
//!
//! The operator is built once per configuration and carries the transport
//! policy: OpenDAL's retry layer handles transient errors with increasing
//! backoff up to the configured budget, and the timeout layer bounds every
//! call to `request_timeout_ms`. Permission and signature failures are never
//! retried.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use opendal::layers::{RetryLayer, TimeoutLayer};
use opendal::{Operator, services};
use tracing::{error, warn};

use mediark_shared::{EncryptionMode, StorageConfig};

use super::error::StorageError;
use super::store::{
    BackendKind, ConnectionReport, ObjectEntry, ObjectStore, PresignedUrl, ProgressFn, expires_at,
    notify_progress,
};

/// Fixed bound on concurrently in-flight multipart parts.
pub const PART_CONCURRENCY: usize = 4;
/// Keys per delete batch, matching the common backend delete limit.
pub const DELETE_BATCH: usize = 1000;
/// Concurrent single deletes within one batch.
const DELETE_CONCURRENCY: usize = 8;

/// S3-compatible object store client.
#[derive(Debug)]
pub struct RemoteStore {
    op: Operator,
    bucket: String,
}

impl RemoteStore {
    /// Build a client from configuration.
    ///
    /// The operator is fully constructed here so that configuration swaps
    /// can replace the old client atomically.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when the config fails validation or lacks a
    /// bucket or credentials.
    pub fn connect(config: &StorageConfig) -> Result<Self, StorageError> {
        config
            .validate()
            .map_err(|e| StorageError::configuration(e.to_string()))?;
        if !config.has_bucket() {
            return Err(StorageError::configuration(
                "remote bucket not configured",
            ));
        }
        let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        else {
            return Err(StorageError::configuration(
                "remote credentials not configured",
            ));
        };

        let mut builder = services::S3::default()
            .bucket(&config.bucket)
            .region(&config.region)
            .access_key_id(access_key_id)
            .secret_access_key(secret_access_key)
            .default_storage_class(config.storage_class.as_str());
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint(endpoint);
        }
        builder = match config.server_side_encryption {
            EncryptionMode::None => builder,
            EncryptionMode::Aes256 => builder.server_side_encryption_with_s3_key(),
            EncryptionMode::Kms => builder.server_side_encryption_with_aws_managed_kms_key(),
        };

        let op = Operator::new(builder)
            .map_err(|e| StorageError::configuration(e.to_string()))?
            .finish()
            .layer(RetryLayer::new().with_max_times(config.max_retries as usize))
            .layer(TimeoutLayer::new().with_timeout(Duration::from_millis(config.request_timeout_ms)));

        Ok(Self {
            op,
            bucket: config.bucket.clone(),
        })
    }

    /// Bucket this client targets.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn op_err(&self, operation: &'static str, key: &str, err: &opendal::Error) -> StorageError {
        let mapped = StorageError::from_opendal(err, operation, &self.bucket, key);
        if matches!(mapped, StorageError::PermissionOrSignature { .. }) {
            error!(bucket = %self.bucket, key = %key, operation, "remote operation denied");
        }
        mapped
    }
}

#[async_trait]
impl ObjectStore for RemoteStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn put<'a>(
        &self,
        key: &str,
        payload: Bytes,
        content_type: &str,
        metadata: Option<&'a HashMap<String, String>>,
    ) -> Result<(), StorageError> {
        let mut write = self.op.write_with(key, payload).content_type(content_type);
        if let Some(meta) = metadata {
            write = write.user_metadata(meta.clone());
        }
        write
            .await
            .map(|_| ())
            .map_err(|e| self.op_err("put", key, &e))
    }

    async fn put_multipart<'a>(
        &self,
        key: &str,
        payload: Bytes,
        content_type: &str,
        metadata: Option<&'a HashMap<String, String>>,
        chunk_bytes: u64,
        progress: Option<ProgressFn>,
    ) -> Result<(), StorageError> {
        let total = payload.len();
        let chunk = usize::try_from(chunk_bytes.max(1)).unwrap_or(usize::MAX);

        let mut writer_options = self
            .op
            .writer_with(key)
            .chunk(chunk)
            .concurrent(PART_CONCURRENCY)
            .content_type(content_type);
        if let Some(meta) = metadata {
            writer_options = writer_options.user_metadata(meta.clone());
        }
        let mut writer = writer_options
            .await
            .map_err(|e| self.op_err("multipart_init", key, &e))?;

        let mut sent = 0usize;
        while sent < total {
            let end = usize::min(sent + chunk, total);
            let part = payload.slice(sent..end);
            if let Err(e) = writer.write(part).await {
                if let Err(abort_err) = writer.abort().await {
                    warn!(bucket = %self.bucket, key = %key, error = %abort_err,
                        "failed to clean up aborted multipart upload");
                }
                return Err(StorageError::multipart_aborted(key, e.to_string()));
            }
            sent = end;
            notify_progress(progress.as_ref(), u8::try_from(sent * 100 / total).unwrap_or(100));
        }

        if let Err(e) = writer.close().await {
            if let Err(abort_err) = writer.abort().await {
                warn!(bucket = %self.bucket, key = %key, error = %abort_err,
                    "failed to clean up aborted multipart upload");
            }
            return Err(StorageError::multipart_aborted(key, e.to_string()));
        }
        if total == 0 {
            notify_progress(progress.as_ref(), 100);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        self.op
            .read(key)
            .await
            .map(|buffer| buffer.to_bytes())
            .map_err(|e| self.op_err("get", key, &e))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.op.stat(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.op_err("head", key, &e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self.op.delete(key).await {
            Ok(()) => Ok(()),
            // idempotent delete
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.op_err("delete", key, &e)),
        }
    }

    /// Delete a set of keys, chunked into batches of [`DELETE_BATCH`] with at
    /// most [`DELETE_CONCURRENCY`] deletes in flight per batch.
    async fn delete_many(&self, keys: &[String]) -> Result<(), StorageError> {
        for batch in keys.chunks(DELETE_BATCH) {
            stream::iter(batch.iter().map(Ok::<_, StorageError>))
                .try_for_each_concurrent(DELETE_CONCURRENCY, |key| self.delete(key))
                .await?;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<ObjectEntry>, StorageError> {
        let mut lister = self
            .op
            .lister_with(prefix)
            .recursive(true)
            .await
            .map_err(|e| self.op_err("list", prefix, &e))?
            .boxed();

        let mut entries = Vec::new();
        while let Some(entry) = lister
            .try_next()
            .await
            .map_err(|e| self.op_err("list", prefix, &e))?
        {
            let meta = entry.metadata();
            if meta.mode().is_dir() {
                continue;
            }
            entries.push(ObjectEntry {
                key: entry.path().to_string(),
                size: meta.content_length(),
                modified_at: meta
                    .last_modified()
                    .map(|t| DateTime::<Utc>::from(SystemTime::from(t))),
            });
            if entries.len() >= max_keys {
                break;
            }
        }
        Ok(entries)
    }

    /// Issue an upload URL signing **only** the minimal header set.
    ///
    /// `Content-Type` is deliberately excluded from the signature: a
    /// browser's native `PUT` sets its own `Content-Type`, which the issuing
    /// server does not control, and including it would make every direct
    /// browser upload fail signature verification. The returned `headers`
    /// map is empty for the same reason.
    async fn presign_upload(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<PresignedUrl, StorageError> {
        let presigned = self
            .op
            .presign_write(key, expires_in)
            .await
            .map_err(|e| self.op_err("presign_upload", key, &e))?;

        Ok(PresignedUrl {
            url: presigned.uri().to_string(),
            method: presigned.method().to_string(),
            expires_at: expires_at(expires_in),
            headers: HashMap::new(),
        })
    }

    async fn presign_download<'a>(
        &self,
        key: &str,
        expires_in: Duration,
        filename: Option<&'a str>,
    ) -> Result<PresignedUrl, StorageError> {
        let presigned = match filename {
            Some(name) => {
                let disposition = format!("attachment; filename=\"{name}\"");
                self.op
                    .presign_read_with(key, expires_in)
                    .override_content_disposition(&disposition)
                    .await
            }
            None => self.op.presign_read(key, expires_in).await,
        }
        .map_err(|e| self.op_err("presign_download", key, &e))?;

        Ok(PresignedUrl {
            url: presigned.uri().to_string(),
            method: presigned.method().to_string(),
            expires_at: expires_at(expires_in),
            headers: HashMap::new(),
        })
    }

    async fn check(&self) -> ConnectionReport {
        match self.op.check().await {
            Ok(()) => ConnectionReport::reachable(self.bucket.clone()),
            Err(e) => ConnectionReport::failed(e.to_string()),
        }
    }
}
