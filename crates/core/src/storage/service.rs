//! Storage facade.
//!
//! Holds the current configuration and whichever [`ObjectStore`]
//! implementation matches it, dispatches every public operation to that
//! backend, and records operation metrics. Reconfiguration builds the new
//! backend completely before swapping the shared reference, so in-flight
//! operations finish against a consistent client.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mediark_shared::{ConfigProvider, RedactedConfig, StorageConfig, StorageConfigPatch};

use super::error::StorageError;
use super::key::{self, AssetKind, VariantKeySet};
use super::local::LocalStore;
use super::metrics::{MetricsSink, OpKind, TransferMetrics};
use super::remote::RemoteStore;
use super::store::{
    ConnectionReport, ObjectEntry, ObjectStore, PresignedUrl, ProgressFn, expires_at,
    notify_progress,
};

/// Configuration state of the facade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageState {
    /// No backend selected yet.
    #[default]
    Unconfigured,
    /// No usable remote credentials; filesystem fallback in service.
    LocalOnly,
    /// Remote client live.
    Remote,
}

/// Aggregate numbers for operator dashboards. O(number of objects) to
/// compute; not for hot paths.
#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    /// Sum of object sizes under the assets prefix.
    pub total_size: u64,
    /// Number of objects under the assets prefix.
    pub file_count: u64,
    /// Largest single object, if any.
    pub largest_file: Option<ObjectEntry>,
}

/// Structured status for operator UIs. Never fails to produce.
#[derive(Debug, Clone, Serialize)]
pub struct StorageStatus {
    /// Current facade state.
    pub state: StorageState,
    /// Whether a non-placeholder bucket is configured (enough for unsigned
    /// public-style URLs, even without credentials).
    pub is_configured: bool,
    /// Active configuration, secrets redacted.
    pub config: RedactedConfig,
    /// Accumulated transfer metrics.
    pub metrics: TransferMetrics,
}

struct Backend {
    config: StorageConfig,
    store: Arc<dyn ObjectStore>,
    state: StorageState,
}

/// Storage facade for media assets.
pub struct StorageService {
    backend: RwLock<Arc<Backend>>,
    provider: ConfigProvider,
    metrics: MetricsSink,
}

const DEFAULT_LIST_LIMIT: usize = 1000;
const STATS_SCAN_LIMIT: usize = 100_000;

impl StorageService {
    /// Build the facade from the configuration provider.
    ///
    /// Reads environment defaults merged with persisted overrides, then
    /// transitions into `Remote` or `LocalOnly` depending on what the
    /// configuration allows.
    ///
    /// # Errors
    ///
    /// Returns an error only when the local fallback root cannot be
    /// prepared.
    pub async fn initialize(provider: ConfigProvider) -> Result<Self, StorageError> {
        let config = provider.reload().await;
        let backend = build_backend(config).await?;
        info!(state = ?backend.state, "storage facade initialized");
        Ok(Self {
            backend: RwLock::new(Arc::new(backend)),
            provider,
            metrics: MetricsSink::new(),
        })
    }

    #[cfg(test)]
    fn from_parts(config: StorageConfig, store: Arc<dyn ObjectStore>, state: StorageState) -> Self {
        Self {
            backend: RwLock::new(Arc::new(Backend {
                config,
                store,
                state,
            })),
            provider: ConfigProvider::without_store(),
            metrics: MetricsSink::new(),
        }
    }

    fn current(&self) -> Arc<Backend> {
        self.backend
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current facade state.
    #[must_use]
    pub fn state(&self) -> StorageState {
        self.current().state
    }

    /// Generate a storage key for a new upload.
    #[must_use]
    pub fn generate_key(&self, original_filename: &str, kind: AssetKind, owner_id: Uuid) -> String {
        key::generate_key(original_filename, kind, owner_id)
    }

    /// Derive variant keys for an original asset key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for keys outside the assets hierarchy.
    pub fn generate_variant_keys(&self, original: &str) -> Result<VariantKeySet, StorageError> {
        key::variant_keys(original)
    }

    /// Issue a time-limited upload URL.
    ///
    /// `content_type` and `metadata` are the caller's bookkeeping; they are
    /// deliberately excluded from the signature so the uploading client's
    /// own headers cannot invalidate it. When no remote store is available
    /// the returned URL is a local application route with the same shape.
    pub async fn get_upload_url(
        &self,
        key: &str,
        content_type: &str,
        metadata: Option<&HashMap<String, String>>,
        expires_in: Option<Duration>,
    ) -> Result<PresignedUrl, StorageError> {
        let backend = self.current();
        let expiry = expires_in
            .unwrap_or(Duration::from_secs(StorageConfig::DEFAULT_URL_EXPIRY_SECS));
        debug!(key = %key, content_type = %content_type, metadata = ?metadata,
            backend = ?backend.store.kind(), "issuing upload url");

        let result = backend.store.presign_upload(key, expiry).await;
        self.record(OpKind::Presign, None, &result);
        result
    }

    /// Issue a time-limited download URL.
    ///
    /// Three tiers: a signed remote URL; a best-effort public-style URL when
    /// signing is unavailable or fails but a bucket is known; a local static
    /// path when no bucket is configured at all.
    pub async fn get_download_url(
        &self,
        key: &str,
        filename: Option<&str>,
        expires_in: Option<Duration>,
    ) -> Result<PresignedUrl, StorageError> {
        let backend = self.current();
        let expiry = expires_in
            .unwrap_or(Duration::from_secs(StorageConfig::DEFAULT_URL_EXPIRY_SECS));

        let result = match backend.state {
            StorageState::Remote => {
                match backend.store.presign_download(key, expiry, filename).await {
                    Ok(url) => Ok(url),
                    Err(e) => {
                        warn!(key = %key, error = %e,
                            "download presign failed, falling back to public-style url");
                        Ok(public_style_url(&backend.config, key, expiry))
                    }
                }
            }
            _ if backend.config.has_bucket() => Ok(public_style_url(&backend.config, key, expiry)),
            _ => backend.store.presign_download(key, expiry, filename).await,
        };

        self.record(OpKind::Download, None, &result);
        result
    }

    /// Store a payload, switching to chunked multipart transfer at the
    /// configured threshold.
    pub async fn upload_file(
        &self,
        key: &str,
        payload: Bytes,
        content_type: &str,
        metadata: Option<&HashMap<String, String>>,
        progress: Option<ProgressFn>,
    ) -> Result<(), StorageError> {
        let backend = self.current();
        let size = payload.len() as u64;

        let result = if size >= backend.config.multipart_threshold_bytes {
            backend
                .store
                .put_multipart(
                    key,
                    payload,
                    content_type,
                    metadata,
                    backend.config.multipart_chunk_bytes,
                    progress,
                )
                .await
        } else {
            let single = backend.store.put(key, payload, content_type, metadata).await;
            if single.is_ok() {
                notify_progress(progress.as_ref(), 100);
            }
            single
        };

        self.record(OpKind::Upload, Some(size), &result);
        result
    }

    /// Read a whole object back through the facade (the transfer path for
    /// local mode).
    pub async fn get_object(&self, key: &str) -> Result<Bytes, StorageError> {
        let backend = self.current();
        let result = backend.store.get(key).await;
        let bytes = result.as_ref().ok().map(|b| b.len() as u64);
        self.record(OpKind::Download, bytes, &result);
        result
    }

    /// Existence check without downloading the body.
    pub async fn object_exists(&self, key: &str) -> Result<bool, StorageError> {
        let backend = self.current();
        let result = backend.store.exists(key).await;
        self.record(OpKind::Stat, None, &result);
        result
    }

    /// Delete one object. Deleting a missing key succeeds.
    pub async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        let backend = self.current();
        let result = backend.store.delete(key).await;
        self.record(OpKind::Delete, None, &result);
        result
    }

    /// Delete a set of objects.
    pub async fn delete_objects(&self, keys: &[String]) -> Result<(), StorageError> {
        let backend = self.current();
        let result = backend.store.delete_many(keys).await;
        self.record(OpKind::Delete, None, &result);
        result
    }

    /// Enumerate up to `max_keys` (default 1000) objects under `prefix`.
    pub async fn list_objects(
        &self,
        prefix: &str,
        max_keys: Option<usize>,
    ) -> Result<Vec<ObjectEntry>, StorageError> {
        let backend = self.current();
        let result = backend
            .store
            .list(prefix, max_keys.unwrap_or(DEFAULT_LIST_LIMIT))
            .await;
        self.record(OpKind::List, None, &result);
        result
    }

    /// Aggregate size/count numbers for operator dashboards.
    pub async fn get_storage_stats(&self) -> Result<StorageStats, StorageError> {
        let backend = self.current();
        let result = backend
            .store
            .list(&format!("{}/", key::ASSETS_PREFIX), STATS_SCAN_LIMIT)
            .await;
        self.record(OpKind::List, None, &result);

        let entries = result?;
        let total_size = entries.iter().map(|e| e.size).sum();
        let file_count = entries.len() as u64;
        let largest_file = entries.into_iter().max_by_key(|e| e.size);
        Ok(StorageStats {
            total_size,
            file_count,
            largest_file,
        })
    }

    /// Apply a configuration patch, persist it best-effort, and swap to a
    /// freshly built backend.
    ///
    /// The new backend is fully constructed before the old reference is
    /// dropped; there is no partial patching of a live client.
    ///
    /// # Errors
    ///
    /// Returns an error when the merged configuration is invalid or the new
    /// backend cannot be built. The previous backend stays in service in
    /// that case.
    pub async fn update_config(
        &self,
        patch: StorageConfigPatch,
        actor_id: Option<Uuid>,
    ) -> Result<(), StorageError> {
        let current = self.current();
        let next_config = patch.apply(&current.config);
        next_config
            .validate()
            .map_err(|e| StorageError::configuration(e.to_string()))?;

        self.provider
            .save(&next_config, actor_id, Some("storage configuration update"))
            .await;

        let next = build_backend(next_config).await?;
        let state = next.state;
        *self
            .backend
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        info!(state = ?state, actor = ?actor_id, "storage backend reconfigured");
        Ok(())
    }

    /// Connectivity self-test for operator-facing health display.
    ///
    /// Never fails; without a remote backend it reports "not configured"
    /// instead of probing.
    pub async fn test_connection(&self) -> ConnectionReport {
        let backend = self.current();
        match backend.state {
            StorageState::Remote => backend.store.check().await,
            _ => ConnectionReport::not_configured(),
        }
    }

    /// Structured status snapshot (config redacted). Never fails.
    #[must_use]
    pub fn get_status(&self) -> StorageStatus {
        let backend = self.current();
        StorageStatus {
            state: backend.state,
            is_configured: backend.config.has_bucket(),
            config: backend.config.redacted(),
            metrics: self.metrics.snapshot(),
        }
    }

    fn record<T>(&self, op: OpKind, bytes: Option<u64>, result: &Result<T, StorageError>) {
        match result {
            Ok(_) => self.metrics.record(op, bytes, None),
            Err(e) => self.metrics.record(op, None, Some(&e.to_string())),
        }
    }
}

/// Select and construct the backend matching `config`.
///
/// A remote-ready configuration gets a fresh [`RemoteStore`]; anything else
/// (including a remote construction failure) lands on the local fallback
/// with its directories ensured.
async fn build_backend(config: StorageConfig) -> Result<Backend, StorageError> {
    if config.remote_ready() {
        match RemoteStore::connect(&config) {
            Ok(remote) => {
                return Ok(Backend {
                    config,
                    store: Arc::new(remote),
                    state: StorageState::Remote,
                });
            }
            Err(e) => {
                warn!(error = %e, "remote store unavailable, falling back to local storage");
            }
        }
    }

    let local = LocalStore::open(config.local_root.clone()).await?;
    Ok(Backend {
        config,
        store: Arc::new(local),
        state: StorageState::LocalOnly,
    })
}

/// Unsigned public-style URL for a bucket that lacks signing credentials.
fn public_style_url(config: &StorageConfig, key: &str, expiry: Duration) -> PresignedUrl {
    let url = match &config.endpoint {
        Some(endpoint) => format!(
            "{}/{}/{}",
            endpoint.trim_end_matches('/'),
            config.bucket,
            key
        ),
        None => format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            config.bucket, config.region, key
        ),
    };
    PresignedUrl {
        url,
        method: "GET".to_string(),
        expires_at: expires_at(expiry),
        headers: HashMap::new(),
    }
}
