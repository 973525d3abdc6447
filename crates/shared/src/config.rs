//! Storage configuration management.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server-side encryption applied to remote objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    /// No server-side encryption.
    #[default]
    None,
    /// SSE with S3-managed keys (AES-256).
    Aes256,
    /// SSE with a KMS-managed key.
    Kms,
}

/// Durability/cost tier for remote objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    /// Standard access tier.
    #[default]
    Standard,
    /// Infrequent-access tier.
    InfrequentAccess,
    /// Archive tier.
    Archive,
}

impl StorageClass {
    /// Backend identifier for this storage class.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::InfrequentAccess => "STANDARD_IA",
            Self::Archive => "GLACIER",
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// Request timeout must be positive.
    #[error("request timeout must be greater than zero")]
    ZeroTimeout,

    /// Multipart threshold must be positive.
    #[error("multipart threshold must be greater than zero")]
    ZeroThreshold,

    /// Multipart chunk size below the backend part minimum.
    #[error("multipart chunk size {got} bytes is below the {min} byte part minimum")]
    ChunkTooSmall {
        /// Configured chunk size.
        got: u64,
        /// Minimum allowed part size.
        min: u64,
    },
}

/// Storage service configuration.
///
/// Loaded once at startup from environment/defaults and replaced wholesale by
/// administrative reconfiguration; individual fields of a live config are
/// never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Whether remote object storage may be used at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Custom endpoint URL for S3-compatible stores (R2, Supabase, MinIO).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Remote region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Access key ID. Absent or placeholder means local fallback.
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Secret access key. Absent or placeholder means local fallback.
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Bucket name. A placeholder bucket counts as unconfigured.
    #[serde(default)]
    pub bucket: String,
    /// Server-side encryption mode for remote writes.
    #[serde(default)]
    pub server_side_encryption: EncryptionMode,
    /// Storage class for remote writes.
    #[serde(default)]
    pub storage_class: StorageClass,
    /// Transient-error retry budget for remote calls.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Payloads at or above this size upload via multipart transfer.
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: u64,
    /// Part size for multipart transfer.
    #[serde(default = "default_multipart_chunk")]
    pub multipart_chunk_bytes: u64,
    /// Root directory for the local fallback store.
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
}

fn default_enabled() -> bool {
    true
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_multipart_threshold() -> u64 {
    100 * 1024 * 1024
}

fn default_multipart_chunk() -> u64 {
    10 * 1024 * 1024
}

fn default_local_root() -> PathBuf {
    PathBuf::from("./storage")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: None,
            region: default_region(),
            access_key_id: None,
            secret_access_key: None,
            bucket: String::new(),
            server_side_encryption: EncryptionMode::default(),
            storage_class: StorageClass::default(),
            max_retries: default_max_retries(),
            request_timeout_ms: default_request_timeout_ms(),
            multipart_threshold_bytes: default_multipart_threshold(),
            multipart_chunk_bytes: default_multipart_chunk(),
            local_root: default_local_root(),
        }
    }
}

impl StorageConfig {
    /// Minimum multipart part size accepted by common backends (5 MiB).
    pub const MIN_MULTIPART_CHUNK: u64 = 5 * 1024 * 1024;
    /// Default validity window for transfer URLs, in seconds.
    pub const DEFAULT_URL_EXPIRY_SECS: u64 = 3600;

    /// Validate knob ranges.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero timeout, zero multipart threshold, or a
    /// multipart chunk below the backend part minimum.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigValidationError::ZeroTimeout);
        }
        if self.multipart_threshold_bytes == 0 {
            return Err(ConfigValidationError::ZeroThreshold);
        }
        if self.multipart_chunk_bytes < Self::MIN_MULTIPART_CHUNK {
            return Err(ConfigValidationError::ChunkTooSmall {
                got: self.multipart_chunk_bytes,
                min: Self::MIN_MULTIPART_CHUNK,
            });
        }
        Ok(())
    }

    /// True when a real (non-placeholder) bucket name is configured.
    ///
    /// A bucket alone is enough to construct unsigned public-style URLs even
    /// without credentials.
    #[must_use]
    pub fn has_bucket(&self) -> bool {
        !is_placeholder(&self.bucket)
    }

    /// True when both credential halves are present and not placeholders.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        matches!(&self.access_key_id, Some(k) if !is_placeholder(k))
            && matches!(&self.secret_access_key, Some(k) if !is_placeholder(k))
    }

    /// True when signed remote operations are possible.
    #[must_use]
    pub fn remote_ready(&self) -> bool {
        self.enabled && self.has_bucket() && self.has_credentials()
    }

    /// Secret-free projection for status/diagnostic responses.
    #[must_use]
    pub fn redacted(&self) -> RedactedConfig {
        RedactedConfig {
            enabled: self.enabled,
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            bucket: self.bucket.clone(),
            access_key_id: self
                .access_key_id
                .as_ref()
                .map(|k| truncate_key(k)),
            credentials_set: self.has_credentials(),
            server_side_encryption: self.server_side_encryption,
            storage_class: self.storage_class,
            max_retries: self.max_retries,
            request_timeout_ms: self.request_timeout_ms,
            multipart_threshold_bytes: self.multipart_threshold_bytes,
            multipart_chunk_bytes: self.multipart_chunk_bytes,
            local_root: self.local_root.clone(),
        }
    }
}

/// Values operators paste from sample configs without editing.
fn is_placeholder(value: &str) -> bool {
    value.is_empty() || value == "changeme" || value.starts_with("your-")
}

fn truncate_key(key: &str) -> String {
    let head: String = key.chars().take(4).collect();
    format!("{head}\u{2026}")
}

/// Partial storage configuration.
///
/// Used both for persisted override records and for administrative
/// `update_config` calls. For the optional credential fields, an explicit
/// empty string clears the stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfigPatch {
    /// Override for [`StorageConfig::enabled`].
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Override for the endpoint; empty clears it.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Override for the region.
    #[serde(default)]
    pub region: Option<String>,
    /// Override for the access key ID; empty clears it.
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Override for the secret access key; empty clears it.
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Override for the bucket name.
    #[serde(default)]
    pub bucket: Option<String>,
    /// Override for the encryption mode.
    #[serde(default)]
    pub server_side_encryption: Option<EncryptionMode>,
    /// Override for the storage class.
    #[serde(default)]
    pub storage_class: Option<StorageClass>,
    /// Override for the retry budget.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Override for the request timeout.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Override for the multipart threshold.
    #[serde(default)]
    pub multipart_threshold_bytes: Option<u64>,
    /// Override for the multipart chunk size.
    #[serde(default)]
    pub multipart_chunk_bytes: Option<u64>,
    /// Override for the local fallback root.
    #[serde(default)]
    pub local_root: Option<PathBuf>,
}

impl StorageConfigPatch {
    /// Apply this patch on top of `base`, producing a fresh config.
    #[must_use]
    pub fn apply(&self, base: &StorageConfig) -> StorageConfig {
        let mut next = base.clone();
        if let Some(enabled) = self.enabled {
            next.enabled = enabled;
        }
        if let Some(endpoint) = &self.endpoint {
            next.endpoint = non_empty(endpoint);
        }
        if let Some(region) = &self.region {
            next.region = region.clone();
        }
        if let Some(key) = &self.access_key_id {
            next.access_key_id = non_empty(key);
        }
        if let Some(key) = &self.secret_access_key {
            next.secret_access_key = non_empty(key);
        }
        if let Some(bucket) = &self.bucket {
            next.bucket = bucket.clone();
        }
        if let Some(sse) = self.server_side_encryption {
            next.server_side_encryption = sse;
        }
        if let Some(class) = self.storage_class {
            next.storage_class = class;
        }
        if let Some(retries) = self.max_retries {
            next.max_retries = retries;
        }
        if let Some(timeout) = self.request_timeout_ms {
            next.request_timeout_ms = timeout;
        }
        if let Some(threshold) = self.multipart_threshold_bytes {
            next.multipart_threshold_bytes = threshold;
        }
        if let Some(chunk) = self.multipart_chunk_bytes {
            next.multipart_chunk_bytes = chunk;
        }
        if let Some(root) = &self.local_root {
            next.local_root = root.clone();
        }
        next
    }

    /// Full-config patch, as persisted by the settings store.
    #[must_use]
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            enabled: Some(config.enabled),
            endpoint: Some(config.endpoint.clone().unwrap_or_default()),
            region: Some(config.region.clone()),
            access_key_id: Some(config.access_key_id.clone().unwrap_or_default()),
            secret_access_key: Some(config.secret_access_key.clone().unwrap_or_default()),
            bucket: Some(config.bucket.clone()),
            server_side_encryption: Some(config.server_side_encryption),
            storage_class: Some(config.storage_class),
            max_retries: Some(config.max_retries),
            request_timeout_ms: Some(config.request_timeout_ms),
            multipart_threshold_bytes: Some(config.multipart_threshold_bytes),
            multipart_chunk_bytes: Some(config.multipart_chunk_bytes),
            local_root: Some(config.local_root.clone()),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Secret-free configuration view returned by status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct RedactedConfig {
    /// Remote storage enabled flag.
    pub enabled: bool,
    /// Custom endpoint, if any.
    pub endpoint: Option<String>,
    /// Remote region.
    pub region: String,
    /// Bucket name.
    pub bucket: String,
    /// Truncated access key ID.
    pub access_key_id: Option<String>,
    /// Whether full credentials are configured.
    pub credentials_set: bool,
    /// Encryption mode.
    pub server_side_encryption: EncryptionMode,
    /// Storage class.
    pub storage_class: StorageClass,
    /// Retry budget.
    pub max_retries: u32,
    /// Request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Multipart threshold in bytes.
    pub multipart_threshold_bytes: u64,
    /// Multipart chunk size in bytes.
    pub multipart_chunk_bytes: u64,
    /// Local fallback root.
    pub local_root: PathBuf,
}

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Storage subsystem configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        // Pick up a .env file when present; ignore when absent.
        dotenvy::dotenv().ok();

        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("MEDIARK").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert!(config.enabled);
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.request_timeout_ms, 30_000);
        assert_eq!(config.multipart_threshold_bytes, 100 * 1024 * 1024);
        assert_eq!(config.multipart_chunk_bytes, 10 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = StorageConfig {
            request_timeout_ms: 0,
            ..StorageConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigValidationError::ZeroTimeout));
    }

    #[test]
    fn test_validate_rejects_small_chunk() {
        let config = StorageConfig {
            multipart_chunk_bytes: 1024,
            ..StorageConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::ChunkTooSmall { got: 1024, .. })
        ));
    }

    #[rstest]
    #[case("", false)]
    #[case("your-bucket-name", false)]
    #[case("changeme", false)]
    #[case("mediark-assets", true)]
    fn test_placeholder_buckets(#[case] bucket: &str, #[case] expected: bool) {
        let config = StorageConfig {
            bucket: bucket.to_string(),
            ..StorageConfig::default()
        };
        assert_eq!(config.has_bucket(), expected);
    }

    #[test]
    fn test_credentials_require_both_halves() {
        let mut config = StorageConfig {
            access_key_id: Some("AKIAEXAMPLE123".to_string()),
            ..StorageConfig::default()
        };
        assert!(!config.has_credentials());

        config.secret_access_key = Some("secret".to_string());
        assert!(config.has_credentials());

        config.access_key_id = Some("your-access-key".to_string());
        assert!(!config.has_credentials());
    }

    #[test]
    fn test_remote_ready_requires_enabled() {
        let mut config = StorageConfig {
            bucket: "mediark-assets".to_string(),
            access_key_id: Some("AKIAEXAMPLE123".to_string()),
            secret_access_key: Some("secret".to_string()),
            ..StorageConfig::default()
        };
        assert!(config.remote_ready());

        config.enabled = false;
        assert!(!config.remote_ready());
    }

    #[test]
    fn test_patch_apply_merges_and_clears() {
        let base = StorageConfig {
            bucket: "mediark-assets".to_string(),
            access_key_id: Some("AKIAEXAMPLE123".to_string()),
            secret_access_key: Some("secret".to_string()),
            ..StorageConfig::default()
        };

        let patch = StorageConfigPatch {
            bucket: Some("mediark-archive".to_string()),
            access_key_id: Some(String::new()),
            secret_access_key: Some(String::new()),
            max_retries: Some(5),
            ..StorageConfigPatch::default()
        };

        let next = patch.apply(&base);
        assert_eq!(next.bucket, "mediark-archive");
        assert_eq!(next.access_key_id, None);
        assert_eq!(next.secret_access_key, None);
        assert_eq!(next.max_retries, 5);
        // untouched fields survive
        assert_eq!(next.region, base.region);
    }

    #[test]
    fn test_patch_roundtrip_through_config() {
        let config = StorageConfig {
            bucket: "mediark-assets".to_string(),
            endpoint: Some("https://account.r2.cloudflarestorage.com".to_string()),
            access_key_id: Some("AKIAEXAMPLE123".to_string()),
            secret_access_key: Some("secret".to_string()),
            ..StorageConfig::default()
        };

        let restored = StorageConfigPatch::from_config(&config).apply(&StorageConfig::default());
        assert_eq!(restored.bucket, config.bucket);
        assert_eq!(restored.endpoint, config.endpoint);
        assert_eq!(restored.access_key_id, config.access_key_id);
        assert_eq!(restored.secret_access_key, config.secret_access_key);
    }

    #[test]
    fn test_redacted_hides_secret() {
        let config = StorageConfig {
            bucket: "mediark-assets".to_string(),
            access_key_id: Some("AKIAEXAMPLE123".to_string()),
            secret_access_key: Some("super-secret-value".to_string()),
            ..StorageConfig::default()
        };

        let redacted = config.redacted();
        assert_eq!(redacted.access_key_id.as_deref(), Some("AKIA\u{2026}"));
        assert!(redacted.credentials_set);

        let json = serde_json::to_string(&redacted).expect("serializable");
        assert!(!json.contains("super-secret-value"));
    }

    #[test]
    fn test_storage_class_names() {
        assert_eq!(StorageClass::Standard.as_str(), "STANDARD");
        assert_eq!(StorageClass::InfrequentAccess.as_str(), "STANDARD_IA");
        assert_eq!(StorageClass::Archive.as_str(), "GLACIER");
    }

    #[test]
    fn test_env_loading() {
        temp_env::with_vars(
            [
                ("MEDIARK__STORAGE__BUCKET", Some("env-bucket")),
                ("MEDIARK__STORAGE__REGION", Some("eu-central-1")),
                ("MEDIARK__STORAGE__MAX_RETRIES", Some("7")),
            ],
            || {
                let config = AppConfig::load().expect("should load from env");
                assert_eq!(config.storage.bucket, "env-bucket");
                assert_eq!(config.storage.region, "eu-central-1");
                assert_eq!(config.storage.max_retries, 7);
                // untouched knobs keep their defaults
                assert_eq!(config.storage.request_timeout_ms, 30_000);
            },
        );
    }
}
