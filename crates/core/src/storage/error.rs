//! Storage error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Missing or placeholder configuration for the attempted operation.
    #[error("storage configuration error: {0}")]
    Configuration(String),

    /// Transient transport failure that survived the retry budget.
    #[error("storage transport failure: {0}")]
    Transport(String),

    /// Object missing. Surfaced on reads, swallowed on deletes.
    #[error("object not found: {key}")]
    NotFound {
        /// Storage key that was not found.
        key: String,
    },

    /// Malformed signing parameters or insufficient remote permissions.
    /// Never retried.
    #[error("{operation} denied for bucket '{bucket}', key '{key}': {message}")]
    PermissionOrSignature {
        /// Operation that was rejected.
        operation: String,
        /// Bucket the operation targeted.
        bucket: String,
        /// Key the operation targeted.
        key: String,
        /// Backend diagnostic, secret-free.
        message: String,
    },

    /// A multipart part failed after its own retries; cleanup of uploaded
    /// parts has already been attempted.
    #[error("multipart upload aborted for key '{key}': {message}")]
    MultipartAborted {
        /// Key of the aborted upload.
        key: String,
        /// Failure description.
        message: String,
    },

    /// Filesystem failure on the local fallback path.
    #[error("local storage I/O failure at {path}: {source}")]
    LocalIo {
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Key violates the storage key grammar or escapes the root.
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}

impl StorageError {
    /// Create a configuration error.
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a transport error.
    #[must_use]
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create an invalid key error.
    #[must_use]
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }

    /// Create a local I/O error.
    #[must_use]
    pub fn local_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// Create a multipart abort error.
    #[must_use]
    pub fn multipart_aborted(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MultipartAborted {
            key: key.into(),
            message: message.into(),
        }
    }

    /// True for missing-object errors.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Map an OpenDAL error into the storage taxonomy, keeping enough
    /// context (bucket, key, operation) to diagnose without leaking
    /// credentials.
    #[must_use]
    pub fn from_opendal(err: &opendal::Error, operation: &str, bucket: &str, key: &str) -> Self {
        match err.kind() {
            opendal::ErrorKind::NotFound => Self::NotFound {
                key: key.to_string(),
            },
            opendal::ErrorKind::PermissionDenied => Self::PermissionOrSignature {
                operation: operation.to_string(),
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: err.to_string(),
            },
            opendal::ErrorKind::ConfigInvalid | opendal::ErrorKind::Unsupported => {
                Self::Configuration(err.to_string())
            }
            _ => Self::Transport(err.to_string()),
        }
    }
}
