//! Object storage for media assets.
//!
//! One operation contract ([`ObjectStore`]), two complete implementations:
//! an S3-compatible remote client built on Apache OpenDAL and a filesystem
//! fallback used whenever no usable remote credentials are configured. The
//! [`StorageService`] facade selects the implementation at configuration
//! time, so call sites never branch on the backend.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        StorageService                          │
//! │   config + state, metrics, hot reconfiguration (swap-on-build) │
//! ├────────────────────────────┬───────────────────────────────────┤
//! │        RemoteStore         │            LocalStore             │
//! │  OpenDAL S3 + retry/timeout│   atomic temp-write + rename      │
//! │  presign, multipart writer │   local-route transfer URLs       │
//! └────────────────────────────┴───────────────────────────────────┘
//! ```

mod error;
pub mod key;
mod local;
mod metrics;
mod remote;
mod service;
mod store;

pub use error::StorageError;
pub use key::{AssetKind, VariantKeySet, generate_key, sanitize_filename, variant_keys};
pub use local::{LOCAL_DOWNLOAD_ROUTE, LOCAL_UPLOAD_ROUTE, LocalStore};
pub use metrics::{MetricsSink, OpKind, TransferMetrics};
pub use remote::RemoteStore;
pub use service::{StorageService, StorageState, StorageStats, StorageStatus};
pub use store::{
    BackendKind, ConnectionReport, ObjectEntry, ObjectStore, PresignedUrl, ProgressFn,
};
