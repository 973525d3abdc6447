//! Operation metrics sink.
//!
//! A fixed set of atomic counters mutated only by the storage facade and
//! read by the monitoring collaborator through [`MetricsSink::snapshot`].
//! Counts are advisory observability data, not correctness-critical state.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Kind of operation being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Byte upload through the facade.
    Upload,
    /// Byte download or download-URL issuance.
    Download,
    /// Single or batch delete.
    Delete,
    /// Listing / stats.
    List,
    /// Existence check.
    Stat,
    /// Upload-URL issuance.
    Presign,
}

/// Snapshot of accumulated transfer metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferMetrics {
    /// Completed uploads.
    pub uploads: u64,
    /// Completed downloads and issued download URLs.
    pub downloads: u64,
    /// Completed delete operations.
    pub deletes: u64,
    /// Failed operations of any kind.
    pub errors: u64,
    /// Payload bytes moved through this subsystem (uploads + downloads).
    pub total_bandwidth_bytes: u64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Time of the most recent operation, successful or not.
    pub last_operation_at: Option<DateTime<Utc>>,
}

/// Accumulator for transfer metrics.
#[derive(Debug, Default)]
pub struct MetricsSink {
    uploads: AtomicU64,
    downloads: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    bandwidth: AtomicU64,
    last_error: Mutex<Option<String>>,
    last_operation_at: Mutex<Option<DateTime<Utc>>>,
}

impl MetricsSink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed or failed operation.
    ///
    /// Success increments the matching operation counter and adds `bytes` to
    /// the bandwidth total; failure increments `errors` and replaces
    /// `last_error`. Either way the last-operation timestamp advances.
    pub fn record(&self, op: OpKind, bytes: Option<u64>, error: Option<&str>) {
        if let Some(message) = error {
            self.errors.fetch_add(1, Ordering::Relaxed);
            *lock_ignoring_poison(&self.last_error) = Some(message.to_string());
        } else {
            match op {
                OpKind::Upload => {
                    self.uploads.fetch_add(1, Ordering::Relaxed);
                }
                OpKind::Download => {
                    self.downloads.fetch_add(1, Ordering::Relaxed);
                }
                OpKind::Delete => {
                    self.deletes.fetch_add(1, Ordering::Relaxed);
                }
                OpKind::List | OpKind::Stat | OpKind::Presign => {}
            }
            if let Some(bytes) = bytes {
                self.bandwidth.fetch_add(bytes, Ordering::Relaxed);
            }
        }

        *lock_ignoring_poison(&self.last_operation_at) = Some(Utc::now());
    }

    /// Copy of the current counters.
    #[must_use]
    pub fn snapshot(&self) -> TransferMetrics {
        TransferMetrics {
            uploads: self.uploads.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_bandwidth_bytes: self.bandwidth.load(Ordering::Relaxed),
            last_error: lock_ignoring_poison(&self.last_error).clone(),
            last_operation_at: *lock_ignoring_poison(&self.last_operation_at),
        }
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_counters_and_bandwidth() {
        let sink = MetricsSink::new();
        sink.record(OpKind::Upload, Some(1024), None);
        sink.record(OpKind::Upload, Some(2048), None);
        sink.record(OpKind::Download, Some(512), None);
        sink.record(OpKind::Delete, None, None);

        let snap = sink.snapshot();
        assert_eq!(snap.uploads, 2);
        assert_eq!(snap.downloads, 1);
        assert_eq!(snap.deletes, 1);
        assert_eq!(snap.errors, 0);
        assert_eq!(snap.total_bandwidth_bytes, 3584);
        assert!(snap.last_error.is_none());
        assert!(snap.last_operation_at.is_some());
    }

    #[test]
    fn test_failure_records_error_not_counter() {
        let sink = MetricsSink::new();
        sink.record(OpKind::Upload, None, Some("disk full"));

        let snap = sink.snapshot();
        assert_eq!(snap.uploads, 0);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.last_error.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_list_and_stat_only_touch_timestamp() {
        let sink = MetricsSink::new();
        sink.record(OpKind::List, None, None);
        sink.record(OpKind::Stat, None, None);
        sink.record(OpKind::Presign, None, None);

        let snap = sink.snapshot();
        assert_eq!(snap.uploads + snap.downloads + snap.deletes + snap.errors, 0);
        assert!(snap.last_operation_at.is_some());
    }
}
