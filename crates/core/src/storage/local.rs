//! Local filesystem fallback store.
//!
//! Implements the full [`ObjectStore`] contract under a single root
//! directory whose subfolders mirror the remote key prefixes, so switching
//! between local and remote never changes key format. Writes go to a
//! temp-suffixed sibling path and are atomically renamed into place: a
//! failed write may leave directories behind but never a half-written
//! object.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use super::error::StorageError;
use super::key::sanitize_filename;
use super::store::{
    BackendKind, ConnectionReport, ObjectEntry, ObjectStore, PresignedUrl, ProgressFn, expires_at,
    notify_progress,
};

/// Route prefix for uploads handled by the application itself.
pub const LOCAL_UPLOAD_ROUTE: &str = "/api/storage/upload";
/// Route prefix for downloads served by the application itself.
pub const LOCAL_DOWNLOAD_ROUTE: &str = "/api/storage/files";

/// Subfolders ensured under the root, mirroring remote key prefixes.
pub const PREFIX_DIRS: [&str; 6] = ["assets", "thumbnails", "previews", "web", "mobile", "temp"];

/// Filesystem-backed object store.
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open a store rooted at `root`, ensuring the prefix directories.
    ///
    /// # Errors
    ///
    /// Returns `LocalIo` when the directories cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        for dir in PREFIX_DIRS {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .await
                .map_err(|e| StorageError::local_io(&path, e))?;
        }
        debug!(root = %root.display(), "local fallback store ready");
        Ok(Self { root })
    }

    /// Root directory of this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path under the root, rejecting traversal.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() {
            return Err(StorageError::invalid_key("empty key"));
        }
        let rel = Path::new(key);
        let contained = !rel.is_absolute()
            && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !contained {
            return Err(StorageError::invalid_key(format!(
                "key escapes storage root: {key}"
            )));
        }
        Ok(self.root.join(rel))
    }

    async fn write_atomic(
        &self,
        key: &str,
        payload: &Bytes,
        chunk_bytes: usize,
        progress: Option<&ProgressFn>,
    ) -> Result<(), StorageError> {
        let target = self.resolve(key)?;
        let parent = target
            .parent()
            .map_or_else(|| self.root.clone(), Path::to_path_buf);
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| StorageError::local_io(&parent, e))?;

        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::invalid_key(key))?;
        let tmp = parent.join(format!("{file_name}.tmp-{}", Uuid::new_v4()));

        if let Err(e) = write_chunks(&tmp, payload, chunk_bytes, progress).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::local_io(&target, e));
        }
        Ok(())
    }
}

async fn write_chunks(
    tmp: &Path,
    payload: &Bytes,
    chunk_bytes: usize,
    progress: Option<&ProgressFn>,
) -> Result<(), StorageError> {
    let mut file = fs::File::create(tmp)
        .await
        .map_err(|e| StorageError::local_io(tmp, e))?;

    let total = payload.len();
    let chunk_bytes = chunk_bytes.max(1);
    let mut written = 0usize;
    while written < total {
        let end = usize::min(written + chunk_bytes, total);
        file.write_all(&payload[written..end])
            .await
            .map_err(|e| StorageError::local_io(tmp, e))?;
        written = end;
        notify_progress(progress, u8::try_from(written * 100 / total).unwrap_or(100));
    }
    if total == 0 {
        notify_progress(progress, 100);
    }

    file.flush()
        .await
        .map_err(|e| StorageError::local_io(tmp, e))?;
    file.sync_all()
        .await
        .map_err(|e| StorageError::local_io(tmp, e))?;
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn put<'a>(
        &self,
        key: &str,
        payload: Bytes,
        _content_type: &str,
        _metadata: Option<&'a HashMap<String, String>>,
    ) -> Result<(), StorageError> {
        let chunk = payload.len().max(1);
        self.write_atomic(key, &payload, chunk, None).await
    }

    async fn put_multipart<'a>(
        &self,
        key: &str,
        payload: Bytes,
        _content_type: &str,
        _metadata: Option<&'a HashMap<String, String>>,
        chunk_bytes: u64,
        progress: Option<ProgressFn>,
    ) -> Result<(), StorageError> {
        let chunk = usize::try_from(chunk_bytes).unwrap_or(usize::MAX);
        self.write_atomic(key, &payload, chunk, progress.as_ref())
            .await
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::not_found(key)),
            Err(e) => Err(StorageError::local_io(path, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.resolve(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::local_io(path, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // idempotent delete
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::local_io(path, e)),
        }
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), StorageError> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<ObjectEntry>, StorageError> {
        let mut entries = Vec::new();
        let mut dirs = vec![self.root.clone()];

        while let Some(dir) = dirs.pop() {
            let mut reader = match fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::local_io(dir, e)),
            };

            while let Some(entry) = reader
                .next_entry()
                .await
                .map_err(|e| StorageError::local_io(&dir, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StorageError::local_io(&path, e))?;
                if file_type.is_dir() {
                    dirs.push(path);
                    continue;
                }
                // in-flight atomic writes
                if path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.contains(".tmp-"))
                {
                    continue;
                }

                let Ok(rel) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key: String = rel
                    .components()
                    .filter_map(|c| c.as_os_str().to_str())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.starts_with(prefix) {
                    continue;
                }

                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| StorageError::local_io(&path, e))?;
                entries.push(ObjectEntry {
                    key,
                    size: meta.len(),
                    modified_at: meta.modified().ok().map(DateTime::<Utc>::from),
                });
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries.truncate(max_keys);
        Ok(entries)
    }

    async fn presign_upload(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<PresignedUrl, StorageError> {
        self.resolve(key)?;
        Ok(PresignedUrl {
            url: format!("{LOCAL_UPLOAD_ROUTE}/{key}"),
            method: "PUT".to_string(),
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
        self.resolve(key)?;
        let mut url = format!("{LOCAL_DOWNLOAD_ROUTE}/{key}");
        if let Some(name) = filename {
            url.push_str(&format!("?filename={}", sanitize_filename(name)));
        }
        Ok(PresignedUrl {
            url,
            method: "GET".to_string(),
            expires_at: expires_at(expires_in),
            headers: HashMap::new(),
        })
    }

    async fn check(&self) -> ConnectionReport {
        ConnectionReport::not_configured()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    async fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalStore::open(dir.path()).await.expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn test_open_ensures_prefix_dirs() {
        let (dir, _store) = store().await;
        for sub in PREFIX_DIRS {
            assert!(dir.path().join(sub).is_dir(), "{sub} missing");
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (_dir, store) = store().await;
        let payload = Bytes::from_static(b"jpeg bytes here");
        store
            .put("assets/image/2026/08/pic.jpg", payload.clone(), "image/jpeg", None)
            .await
            .expect("put");

        assert!(store.exists("assets/image/2026/08/pic.jpg").await.expect("exists"));
        let read_back = store.get("assets/image/2026/08/pic.jpg").await.expect("get");
        assert_eq!(read_back, payload);
    }

    #[tokio::test]
    async fn test_put_creates_intermediate_dirs_and_leaves_no_temp() {
        let (dir, store) = store().await;
        store
            .put("assets/video/2026/08/deep/clip.mp4", Bytes::from_static(b"x"), "video/mp4", None)
            .await
            .expect("put");

        let parent = dir.path().join("assets/video/2026/08/deep");
        let names: Vec<String> = std::fs::read_dir(&parent)
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["clip.mp4".to_string()]);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_dir, store) = store().await;
        let err = store.get("assets/nope.bin").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, store) = store().await;
        store
            .put("assets/doc/a.pdf", Bytes::from_static(b"pdf"), "application/pdf", None)
            .await
            .expect("put");

        store.delete("assets/doc/a.pdf").await.expect("first delete");
        store.delete("assets/doc/a.pdf").await.expect("second delete is a no-op");
        assert!(!store.exists("assets/doc/a.pdf").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_delete_many() {
        let (_dir, store) = store().await;
        let keys: Vec<String> = (0..3).map(|i| format!("assets/other/{i}.bin")).collect();
        for key in &keys {
            store
                .put(key, Bytes::from_static(b"data"), "application/octet-stream", None)
                .await
                .expect("put");
        }

        store.delete_many(&keys).await.expect("delete many");
        for key in &keys {
            assert!(!store.exists(key).await.expect("exists"));
        }
    }

    #[tokio::test]
    async fn test_traversal_is_rejected() {
        let (_dir, store) = store().await;
        let err = store.get("../outside.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));

        let err = store
            .put("assets/../../etc/passwd", Bytes::new(), "text/plain", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_list_returns_relative_sorted_keys() {
        let (_dir, store) = store().await;
        for key in [
            "assets/image/2026/08/b.jpg",
            "assets/image/2026/08/a.jpg",
            "assets/video/2026/07/c.mp4",
            "thumbnails/2026/08/a.jpg",
        ] {
            store
                .put(key, Bytes::from_static(b"x"), "application/octet-stream", None)
                .await
                .expect("put");
        }

        let under_assets = store.list("assets/", 100).await.expect("list");
        let keys: Vec<&str> = under_assets.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "assets/image/2026/08/a.jpg",
                "assets/image/2026/08/b.jpg",
                "assets/video/2026/07/c.mp4",
            ]
        );
        assert!(under_assets.iter().all(|e| e.size == 1));
        assert!(under_assets.iter().all(|e| e.modified_at.is_some()));

        let capped = store.list("assets/", 2).await.expect("list capped");
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn test_multipart_progress_is_monotonic_and_complete() {
        let (_dir, store) = store().await;
        let payload = Bytes::from(vec![7u8; 2000]);
        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |pct| sink.lock().expect("lock").push(pct));

        store
            .put_multipart(
                "assets/video/big.bin",
                payload,
                "application/octet-stream",
                None,
                100,
                Some(progress),
            )
            .await
            .expect("multipart put");

        let seen = seen.lock().expect("lock");
        // 2000 bytes in 100-byte parts: at least 20 part writes reported
        assert!(seen.len() >= 20, "expected >= 20 progress calls, got {}", seen.len());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress must not decrease");
        assert_eq!(*seen.last().expect("non-empty"), 100);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_puts_last_writer_wins() {
        let (_dir, store) = store().await;
        let store = Arc::new(store);
        let a = Bytes::from(vec![b'A'; 4096]);
        let b = Bytes::from(vec![b'B'; 4096]);

        let (ra, rb) = tokio::join!(
            store.put("assets/race.bin", a.clone(), "application/octet-stream", None),
            store.put("assets/race.bin", b.clone(), "application/octet-stream", None),
        );
        ra.expect("first put");
        rb.expect("second put");

        let read_back = store.get("assets/race.bin").await.expect("get");
        assert!(
            read_back == a || read_back == b,
            "object must be exactly one of the two payloads"
        );
    }

    #[tokio::test]
    async fn test_local_presign_routes() {
        let (_dir, store) = store().await;
        let upload = store
            .presign_upload("assets/image/x.png", Duration::from_secs(3600))
            .await
            .expect("presign upload");
        assert_eq!(upload.url, "/api/storage/upload/assets/image/x.png");
        assert_eq!(upload.method, "PUT");
        assert!(upload.headers.is_empty());

        let download = store
            .presign_download("assets/image/x.png", Duration::from_secs(3600), Some("my pic.png"))
            .await
            .expect("presign download");
        assert_eq!(
            download.url,
            "/api/storage/files/assets/image/x.png?filename=my_pic.png"
        );
        assert_eq!(download.method, "GET");
    }
}
