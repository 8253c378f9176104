//! A content-addressed cache of on-disk byte blobs, keyed by caller-supplied string keys, with
//! single-flight coordination when content must be produced by some external actor.
//!
//! Directory layout under a process-owned temp root:
//!
//! ```text
//! <root>/content/<key>     completed blobs
//! <root>/error/<key>       recorded generation errors (JSON: {msg, traceback})
//! <root>/lock/<key>        rendezvous object
//! ```

mod scope;

pub use scope::BlobWriteScope;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_latch::AsyncLatch;
use parking_lot::Mutex;
use resource_protocol::{FileReader, FileWriter};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;

#[derive(Debug)]
pub enum BlobStoreError {
    NotFound,
    /// The rendezvous disappeared but left neither content nor a recorded error. Only possible
    /// if a producer's process was killed between unlinking the lock and the prior two steps,
    /// or the store was tampered with out of band.
    NoContentOrError,
    Generation(String),
    Io(String),
}

impl std::fmt::Display for BlobStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlobStoreError::NotFound => write!(f, "blob not found"),
            BlobStoreError::NoContentOrError => {
                write!(f, "rendezvous cleared but no content or error was recorded")
            }
            BlobStoreError::Generation(msg) => write!(f, "generation failed: {msg}"),
            BlobStoreError::Io(msg) => write!(f, "i/o error: {msg}"),
        }
    }
}

impl std::error::Error for BlobStoreError {}

#[derive(Serialize, Deserialize)]
pub(crate) struct ErrorRecord {
    pub(crate) msg: String,
    pub(crate) traceback: String,
}

#[derive(Clone)]
pub struct BlobStore(Arc<Inner>);

struct Inner {
    root: PathBuf,
    latches: Mutex<HashMap<String, Arc<AsyncLatch>>>,
}

impl BlobStore {
    /// Creates the `content/`, `error/`, and `lock/` subdirectories under `root` if absent.
    pub async fn new(root: impl Into<PathBuf>) -> Result<BlobStore, String> {
        let root = root.into();
        for sub in ["content", "error", "lock"] {
            tokio::fs::create_dir_all(root.join(sub))
                .await
                .map_err(|err| format!("creating blob store directory {sub}: {err}"))?;
        }
        Ok(BlobStore(Arc::new(Inner {
            root,
            latches: Mutex::new(HashMap::new()),
        })))
    }

    fn content_path(&self, key: &str) -> PathBuf {
        self.0.root.join("content").join(key)
    }

    fn tmp_path(&self, key: &str) -> PathBuf {
        self.0.root.join("content").join(format!("{key}.tmp"))
    }

    fn error_path(&self, key: &str) -> PathBuf {
        self.0.root.join("error").join(key)
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.0.root.join("lock").join(key)
    }

    /// Opens `content/<key>` for streaming read. Fails with `NotFound` if absent.
    pub async fn get(&self, key: &str) -> Result<FileReader, BlobStoreError> {
        match tokio::fs::File::open(self.content_path(key)).await {
            Ok(file) => Ok(FileReader::new(file)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobStoreError::NotFound)
            }
            Err(err) => Err(BlobStoreError::Io(err.to_string())),
        }
    }

    /// Opens `content/<key>` for streaming write, overwriting any existing blob once the write
    /// completes. Unlike `get_dynamic_context`, this is not single-flight: callers are
    /// responsible for their own coordination.
    pub async fn put(&self, key: &str) -> Result<FileWriter, BlobStoreError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.content_path(key))
            .await
            .map_err(|err| BlobStoreError::Io(err.to_string()))?;
        Ok(FileWriter::new(file))
    }

    /// The single-flight primitive: `create` is invoked by the caller that wins the rendezvous,
    /// and is expected to *enqueue* asynchronous generation and return quickly, not to perform
    /// the generation itself. Every caller, winner included, then waits for content or a
    /// recorded error to appear before returning.
    pub async fn get_dynamic<F, Fut>(
        &self,
        key: &str,
        create: F,
    ) -> Result<FileReader, BlobStoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), String>>,
    {
        match self.get(key).await {
            Ok(reader) => return Ok(reader),
            Err(BlobStoreError::NotFound) => {}
            Err(err) => return Err(err),
        }

        let latch = self.latch_for(key);

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path(key))
            .await
        {
            Ok(_lock_file) => {
                if let Err(err) = create().await {
                    // `create()` failed before it could even hand out a `BlobWriteScope`, so
                    // nothing will ever call `finish`/`fail` to release the rendezvous. Release
                    // it here rather than leaving every other waiter blocked until a sweep.
                    self.release(key).await;
                    return Err(BlobStoreError::Generation(err));
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(BlobStoreError::Io(err.to_string())),
        }

        self.await_rendezvous(key, &latch).await;

        match self.get(key).await {
            Ok(reader) => Ok(reader),
            Err(BlobStoreError::NotFound) => self.read_error_or_missing(key).await,
            Err(err) => Err(err),
        }
    }

    async fn read_error_or_missing(&self, key: &str) -> Result<FileReader, BlobStoreError> {
        match tokio::fs::read(self.error_path(key)).await {
            Ok(bytes) => {
                let record: ErrorRecord = serde_json::from_slice(&bytes)
                    .map_err(|err| BlobStoreError::Io(format!("malformed error record: {err}")))?;
                Err(BlobStoreError::Generation(record.msg))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobStoreError::NoContentOrError)
            }
            Err(err) => Err(BlobStoreError::Io(err.to_string())),
        }
    }

    fn latch_for(&self, key: &str) -> Arc<AsyncLatch> {
        let mut latches = self.0.latches.lock();
        latches
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncLatch::new()))
            .clone()
    }

    /// Races the in-process latch (instant, zero-poll) against a short exponential backoff that
    /// checks whether the lock file has disappeared, which is the only signal available when
    /// the producer lives in a different process.
    async fn await_rendezvous(&self, key: &str, latch: &AsyncLatch) {
        let lock_path = self.lock_path(key);
        let mut backoff = Duration::from_millis(5);
        loop {
            tokio::select! {
                _ = latch.triggered() => return,
                _ = tokio::time::sleep(backoff) => {
                    if tokio::fs::metadata(&lock_path).await.is_err() {
                        latch.trigger();
                        return;
                    }
                    backoff = (backoff * 2).min(Duration::from_millis(100));
                }
            }
        }
    }

    /// Begins the producer side of a single-flight generation: a writer scoped so that its
    /// completion (`finish`) or failure (`fail`) atomically publishes content or records an
    /// error, then releases the rendezvous.
    pub async fn get_dynamic_context(&self, key: &str) -> Result<BlobWriteScope, BlobStoreError> {
        let tmp_path = self.tmp_path(key);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await
            .map_err(|err| BlobStoreError::Io(err.to_string()))?;
        Ok(BlobWriteScope::new(
            self.clone(),
            key.to_string(),
            tmp_path,
            FileWriter::new(file),
        ))
    }

    async fn release(&self, key: &str) {
        let _ = tokio::fs::remove_file(self.lock_path(key)).await;
        let latch = self.0.latches.lock().remove(key);
        if let Some(latch) = latch {
            latch.trigger();
        }
    }

    /// Best-effort mitigation for a producer that died without publishing: removes any lock
    /// file older than `max_age`, unblocking waiters (who will then observe `NoContentOrError`).
    /// Meant to be invoked periodically by the controller, not on every wait.
    pub async fn sweep_stale_locks(&self, max_age: Duration) -> Result<usize, String> {
        let lock_dir = self.0.root.join("lock");
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&lock_dir)
            .await
            .map_err(|err| format!("reading lock directory: {err}"))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| format!("reading lock directory: {err}"))?
        {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            let age = match metadata.modified().and_then(|m| m.elapsed()) {
                Ok(age) => age,
                Err(_) => continue,
            };
            if age < max_age {
                continue;
            }
            if let Some(key) = entry.file_name().to_str() {
                log::warn!("sweeping stale blob store lock for key {key} (age {age:?})");
                self.release(key).await;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use resource_protocol::{Reader, Writer};

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();

        let mut writer = store.put("greeting").await.unwrap();
        writer.write(Bytes::from_static(b"hello")).await.unwrap();
        writer.close().await.unwrap();

        let mut reader = store.get("greeting").await.unwrap();
        let chunk = reader.read(1024).await.unwrap();
        assert_eq!(&chunk[..], b"hello");
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, BlobStoreError::NotFound));
    }

    #[tokio::test]
    async fn get_dynamic_runs_create_once_and_returns_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let calls_clone = calls.clone();
        let store_clone = store.clone();
        let reader = store
            .get_dynamic("derived", move || {
                let calls = calls_clone.clone();
                let store = store_clone.clone();
                async move {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    let mut scope = store
                        .get_dynamic_context("derived")
                        .await
                        .map_err(|err| err.to_string())?;
                    scope
                        .writer()
                        .write(Bytes::from_static(b"generated"))
                        .await?;
                    scope.finish().await
                }
            })
            .await
            .unwrap();

        let mut reader = reader;
        let chunk = reader.read(1024).await.unwrap();
        assert_eq!(&chunk[..], b"generated");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn get_dynamic_surfaces_generation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();
        let store_clone = store.clone();

        let result = store
            .get_dynamic("broken", move || {
                let store = store_clone.clone();
                async move {
                    let scope = store
                        .get_dynamic_context("broken")
                        .await
                        .map_err(|err| err.to_string())?;
                    scope.fail("producer exploded").await
                }
            })
            .await;

        match result {
            Err(BlobStoreError::Generation(msg)) => assert_eq!(msg, "producer exploded"),
            other => panic!("expected generation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sweep_stale_locks_removes_old_locks_and_wakes_waiters() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path()).await.unwrap();

        tokio::fs::write(dir.path().join("lock").join("orphaned"), b"")
            .await
            .unwrap();

        let removed = store
            .sweep_stale_locks(Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(tokio::fs::metadata(dir.path().join("lock").join("orphaned"))
            .await
            .is_err());
    }
}
