use std::path::PathBuf;

use resource_protocol::{FileWriter, Writer};

use crate::{BlobStore, ErrorRecord};

/// The producer side of a single-flight generation, returned by `BlobStore::get_dynamic_context`.
///
/// Rust has no async `Drop`, so the atomic publish-or-record-error step can't happen implicitly
/// on scope exit the way the original RAII guard does; callers must explicitly call `finish` or
/// `fail`. `Drop` only logs a warning if neither was called, as a diagnostic backstop — the lock
/// file is left in place for `sweep_stale_locks` to eventually reclaim.
pub struct BlobWriteScope {
    store: BlobStore,
    key: String,
    tmp_path: PathBuf,
    writer: Option<FileWriter>,
    finished: bool,
}

impl BlobWriteScope {
    pub(crate) fn new(
        store: BlobStore,
        key: String,
        tmp_path: PathBuf,
        writer: FileWriter,
    ) -> BlobWriteScope {
        BlobWriteScope {
            store,
            key,
            tmp_path,
            writer: Some(writer),
            finished: false,
        }
    }

    pub fn writer(&mut self) -> &mut FileWriter {
        self.writer
            .as_mut()
            .expect("writer taken after finish/fail")
    }

    /// Renames the temp file into place, clears any prior error record, and releases the
    /// rendezvous, waking all waiters.
    pub async fn finish(mut self) -> Result<(), String> {
        if let Some(mut writer) = self.writer.take() {
            writer.close().await?;
        }
        tokio::fs::rename(&self.tmp_path, self.store.content_path(&self.key))
            .await
            .map_err(|err| format!("publishing blob {}: {err}", self.key))?;
        let _ = tokio::fs::remove_file(self.store.error_path(&self.key)).await;
        self.finished = true;
        self.store.release(&self.key).await;
        Ok(())
    }

    /// Unlinks the temp file, records `msg` as the generation error, and releases the
    /// rendezvous so waiters observe a `GenerationFailure`.
    pub async fn fail(mut self, msg: impl Into<String>) -> Result<(), String> {
        self.writer = None;
        let _ = tokio::fs::remove_file(&self.tmp_path).await;
        let record = ErrorRecord {
            msg: msg.into(),
            traceback: String::new(),
        };
        let json = serde_json::to_vec(&record)
            .map_err(|err| format!("encoding error record for {}: {err}", self.key))?;
        tokio::fs::write(self.store.error_path(&self.key), json)
            .await
            .map_err(|err| format!("writing error record for {}: {err}", self.key))?;
        self.finished = true;
        self.store.release(&self.key).await;
        Ok(())
    }
}

impl Drop for BlobWriteScope {
    fn drop(&mut self) {
        if !self.finished {
            log::warn!(
                "blob write scope for {} dropped without finish/fail; lock will persist until swept",
                self.key
            );
        }
    }
}
