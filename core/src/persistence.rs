//! Debounced atomic persistence (design note §9).
//!
//! A small structure: writers flip `pending`; a background timer task (or an
//! explicit `flush`) performs the actual write, serialized on an internal
//! lock so concurrent flushes never race. Writes are atomic: serialize to a
//! temp file beside the destination, then `rename` over it.

use crate::error::EngineResult;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// Write `bytes` to `path` atomically: `<path>.tmp-<pid>-<epoch_ms>-<uuid>`
/// then rename over the destination.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> EngineResult<()> {
    let pid = std::process::id();
    let epoch_ms = chrono::Utc::now().timestamp_millis();
    let token = uuid::Uuid::new_v4();
    let tmp_name = format!(
        "{}.tmp-{}-{}-{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("state"),
        pid,
        epoch_ms,
        token
    );
    let tmp_path = path.with_file_name(tmp_name);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Debounces repeated `mark_dirty()` calls into a single write every
/// `debounce` interval, serialized so only one write is ever in flight.
pub struct Debounced {
    debounce: Duration,
    path: PathBuf,
    dirty: Notify,
    write_lock: Mutex<()>,
}

impl Debounced {
    pub fn new(path: PathBuf, debounce: Duration) -> Arc<Self> {
        let this = Arc::new(Self {
            debounce,
            path,
            dirty: Notify::new(),
            write_lock: Mutex::new(()),
        });
        this
    }

    /// Mark the backing state dirty; the caller should also spawn
    /// `run_debounce_loop` once at startup to actually drive writes, or call
    /// `flush` directly for a synchronous write (e.g. on shutdown).
    pub fn mark_dirty(&self) {
        self.dirty.notify_one();
    }

    /// Runs forever, waiting for a dirty notification, sleeping the debounce
    /// window, then invoking `serialize` and writing the result atomically.
    /// Intended to be spawned once as a background task per persisted file.
    pub async fn run_debounce_loop<F>(self: Arc<Self>, serialize: F)
    where
        F: Fn() -> EngineResult<Vec<u8>> + Send + Sync + 'static,
    {
        loop {
            self.dirty.notified().await;
            tokio::time::sleep(self.debounce).await;
            if let Err(e) = self.flush(&serialize).await {
                log::warn!("[persistence] debounced write to {:?} failed: {}", self.path, e);
            }
        }
    }

    /// Force an immediate write, serialized against any write in progress.
    pub async fn flush<F>(&self, serialize: &F) -> EngineResult<()>
    where
        F: Fn() -> EngineResult<Vec<u8>>,
    {
        let _guard = self.write_lock.lock().await;
        let bytes = serialize()?;
        write_atomic(&self.path, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_round_trips() {
        let dir = std::env::temp_dir().join(format!("cohort-test-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("state.json");
        write_atomic(&path, b"{\"a\":1}").await.unwrap();
        let read_back = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(read_back, "{\"a\":1}");
        // no leftover temp files
        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
