//! Buffered writer / 缓冲写入器
//!
//! Keeps the whole object in memory and uploads it with one request on
//! `commit` or `close`. No background task, so nothing runs until the caller
//! finishes the writer.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::storage::{FileWriter, LockMode, PathLocks, RemoteStore, Result, StorageError, WriterState};

pub struct BufferedWriter {
    path: String,
    buffer: BytesMut,
    state: Option<WriterState>,
    store: Arc<dyn RemoteStore>,
    locks: Arc<PathLocks>,
}

impl BufferedWriter {
    /// `existing` is the content an append writer continues from.
    pub fn new(store: Arc<dyn RemoteStore>, locks: Arc<PathLocks>, path: String, existing: Bytes) -> Self {
        let mut buffer = BytesMut::with_capacity(existing.len());
        buffer.extend_from_slice(&existing);
        Self {
            path,
            buffer,
            state: None,
            store,
            locks,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            Some(state) => Err(StorageError::invalid_state(&self.path, state)),
            None => Ok(()),
        }
    }

    async fn flush(&mut self) -> Result<()> {
        let data = self.buffer.clone().freeze();
        let _guard = self.locks.acquire(&self.path, LockMode::Exclusive).await;
        tracing::debug!("flush {} ({} bytes)", self.path, data.len());
        self.store
            .write(&self.path, data)
            .await
            .map_err(|e| StorageError::fault(&self.path, e))
    }
}

#[async_trait]
impl FileWriter for BufferedWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn size(&self) -> u64 {
        self.buffer.len() as u64
    }

    async fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = Some(WriterState::Closed);
        self.flush().await
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = Some(WriterState::Committed);
        self.flush().await
    }

    async fn cancel(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = Some(WriterState::Cancelled);

        let _guard = self.locks.acquire(&self.path, LockMode::Exclusive).await;
        self.store
            .remove(&self.path)
            .await
            .map_err(|e| StorageError::fault(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::memory::MemoryStore;
    use crate::storage::{ByteReader, ByteStream, RemoteEntry, RemoteError};

    fn writer(store: Arc<MemoryStore>, path: &str, existing: &'static str) -> BufferedWriter {
        BufferedWriter::new(store, Arc::new(PathLocks::new()), path.to_string(), Bytes::from_static(existing.as_bytes()))
    }

    /// Memory store that refuses DELETE
    struct NoDeleteStore(MemoryStore);

    #[async_trait]
    impl RemoteStore for NoDeleteStore {
        async fn read(&self, path: &str) -> Result<Bytes, RemoteError> {
            self.0.read(path).await
        }
        async fn write_stream(&self, path: &str, body: ByteStream) -> Result<(), RemoteError> {
            self.0.write_stream(path, body).await
        }
        async fn read_stream_range(&self, path: &str, offset: u64, length: u64) -> Result<ByteReader, RemoteError> {
            self.0.read_stream_range(path, offset, length).await
        }
        async fn stat(&self, path: &str) -> Result<RemoteEntry, RemoteError> {
            self.0.stat(path).await
        }
        async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
            self.0.read_dir(path).await
        }
        async fn rename(&self, source: &str, dest: &str, overwrite: bool) -> Result<(), RemoteError> {
            self.0.rename(source, dest, overwrite).await
        }
        async fn remove(&self, path: &str) -> Result<(), RemoteError> {
            Err(RemoteError::status("DELETE", path, reqwest::StatusCode::FORBIDDEN))
        }
        async fn mkdir_all(&self, path: &str) -> Result<(), RemoteError> {
            self.0.mkdir_all(path).await
        }
    }

    #[tokio::test]
    async fn test_nothing_reaches_backend_before_commit() {
        let store = Arc::new(MemoryStore::new());
        let mut w = writer(store.clone(), "/blob", "");

        w.write(b"abc").await.unwrap();
        assert!(!store.contains("/blob"));

        w.commit().await.unwrap();
        assert_eq!(store.read("/blob").await.unwrap(), "abc");
        assert!(w.close().await.unwrap_err().is_invalid_state());
    }

    #[tokio::test]
    async fn test_continues_existing_content() {
        let store = Arc::new(MemoryStore::new());
        let mut w = writer(store.clone(), "/blob", "old-");
        assert_eq!(w.size(), 4);

        w.write(b"new").await.unwrap();
        w.close().await.unwrap();
        assert_eq!(store.read("/blob").await.unwrap(), "old-new");
        assert_eq!(w.size(), 7);
    }

    #[tokio::test]
    async fn test_cancel_removes_object() {
        let store = Arc::new(MemoryStore::new());
        store.insert("/blob", "previous");
        let mut w = writer(store.clone(), "/blob", "previous");

        w.write(b"!").await.unwrap();
        w.cancel().await.unwrap();
        assert!(!store.contains("/blob"));
        assert_eq!(w.size(), 9);
        assert!(w.write(b"x").await.unwrap_err().is_invalid_state());
    }

    #[tokio::test]
    async fn test_cancel_reports_failed_remove() {
        let store = Arc::new(NoDeleteStore(MemoryStore::new()));
        store.0.insert("/blob", "kept");
        let mut w = BufferedWriter::new(store.clone(), Arc::new(PathLocks::new()), "/blob".to_string(), Bytes::new());

        w.write(b"abc").await.unwrap();
        let err = w.cancel().await.unwrap_err();
        assert!(err.is_fault());
        assert!(store.0.contains("/blob"));

        assert!(w.cancel().await.unwrap_err().is_invalid_state());
        assert!(w.commit().await.unwrap_err().is_invalid_state());
        assert_eq!(w.size(), 3);
    }
}
