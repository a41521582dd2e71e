//! WebDAV streaming writer / WebDAV流式写入器
//!
//! Caller writes go into a bounded channel. A background task owns the other
//! end and turns it into the body of one `write_stream` call. The task holds
//! the path's exclusive lock until the upload returns.
//!
//! ```text
//! write() ──► mpsc (pipe_capacity chunks) ──► ReceiverStream ──► write_stream()
//! ```

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::storage::{
    ByteStream, FileWriter, LockMode, PathGuard, PathLocks, RemoteError, RemoteStore, Result,
    StorageError, WriterState,
};

/// Largest chunk put into the pipe in one message / 单条消息最大字节数
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

type PipeSender = mpsc::Sender<io::Result<Bytes>>;

/// Pipe-backed writer / 管道写入器
pub struct StreamingWriter {
    path: String,
    size: u64,
    /// `None` while open
    state: Option<WriterState>,
    tx: Option<PipeSender>,
    upload: Option<JoinHandle<Result<(), RemoteError>>>,
    store: Arc<dyn RemoteStore>,
    locks: Arc<PathLocks>,
}

impl StreamingWriter {
    /// Start the background upload; `guard` must be the path's exclusive lock.
    pub fn spawn(
        store: Arc<dyn RemoteStore>,
        locks: Arc<PathLocks>,
        path: String,
        guard: PathGuard,
        pipe_capacity: usize,
    ) -> Self {
        debug_assert_eq!(guard.mode(), LockMode::Exclusive);
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(pipe_capacity.max(1));

        let upload_store = store.clone();
        let upload_path = path.clone();
        let upload = tokio::spawn(async move {
            let _guard = guard;
            let body: ByteStream = Box::pin(ReceiverStream::new(rx));

            tracing::debug!("upload stream started: {}", upload_path);
            let result = upload_store.write_stream(&upload_path, body).await;
            match &result {
                Ok(()) => tracing::debug!("upload stream finished: {}", upload_path),
                Err(e) => tracing::error!("upload stream failed: {} - {}", upload_path, e),
            }
            result
        });

        Self {
            path,
            size: 0,
            state: None,
            tx: Some(tx),
            upload: Some(upload),
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

    fn pipe_closed(&self) -> StorageError {
        StorageError::fault(
            &self.path,
            RemoteError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "upload pipe closed")),
        )
    }

    /// Signal end-of-stream and wait for the upload result / 结束并等待上传
    async fn finish(&mut self) -> Result<()> {
        self.tx.take();
        let Some(upload) = self.upload.take() else {
            return Ok(());
        };
        match upload.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StorageError::fault(&self.path, e)),
            Err(e) => Err(StorageError::fault(&self.path, RemoteError::Task(e.to_string()))),
        }
    }

    /// End the stream with an error so the backend discards the upload.
    fn abort_pipe(&mut self) {
        if let Some(tx) = self.tx.take() {
            let aborted = io::Error::new(io::ErrorKind::Interrupted, "upload cancelled");
            if tx.try_send(Err(aborted)).is_err() {
                // pipe full or consumer gone, stop the task instead
                if let Some(upload) = &self.upload {
                    upload.abort();
                }
            }
        }
    }
}

#[async_trait]
impl FileWriter for StreamingWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.ensure_open()?;

        let mut accepted = 0;
        for chunk in buf.chunks(MAX_CHUNK_SIZE) {
            let sent = match self.tx.as_ref() {
                Some(tx) => tx.send(Ok(Bytes::copy_from_slice(chunk))).await.is_ok(),
                None => false,
            };
            if !sent {
                if accepted > 0 {
                    tracing::warn!("upload pipe closed after {} of {} bytes: {}", accepted, buf.len(), self.path);
                    return Ok(accepted);
                }
                return Err(self.pipe_closed());
            }
            accepted += chunk.len();
            self.size += chunk.len() as u64;
        }
        Ok(accepted)
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = Some(WriterState::Closed);
        self.finish().await
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = Some(WriterState::Committed);
        tracing::debug!("commit {} ({} bytes)", self.path, self.size);
        self.finish().await
    }

    async fn cancel(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = Some(WriterState::Cancelled);
        self.abort_pipe();

        if let Some(upload) = self.upload.take() {
            match upload.await {
                Ok(Ok(())) => tracing::debug!("upload completed before cancel: {}", self.path),
                Ok(Err(e)) => tracing::debug!("upload aborted by cancel: {} - {}", self.path, e),
                Err(e) if e.is_cancelled() => tracing::debug!("upload task stopped: {}", self.path),
                Err(e) => tracing::warn!("upload task panicked: {} - {}", self.path, e),
            }
        }

        let _guard = self.locks.acquire(&self.path, LockMode::Exclusive).await;
        self.store
            .remove(&self.path)
            .await
            .map_err(|e| StorageError::fault(&self.path, e))
    }
}

impl Drop for StreamingWriter {
    fn drop(&mut self) {
        if self.state.is_none() {
            tracing::warn!("writer for {} dropped while open, discarding upload", self.path);
            self.abort_pipe();
        }
    }
}
