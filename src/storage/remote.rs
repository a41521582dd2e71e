//! Remote store client contract / 远程存储客户端接口
//!
//! The driver only talks to the backend through this trait. Each call is a
//! single request/response exchange; the backend has no append primitive and
//! accepts a write only as one whole stream.

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use tokio::io::AsyncRead;

use super::RemoteError;

/// Upload body / 上传数据流
///
/// An `Err` item aborts the upload.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// Download body / 下载数据流
pub type ByteReader = Box<dyn AsyncRead + Unpin + Send>;

/// Entry reported by `stat` and `read_dir` / 远程条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<Bytes, RemoteError>;

    /// Upload the whole stream as the object's new content / 流式上传
    async fn write_stream(&self, path: &str, body: ByteStream) -> Result<(), RemoteError>;

    /// `length == 0` reads to the end / 长度为0表示读到末尾
    async fn read_stream_range(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<ByteReader, RemoteError>;

    async fn stat(&self, path: &str) -> Result<RemoteEntry, RemoteError>;

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    async fn rename(&self, source: &str, dest: &str, overwrite: bool) -> Result<(), RemoteError>;

    async fn remove(&self, path: &str) -> Result<(), RemoteError>;

    async fn mkdir_all(&self, path: &str) -> Result<(), RemoteError>;

    /// Single buffer upload (default: one-item stream) / 上传完整数据
    async fn write(&self, path: &str, data: Bytes) -> Result<(), RemoteError> {
        let body: ByteStream = Box::pin(futures::stream::once(futures::future::ready(Ok(data))));
        self.write_stream(path, body).await
    }
}
