use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod error;
pub mod path_lock;
pub mod remote;
pub mod walk;

pub use error::{RemoteError, Result, StorageError, WriterState};
pub use path_lock::{LockMode, PathGuard, PathLocks};
pub use remote::{ByteReader, ByteStream, RemoteEntry, RemoteStore};
pub use walk::{walk_fallback, WalkControl, WalkFn, WalkOptions};

/// Object metadata / 对象元数据
///
/// Always produced by a fresh stat against the backend, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub is_dir: bool,
    /// Unset for directories / 目录无大小
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

impl FileInfo {
    pub fn from_entry(path: &str, entry: &RemoteEntry) -> Self {
        Self {
            path: path.to_string(),
            is_dir: entry.is_dir,
            size: if entry.is_dir { None } else { Some(entry.size) },
            modified: entry.modified,
        }
    }
}

/// How a stat request addresses the backend / 查询方式
///
/// Some servers only resolve a collection when it is queried with a trailing
/// separator, so `stat` tries `Verbatim` first and then `TrailingSeparator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatProbe {
    Verbatim,
    TrailingSeparator,
}

/// Incrementally written file handle / 增量写入句柄
///
/// Open until the first of `close`, `commit` or `cancel`; after that every
/// method except `size` fails with `InvalidState`.
#[async_trait]
pub trait FileWriter: Send {
    /// Push bytes, returns how many were accepted / 写入数据
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Bytes written so far / 已写入字节数
    fn size(&self) -> u64;

    /// End the stream and keep what was written / 关闭
    async fn close(&mut self) -> Result<()>;

    /// Finish the upload and wait until the backend accepted it / 提交
    async fn commit(&mut self) -> Result<()>;

    /// Abort the upload and remove partial content / 取消
    async fn cancel(&mut self) -> Result<()>;
}

/// Path addressed storage driver / 存储驱动接口
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver name / 驱动名称
    fn name(&self) -> &str;

    /// Whole object read / 读取完整内容
    async fn get_content(&self, path: &str) -> Result<Bytes>;

    /// Whole object write / 写入完整内容
    async fn put_content(&self, path: &str, content: Bytes) -> Result<()>;

    /// Range read from `offset` to the end / 从偏移处读取
    async fn reader(&self, path: &str, offset: u64) -> Result<ByteReader>;

    /// Open a writer, optionally continuing existing content / 打开写入器
    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>>;

    async fn stat(&self, path: &str) -> Result<FileInfo>;

    /// Full paths of the direct children of a directory / 列出子项
    async fn list(&self, path: &str) -> Result<Vec<String>>;

    /// Move with overwrite, creating the destination parent / 移动
    async fn move_item(&self, source: &str, dest: &str) -> Result<()>;

    /// Recursive delete / 递归删除
    async fn delete(&self, path: &str) -> Result<()>;

    /// Direct download URL, if the backend can hand one out / 直链
    async fn redirect_url(&self, _path: &str) -> Result<Option<String>> {
        Ok(None)
    }

    /// Depth-first traversal built on `stat` and `list` / 遍历
    async fn walk(&self, path: &str, visitor: &mut WalkFn<'_>, options: WalkOptions) -> Result<()> {
        walk_fallback(self, path, visitor, &options).await
    }
}
