//! WebDAV 驱动实现
//!
//! Facade over a `RemoteStore`. Content access to a path happens under that
//! path's lock from the shared registry; calls that mutate or enumerate the
//! namespace additionally take the driver-wide coordination lock. Path locks
//! are always taken before the coordination lock.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use super::buffered::BufferedWriter;
use super::client::WebDavClient;
use super::config::{WebDavConfig, WriteMode, WriterOptions};
use super::writer::StreamingWriter;
use crate::storage::{
    ByteReader, FileInfo, FileWriter, LockMode, PathLocks, RemoteStore, Result, StatProbe,
    StorageDriver, StorageError,
};
use crate::utils::{fix_and_clean_path, join_child, parent_dir, with_trailing_separator};

pub const DRIVER_NAME: &str = "webdav";

/// WebDAV 驱动
pub struct WebDavDriver {
    store: Arc<dyn RemoteStore>,
    locks: Arc<PathLocks>,
    /// 全局协调锁
    coordination: Mutex<()>,
    options: WriterOptions,
}

impl WebDavDriver {
    pub fn new(config: WebDavConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let client = WebDavClient::new(&config)?;
        tracing::info!("WebDAV driver initialized: {}", config.address);
        Ok(Self::with_store(Arc::new(client), config.writer_options()))
    }

    /// Driver on top of any remote store / 使用任意远程存储
    pub fn with_store(store: Arc<dyn RemoteStore>, options: WriterOptions) -> Self {
        Self {
            store,
            locks: Arc::new(PathLocks::new()),
            coordination: Mutex::new(()),
            options,
        }
    }

    pub fn options(&self) -> WriterOptions {
        self.options
    }

    /// One stat round trip with an explicit addressing mode / 单次查询
    ///
    /// Any backend failure reads as `NotFound`.
    pub async fn stat_with(&self, path: &str, probe: StatProbe) -> Result<FileInfo> {
        let path = fix_and_clean_path(path);
        let target = match probe {
            StatProbe::Verbatim => path.clone(),
            StatProbe::TrailingSeparator => with_trailing_separator(&path),
        };

        let entry = self
            .store
            .stat(&target)
            .await
            .map_err(|e| StorageError::not_found_from(&path, e))?;
        Ok(FileInfo::from_entry(&path, &entry))
    }
}

#[async_trait]
impl StorageDriver for WebDavDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    async fn get_content(&self, path: &str) -> Result<Bytes> {
        let path = fix_and_clean_path(path);
        tracing::debug!("GetContent: {}", path);

        // no coordination lock: the exclusive path lock already orders this against writers
        let _guard = self.locks.acquire(&path, LockMode::Exclusive).await;
        match self.store.read(&path).await {
            Ok(content) => {
                tracing::debug!("GetContent read {} bytes: {}", content.len(), path);
                Ok(content)
            }
            Err(e) => {
                tracing::debug!("GetContent failed: {} - {}", path, e);
                Err(StorageError::not_found_from(&path, e))
            }
        }
    }

    async fn put_content(&self, path: &str, content: Bytes) -> Result<()> {
        let path = fix_and_clean_path(path);
        tracing::debug!("PutContent: {} ({} bytes)", path, content.len());

        let _guard = self.locks.acquire(&path, LockMode::Exclusive).await;
        let _coordination = self.coordination.lock().await;
        self.store
            .write(&path, content)
            .await
            .map_err(|e| StorageError::fault(&path, e))
    }

    async fn reader(&self, path: &str, offset: u64) -> Result<ByteReader> {
        let path = fix_and_clean_path(path);
        tracing::debug!("Reader: {} (offset {})", path, offset);

        let _guard = self.locks.acquire(&path, LockMode::Shared).await;
        let _coordination = self.coordination.lock().await;
        self.store
            .read_stream_range(&path, offset, 0)
            .await
            .map_err(|e| StorageError::from_remote(&path, e))
    }

    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>> {
        let path = fix_and_clean_path(path);
        tracing::debug!("Writer: {} (append {})", path, append);

        if append && !self.options.resumable {
            return Err(StorageError::invalid_operation(
                &path,
                "append writers are disabled for this driver",
            ));
        }

        // held from the preload read until the upload ends
        let guard = self.locks.acquire(&path, LockMode::Exclusive).await;
        let existing = if append {
            match self.store.read(&path).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("append target unreadable, starting empty: {} - {}", path, e);
                    Bytes::new()
                }
            }
        } else {
            Bytes::new()
        };

        match self.options.write_mode {
            WriteMode::Stream => {
                let mut writer = StreamingWriter::spawn(
                    self.store.clone(),
                    self.locks.clone(),
                    path.clone(),
                    guard,
                    self.options.pipe_capacity,
                );
                if !existing.is_empty() {
                    writer.write(&existing).await?;
                    tracing::debug!("Writer preloaded {} bytes: {}", writer.size(), path);
                }
                Ok(Box::new(writer))
            }
            WriteMode::Buffered => {
                drop(guard);
                Ok(Box::new(BufferedWriter::new(
                    self.store.clone(),
                    self.locks.clone(),
                    path,
                    existing,
                )))
            }
        }
    }

    async fn stat(&self, path: &str) -> Result<FileInfo> {
        let path = fix_and_clean_path(path);
        tracing::debug!("Stat: {}", path);

        match self.stat_with(&path, StatProbe::Verbatim).await {
            Ok(info) => Ok(info),
            Err(_) => self.stat_with(&path, StatProbe::TrailingSeparator).await,
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let path = fix_and_clean_path(path);
        tracing::debug!("List: {}", path);

        let info = self.stat(&path).await?;
        if !info.is_dir {
            return Err(StorageError::invalid_operation(&path, "not a directory"));
        }

        let _coordination = self.coordination.lock().await;
        let entries = self
            .store
            .read_dir(&path)
            .await
            .map_err(|e| StorageError::from_remote(&path, e))?;
        Ok(entries.iter().map(|entry| join_child(&path, &entry.name)).collect())
    }

    async fn move_item(&self, source: &str, dest: &str) -> Result<()> {
        let source = fix_and_clean_path(source);
        let dest = fix_and_clean_path(dest);
        tracing::debug!("Move: {} -> {}", source, dest);

        let _guards = self.locks.acquire_all(&[source.as_str(), dest.as_str()]).await;
        let _coordination = self.coordination.lock().await;

        // not rolled back if the rename fails
        let parent = parent_dir(&dest);
        self.store
            .mkdir_all(&parent)
            .await
            .map_err(|e| StorageError::fault(&dest, e))?;
        self.store
            .rename(&source, &dest, true)
            .await
            .map_err(|e| StorageError::fault(&source, e))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = fix_and_clean_path(path);
        tracing::debug!("Delete: {}", path);

        let _guard = self.locks.acquire(&path, LockMode::Exclusive).await;
        let _coordination = self.coordination.lock().await;
        self.store
            .remove(&path)
            .await
            .map_err(|e| StorageError::fault(&path, e))
    }
}
