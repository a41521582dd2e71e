//! In-process remote store / 内存远程存储
//!
//! Map backed implementation of `RemoteStore`, meant for tests and local
//! experiments. Directories exist implicitly above every stored object and
//! explicitly after `mkdir_all`. It reproduces the WebDAV behaviour the driver
//! depends on: collections can be made to resolve only with a trailing
//! separator, removing a missing path succeeds, and a move into a missing
//! parent fails with 409.

use std::collections::{BTreeMap, BTreeSet};
use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::StatusCode;

use crate::storage::{ByteReader, ByteStream, RemoteEntry, RemoteError, RemoteStore};
use crate::utils::{base_name, fix_and_clean_path, parent_dir};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tree {
    files: BTreeMap<String, StoredObject>,
    dirs: BTreeSet<String>,
}

impl Tree {
    fn is_dir(&self, key: &str) -> bool {
        if key == "/" || self.dirs.contains(key) {
            return true;
        }
        let prefix = format!("{}/", key);
        self.files.keys().any(|k| k.starts_with(&prefix))
            || self.dirs.iter().any(|d| d.starts_with(&prefix))
    }

    fn add_dirs(&mut self, key: &str) {
        let mut current = key.to_string();
        while current != "/" {
            self.dirs.insert(current.clone());
            current = parent_dir(&current);
        }
    }

    fn children(&self, key: &str) -> BTreeSet<String> {
        let prefix = if key == "/" { "/".to_string() } else { format!("{}/", key) };
        self.files
            .keys()
            .chain(self.dirs.iter())
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn entry(&self, key: &str) -> Option<RemoteEntry> {
        if let Some(object) = self.files.get(key) {
            return Some(RemoteEntry {
                name: base_name(key).to_string(),
                is_dir: false,
                size: object.data.len() as u64,
                modified: Some(object.modified),
            });
        }
        self.is_dir(key).then(|| RemoteEntry {
            name: base_name(key).to_string(),
            is_dir: true,
            size: 0,
            modified: None,
        })
    }
}

/// Memory backed remote store / 内存远程存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    tree: RwLock<Tree>,
    strict_dirs: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directories only resolve in `stat` when queried with a trailing `/`.
    pub fn with_strict_dirs() -> Self {
        Self {
            tree: RwLock::new(Tree::default()),
            strict_dirs: true,
        }
    }

    /// Seed an object directly / 直接写入对象
    pub fn insert(&self, path: &str, data: impl Into<Bytes>) {
        let key = fix_and_clean_path(path);
        let mut tree = self.tree.write();
        tree.add_dirs(&parent_dir(&key));
        tree.files.insert(
            key,
            StoredObject {
                data: data.into(),
                modified: Utc::now(),
            },
        );
    }

    pub fn contains(&self, path: &str) -> bool {
        self.tree.read().files.contains_key(&fix_and_clean_path(path))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.tree.read().is_dir(&fix_and_clean_path(path))
    }

    fn object(&self, path: &str) -> Result<Bytes, RemoteError> {
        let key = fix_and_clean_path(path);
        self.tree
            .read()
            .files
            .get(&key)
            .map(|object| object.data.clone())
            .ok_or_else(|| RemoteError::NotFound(key))
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn read(&self, path: &str) -> Result<Bytes, RemoteError> {
        self.object(path)
    }

    async fn write_stream(&self, path: &str, mut body: ByteStream) -> Result<(), RemoteError> {
        let key = fix_and_clean_path(path);
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }

        let mut tree = self.tree.write();
        if tree.is_dir(&key) {
            return Err(RemoteError::status("PUT", &key, StatusCode::METHOD_NOT_ALLOWED));
        }
        tree.add_dirs(&parent_dir(&key));
        tree.files.insert(
            key,
            StoredObject {
                data: buffer.freeze(),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn read_stream_range(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<ByteReader, RemoteError> {
        let data = self.object(path)?;
        let start = (offset as usize).min(data.len());
        let end = if length == 0 {
            data.len()
        } else {
            start.saturating_add(length as usize).min(data.len())
        };
        Ok(Box::new(io::Cursor::new(data.slice(start..end))))
    }

    async fn stat(&self, path: &str) -> Result<RemoteEntry, RemoteError> {
        let key = fix_and_clean_path(path);
        let tree = self.tree.read();
        let entry = tree
            .entry(&key)
            .ok_or_else(|| RemoteError::NotFound(key.clone()))?;

        let queried_as_dir = path.ends_with('/');
        if entry.is_dir && self.strict_dirs && !queried_as_dir && key != "/" {
            return Err(RemoteError::NotFound(key));
        }
        if !entry.is_dir && queried_as_dir {
            return Err(RemoteError::NotFound(key));
        }
        Ok(entry)
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let key = fix_and_clean_path(path);
        let tree = self.tree.read();
        if !tree.is_dir(&key) {
            return Err(RemoteError::NotFound(key));
        }

        let entries = tree
            .children(&key)
            .into_iter()
            .filter_map(|name| {
                let child = if key == "/" { format!("/{}", name) } else { format!("{}/{}", key, name) };
                tree.entry(&child)
            })
            .collect();
        Ok(entries)
    }

    async fn rename(&self, source: &str, dest: &str, overwrite: bool) -> Result<(), RemoteError> {
        let from = fix_and_clean_path(source);
        let to = fix_and_clean_path(dest);
        let mut tree = self.tree.write();

        if tree.entry(&from).is_none() {
            return Err(RemoteError::NotFound(from));
        }
        if !tree.is_dir(&parent_dir(&to)) {
            return Err(RemoteError::status("MOVE", &to, StatusCode::CONFLICT));
        }
        if tree.entry(&to).is_some() {
            if !overwrite {
                return Err(RemoteError::status("MOVE", &to, StatusCode::PRECONDITION_FAILED));
            }
            remove_tree(&mut tree, &to);
        }

        if let Some(object) = tree.files.remove(&from) {
            tree.files.insert(to, object);
            return Ok(());
        }

        let prefix = format!("{}/", from);
        let moved_files: Vec<String> = tree.files.keys().filter(|k| k.starts_with(&prefix)).cloned().collect();
        for key in moved_files {
            if let Some(object) = tree.files.remove(&key) {
                tree.files.insert(format!("{}{}", to, &key[from.len()..]), object);
            }
        }
        let moved_dirs: Vec<String> = tree
            .dirs
            .iter()
            .filter(|d| **d == from || d.starts_with(&prefix))
            .cloned()
            .collect();
        for dir in moved_dirs {
            tree.dirs.remove(&dir);
            tree.dirs.insert(format!("{}{}", to, &dir[from.len()..]));
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), RemoteError> {
        let key = fix_and_clean_path(path);
        let mut tree = self.tree.write();
        remove_tree(&mut tree, &key);
        Ok(())
    }

    async fn mkdir_all(&self, path: &str) -> Result<(), RemoteError> {
        let key = fix_and_clean_path(path);
        let mut tree = self.tree.write();
        if tree.files.contains_key(&key) {
            return Err(RemoteError::status("MKCOL", &key, StatusCode::CONFLICT));
        }
        tree.add_dirs(&key);
        Ok(())
    }
}

fn remove_tree(tree: &mut Tree, key: &str) {
    if key == "/" {
        tree.files.clear();
        tree.dirs.clear();
        return;
    }
    let prefix = format!("{}/", key);
    tree.files.retain(|k, _| k != key && !k.starts_with(&prefix));
    tree.dirs.retain(|d| d != key && !d.starts_with(&prefix));
}
