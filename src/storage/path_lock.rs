//! Per-path lock registry / 路径锁注册表
//!
//! One reader/writer lock per logical path, created on first use. The map
//! itself is guarded by a single registry-wide mutex that is held only while a
//! lock is looked up or inserted, never while a path lock is awaited.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::utils::fix_and_clean_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Held path lock, released on drop / 路径锁守卫
///
/// Owned, so it can move into a background task and stay held for the whole
/// upload.
#[derive(Debug)]
pub enum PathGuard {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

impl PathGuard {
    pub fn mode(&self) -> LockMode {
        match self {
            Self::Shared(_) => LockMode::Shared,
            Self::Exclusive(_) => LockMode::Exclusive,
        }
    }
}

#[derive(Debug, Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, path: &str) -> Arc<RwLock<()>> {
        let key = fix_and_clean_path(path);
        let mut locks = self.locks.lock();
        locks.entry(key).or_default().clone()
    }

    /// Wait for the path lock in the given mode / 获取路径锁
    pub async fn acquire(&self, path: &str, mode: LockMode) -> PathGuard {
        let lock = self.lock_for(path);
        match mode {
            LockMode::Shared => PathGuard::Shared(lock.read_owned().await),
            LockMode::Exclusive => PathGuard::Exclusive(lock.write_owned().await),
        }
    }

    /// Exclusive locks on several paths, taken in sorted order / 按序获取多个路径锁
    pub async fn acquire_all(&self, paths: &[&str]) -> Vec<PathGuard> {
        let mut keys: Vec<String> = paths.iter().map(|p| fix_and_clean_path(p)).collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.acquire(&key, LockMode::Exclusive).await);
        }
        guards
    }

    /// Number of paths that have a lock / 已登记路径数
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop locks nobody holds or waits on; returns how many were evicted.
    ///
    /// The registry never shrinks on its own. Long-lived processes with an
    /// unbounded key space can call this periodically.
    pub fn sweep(&self) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_exclusive_blocks_exclusive() {
        let locks = PathLocks::new();
        let held = locks.acquire("/a", LockMode::Exclusive).await;
        assert_eq!(held.mode(), LockMode::Exclusive);

        let waited = timeout(Duration::from_millis(50), locks.acquire("/a", LockMode::Exclusive)).await;
        assert!(waited.is_err());

        drop(held);
        let guard = timeout(Duration::from_millis(50), locks.acquire("/a", LockMode::Exclusive)).await;
        assert!(guard.is_ok());
    }

    #[tokio::test]
    async fn test_shared_holders_coexist() {
        let locks = PathLocks::new();
        let _first = locks.acquire("/a", LockMode::Shared).await;
        let second = timeout(Duration::from_millis(50), locks.acquire("/a", LockMode::Shared)).await;
        assert!(second.is_ok());

        let writer = timeout(Duration::from_millis(50), locks.acquire("/a", LockMode::Exclusive)).await;
        assert!(writer.is_err());
    }

    #[tokio::test]
    async fn test_distinct_paths_do_not_contend() {
        let locks = PathLocks::new();
        let _a = locks.acquire("/a", LockMode::Exclusive).await;
        let b = timeout(Duration::from_millis(50), locks.acquire("/b", LockMode::Exclusive)).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_keys_are_normalized() {
        let locks = PathLocks::new();
        let _held = locks.acquire("a//b/", LockMode::Exclusive).await;
        let same = timeout(Duration::from_millis(50), locks.acquire("/a/b", LockMode::Exclusive)).await;
        assert!(same.is_err());
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_acquire_all_dedups() {
        let locks = PathLocks::new();
        let guards = locks.acquire_all(&["/b", "/a", "/b/"]).await;
        assert_eq!(guards.len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_keeps_held_locks() {
        let locks = PathLocks::new();
        let held = locks.acquire("/held", LockMode::Shared).await;
        drop(locks.acquire("/idle", LockMode::Exclusive).await);

        assert_eq!(locks.sweep(), 1);
        assert_eq!(locks.len(), 1);

        drop(held);
        assert_eq!(locks.sweep(), 1);
        assert!(locks.is_empty());
    }
}
