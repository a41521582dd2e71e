//! Depth-first walk on top of `stat` and `list` / 基于 stat 与 list 的遍历

use futures::future::BoxFuture;

use super::{FileInfo, Result, StorageDriver};

/// Visitor decision / 遍历控制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    /// Do not descend into this entry; same as `Continue` for files
    SkipDir,
    /// End the whole walk without error
    Stop,
}

#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Skip every entry sorting at or before this path / 从此路径之后开始
    pub start_after_hint: Option<String>,
}

impl WalkOptions {
    pub fn start_after(hint: impl Into<String>) -> Self {
        Self {
            start_after_hint: Some(hint.into()),
        }
    }
}

pub type WalkFn<'a> = dyn FnMut(&FileInfo) -> Result<WalkControl> + Send + 'a;

/// Visit every descendant of `from` in lexical depth-first order.
///
/// `from` itself is not visited. Visitor errors abort the walk.
pub async fn walk_fallback<D>(
    driver: &D,
    from: &str,
    visitor: &mut WalkFn<'_>,
    options: &WalkOptions,
) -> Result<()>
where
    D: StorageDriver + ?Sized,
{
    walk_dir(driver, from.to_string(), options.start_after_hint.as_deref(), visitor).await?;
    Ok(())
}

/// Returns `true` once the visitor asked to stop.
fn walk_dir<'a, 'f, D>(
    driver: &'a D,
    from: String,
    hint: Option<&'a str>,
    visitor: &'a mut WalkFn<'f>,
) -> BoxFuture<'a, Result<bool>>
where
    D: StorageDriver + ?Sized,
    'f: 'a,
{
    Box::pin(async move {
        let mut children = driver.list(&from).await?;
        children.sort();

        for child in children {
            if let Some(hint) = hint {
                if child.as_str() <= hint {
                    // entries below the hint still sort after it
                    if child == hint || hint.starts_with(&format!("{}/", child)) {
                        let info = driver.stat(&child).await?;
                        if info.is_dir && walk_dir(driver, child, Some(hint), &mut *visitor).await? {
                            return Ok(true);
                        }
                    }
                    continue;
                }
            }

            let info = driver.stat(&child).await?;
            match visitor(&info)? {
                WalkControl::Stop => return Ok(true),
                WalkControl::SkipDir if info.is_dir => continue,
                _ => {}
            }

            if info.is_dir && walk_dir(driver, child, hint, &mut *visitor).await? {
                return Ok(true);
            }
        }

        Ok(false)
    })
}
