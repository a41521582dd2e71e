//! Error taxonomy / 错误分类
//!
//! `RemoteError` carries whatever the backend reported, `StorageError` is what
//! callers of the driver see. Every backend failure is translated at the driver
//! boundary; the raw error is kept as the `source` for diagnostics.

use std::fmt;

use reqwest::StatusCode;
use thiserror::Error;

/// Terminal state of a file writer / 写入器终止状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Closed,
    Committed,
    Cancelled,
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Committed => "committed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Remote store client error / 远程存储客户端错误
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{0} not found on remote")]
    NotFound(String),

    #[error("{method} {target} failed: {status}")]
    Status {
        method: String,
        target: String,
        status: StatusCode,
    },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed multistatus body: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("upload task failed: {0}")]
    Task(String),
}

impl RemoteError {
    pub fn status(method: &str, target: &str, status: StatusCode) -> Self {
        Self::Status {
            method: method.to_string(),
            target: target.to_string(),
            status,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Status { status, .. } => *status == StatusCode::NOT_FOUND,
            _ => false,
        }
    }
}

/// Driver error as seen by callers / 驱动对外错误
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("path not found: {path}")]
    NotFound {
        path: String,
        #[source]
        source: Option<RemoteError>,
    },

    #[error("invalid operation on {path}: {reason}")]
    InvalidOperation { path: String, reason: String },

    #[error("writer for {path} is already {state}")]
    InvalidState { path: String, state: WriterState },

    #[error("storage backend failed on {path}: {source}")]
    StorageFault {
        path: String,
        #[source]
        source: RemoteError,
    },
}

impl StorageError {
    pub fn not_found(path: &str) -> Self {
        Self::NotFound {
            path: path.to_string(),
            source: None,
        }
    }

    /// Collapse any backend failure into `NotFound`, keeping the cause.
    pub fn not_found_from(path: &str, source: RemoteError) -> Self {
        Self::NotFound {
            path: path.to_string(),
            source: Some(source),
        }
    }

    pub fn invalid_operation(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(path: &str, state: WriterState) -> Self {
        Self::InvalidState {
            path: path.to_string(),
            state,
        }
    }

    pub fn fault(path: &str, source: RemoteError) -> Self {
        Self::StorageFault {
            path: path.to_string(),
            source,
        }
    }

    /// `NotFound` when the backend said so, `StorageFault` otherwise.
    pub fn from_remote(path: &str, source: RemoteError) -> Self {
        if source.is_not_found() {
            Self::not_found_from(path, source)
        } else {
            Self::fault(path, source)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }

    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, Self::InvalidOperation { .. })
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Self::StorageFault { .. })
    }
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_remote_splits_missing_from_faults() {
        let missing = StorageError::from_remote("/a", RemoteError::NotFound("/a".into()));
        assert!(missing.is_not_found());

        let gone = StorageError::from_remote("/a", RemoteError::status("GET", "/a", StatusCode::NOT_FOUND));
        assert!(gone.is_not_found());

        let denied = StorageError::from_remote("/a", RemoteError::status("GET", "/a", StatusCode::FORBIDDEN));
        assert!(denied.is_fault());
    }

    #[test]
    fn test_invalid_state_message() {
        let err = StorageError::invalid_state("/blob", WriterState::Committed);
        assert_eq!(err.to_string(), "writer for /blob is already committed");
    }
}
