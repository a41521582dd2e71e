//! WebDAV blob storage driver / WebDAV 存储驱动
//!
//! Path addressed blob storage on top of a WebDAV server. Writers stream
//! through a bounded pipe into a background PUT, appends are emulated by
//! re-uploading the existing content followed by the new bytes.

mod buffered;
mod client;
mod config;
mod driver;
mod writer;

pub use buffered::BufferedWriter;
pub use client::WebDavClient;
pub use config::{WebDavConfig, WriteMode, WriterOptions};
pub use driver::{WebDavDriver, DRIVER_NAME};
pub use writer::{StreamingWriter, MAX_CHUNK_SIZE};

use anyhow::{Context, Result};
use serde_json::Value;

/// Build a driver from JSON parameters / 从参数创建驱动
pub fn from_parameters(parameters: Value) -> Result<WebDavDriver> {
    let config = WebDavConfig::from_value(parameters).context("invalid webdav parameters")?;
    WebDavDriver::new(config)
}
