//! WebDAV驱动配置 / WebDAV driver parameters

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Writer implementation used by `writer()` / 写入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Pipe bytes into one background upload / 后台流式上传
    #[default]
    Stream,
    /// Keep bytes in memory, upload on commit or close / 内存缓冲后上传
    Buffered,
}

/// WebDAV 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebDavConfig {
    /// WebDAV服务器地址 (如 https://dav.example.com/files)
    #[serde(alias = "baseURL", alias = "base_url")]
    pub address: String,
    /// 用户名
    #[serde(default)]
    pub username: String,
    /// 密码
    #[serde(default)]
    pub password: String,
    /// 根目录路径
    #[serde(default = "default_root")]
    pub root_path: String,
    /// 跳过TLS证书验证
    #[serde(default)]
    pub tls_insecure_skip_verify: bool,
    #[serde(default)]
    pub write_mode: WriteMode,
    /// Allow append writers (content is preloaded) / 允许追加写入
    #[serde(default = "default_true")]
    pub resumable: bool,
    /// Chunks the upload pipe holds before `write` blocks / 管道容量
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,
    /// 普通请求超时（秒）
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// 上传超时（秒）
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,
}

fn default_root() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_pipe_capacity() -> usize {
    32
}

fn default_timeout() -> u64 {
    60
}

fn default_upload_timeout() -> u64 {
    3600
}

impl WebDavConfig {
    /// Parse the opaque key/value parameters / 解析配置参数
    pub fn from_value(parameters: Value) -> Result<Self> {
        let config: WebDavConfig = serde_json::from_value(parameters)
            .context("failed to parse webdav parameters")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.address)
            .with_context(|| format!("invalid webdav address: {}", self.address))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(anyhow!("unsupported scheme for webdav address: {}", url.scheme()));
        }
        if self.pipe_capacity == 0 {
            return Err(anyhow!("pipe_capacity must be at least 1"));
        }
        Ok(())
    }

    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            write_mode: self.write_mode,
            resumable: self.resumable,
            pipe_capacity: self.pipe_capacity,
        }
    }
}

/// Writer behaviour, independent of the transport / 写入器选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    pub write_mode: WriteMode,
    pub resumable: bool,
    pub pipe_capacity: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            write_mode: WriteMode::Stream,
            resumable: true,
            pipe_capacity: default_pipe_capacity(),
        }
    }
}
