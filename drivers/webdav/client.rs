//! WebDAV HTTP 客户端 / WebDAV HTTP client
//!
//! 使用reqwest实现WebDAV协议，每个操作对应一次请求，上传为单次流式 PUT

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{Body, Client, Method, RequestBuilder, StatusCode};
use url::Url;

use super::config::WebDavConfig;
use crate::storage::{ByteReader, ByteStream, RemoteEntry, RemoteError, RemoteStore};
use crate::utils::{base_name, fix_and_clean_path, parent_dir, with_trailing_separator};

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:resourcetype/>
    <D:getcontentlength/>
    <D:getlastmodified/>
  </D:prop>
</D:propfind>"#;

/// WebDAV 客户端
pub struct WebDavClient {
    address: String,
    root_path: String,
    username: String,
    password: String,
    client: Client,
    transfer_client: Client,
}

impl WebDavClient {
    pub fn new(config: &WebDavConfig) -> anyhow::Result<Self> {
        // 普通请求客户端（较短超时）
        let client = Client::builder()
            .danger_accept_invalid_certs(config.tls_insecure_skip_verify)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .build()
            .context("failed to build webdav http client")?;

        // 传输专用客户端（长超时，用于流式上传下载）
        let transfer_client = Client::builder()
            .danger_accept_invalid_certs(config.tls_insecure_skip_verify)
            .timeout(Duration::from_secs(config.upload_timeout_secs))
            .connect_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .tcp_nodelay(true)
            .build()
            .context("failed to build webdav transfer client")?;

        Ok(Self {
            address: config.address.clone(),
            root_path: config.root_path.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            client,
            transfer_client,
        })
    }

    /// 构建完整URL, keeps a trailing separator on `path`
    pub(crate) fn build_url(&self, path: &str) -> String {
        let base = self.address.trim_end_matches('/');
        let segments: Vec<String> = self
            .root_path
            .split('/')
            .chain(path.split('/'))
            .filter(|s| !s.is_empty())
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();

        let mut url = format!("{}/{}", base, segments.join("/"));
        if path.ends_with('/') && !url.ends_with('/') {
            url.push('/');
        }
        url
    }

    /// Decoded URL path the server will echo back in hrefs
    fn url_path(&self, path: &str) -> String {
        let url = self.build_url(path);
        match Url::parse(&url) {
            Ok(parsed) => decode_path(parsed.path()),
            Err(_) => path.to_string(),
        }
    }

    /// 获取认证头
    fn auth_header(&self) -> Option<String> {
        use base64::Engine;
        if self.username.is_empty() {
            return None;
        }
        let credentials = format!("{}:{}", self.username, self.password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials.as_bytes());
        Some(format!("Basic {}", encoded))
    }

    fn request(&self, client: &Client, method: Method, url: &str) -> RequestBuilder {
        let request = client.request(method, url);
        match self.auth_header() {
            Some(auth) => request.header("Authorization", auth),
            None => request,
        }
    }

    async fn propfind(&self, path: &str, depth: &str) -> Result<Vec<PropEntry>, RemoteError> {
        let url = self.build_url(path);
        tracing::debug!("WebDAV PROPFIND: {} (depth {})", url, depth);

        let response = self
            .request(&self.client, dav_method("PROPFIND")?, &url)
            .header("Depth", depth)
            .header("Content-Type", "application/xml")
            .body(PROPFIND_BODY)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(RemoteError::status("PROPFIND", &url, status));
        }

        let xml = response.text().await?;
        parse_multistatus(&xml)
    }

    async fn mkcol(&self, path: &str) -> Result<StatusCode, RemoteError> {
        let url = self.build_url(&with_trailing_separator(path));
        tracing::debug!("WebDAV MKCOL: {}", url);
        let response = self
            .request(&self.client, dav_method("MKCOL")?, &url)
            .send()
            .await?;
        Ok(response.status())
    }
}

#[async_trait]
impl RemoteStore for WebDavClient {
    async fn read(&self, path: &str) -> Result<Bytes, RemoteError> {
        let url = self.build_url(path);
        tracing::debug!("WebDAV GET: {}", url);

        let response = self.request(&self.client, Method::GET, &url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(RemoteError::status("GET", &url, status));
        }
        Ok(response.bytes().await?)
    }

    async fn write_stream(&self, path: &str, body: ByteStream) -> Result<(), RemoteError> {
        let parent = parent_dir(path);
        if parent != "/" {
            self.mkdir_all(&parent).await?;
        }

        let url = self.build_url(path);
        tracing::debug!("WebDAV PUT (stream): {}", url);

        let response = self
            .request(&self.transfer_client, Method::PUT, &url)
            .header("Content-Type", "application/octet-stream")
            .body(Body::wrap_stream(body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::status("PUT", &url, status));
        }
        tracing::debug!("WebDAV PUT成功: {}", url);
        Ok(())
    }

    async fn read_stream_range(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> Result<ByteReader, RemoteError> {
        let url = self.build_url(path);
        tracing::debug!("WebDAV GET: {} (offset {}, length {})", url, offset, length);

        let mut request = self.request(&self.transfer_client, Method::GET, &url);
        if let Some(range) = range_header(offset, length) {
            request = request.header("Range", range);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            // offset at or past the end
            return Ok(Box::new(tokio::io::empty()));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(RemoteError::status("GET", &url, status));
        }

        // 服务器忽略Range时自行跳过前缀
        let mut skip = if status == StatusCode::PARTIAL_CONTENT { 0 } else { offset };
        let mut remaining = if status == StatusCode::PARTIAL_CONTENT || length == 0 {
            u64::MAX
        } else {
            length
        };
        let stream = response.bytes_stream().map(move |chunk| {
            chunk
                .map(|bytes| {
                    let start = skip.min(bytes.len() as u64) as usize;
                    skip -= start as u64;
                    let bytes = bytes.slice(start..);
                    let take = remaining.min(bytes.len() as u64) as usize;
                    remaining -= take as u64;
                    bytes.slice(..take)
                })
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
        });

        Ok(Box::new(tokio_util::io::StreamReader::new(Box::pin(stream))))
    }

    async fn stat(&self, path: &str) -> Result<RemoteEntry, RemoteError> {
        let entries = self.propfind(path, "0").await?;
        let entry = entries
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::InvalidResponse(format!("empty multistatus for {}", path)))?;
        Ok(entry.into_remote(base_name(path)))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let dir = with_trailing_separator(path);
        let own = self.url_path(&dir);
        let own = own.trim_end_matches('/');

        let entries = self.propfind(&dir, "1").await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.href.trim_end_matches('/') != own)
            .map(|entry| {
                let name = base_name(&entry.href).to_string();
                entry.into_remote(&name)
            })
            .collect())
    }

    async fn rename(&self, source: &str, dest: &str, overwrite: bool) -> Result<(), RemoteError> {
        let source_url = self.build_url(source);
        let dest_url = self.build_url(dest);
        tracing::debug!("WebDAV MOVE: {} -> {}", source_url, dest_url);

        let response = self
            .request(&self.client, dav_method("MOVE")?, &source_url)
            .header("Destination", &dest_url)
            .header("Overwrite", if overwrite { "T" } else { "F" })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(source.to_string()));
        }
        if !status.is_success() {
            return Err(RemoteError::status("MOVE", &source_url, status));
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), RemoteError> {
        let url = self.build_url(path);
        tracing::debug!("WebDAV DELETE: {}", url);

        let response = self.request(&self.client, Method::DELETE, &url).send().await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(RemoteError::status("DELETE", &url, status))
    }

    async fn mkdir_all(&self, path: &str) -> Result<(), RemoteError> {
        let path = fix_and_clean_path(path);
        if path == "/" {
            return Ok(());
        }

        let status = self.mkcol(&path).await?;
        if collection_exists(status) {
            return Ok(());
        }
        if status != StatusCode::CONFLICT {
            return Err(RemoteError::status("MKCOL", &path, status));
        }

        // 父目录缺失，逐级创建
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            let status = self.mkcol(&current).await?;
            if !collection_exists(status) {
                return Err(RemoteError::status("MKCOL", &current, status));
            }
        }
        Ok(())
    }
}

/// `Range` value for a read, `None` for a whole-object read
fn range_header(offset: u64, length: u64) -> Option<String> {
    if offset == 0 && length == 0 {
        return None;
    }
    match offset.checked_add(length.saturating_sub(1)) {
        Some(last) if length > 0 => Some(format!("bytes={}-{}", offset, last)),
        _ => Some(format!("bytes={}-", offset)),
    }
}

fn collection_exists(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED
}

fn dav_method(name: &'static str) -> Result<Method, RemoteError> {
    Method::from_bytes(name.as_bytes())
        .map_err(|e| RemoteError::InvalidResponse(format!("{}: {}", name, e)))
}

fn decode_path(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

/// One `<response>` of a multistatus body
#[derive(Debug, Clone, PartialEq, Eq)]
struct PropEntry {
    /// Decoded URL path
    href: String,
    is_dir: bool,
    size: u64,
    modified: Option<DateTime<Utc>>,
}

impl PropEntry {
    fn into_remote(self, name: &str) -> RemoteEntry {
        RemoteEntry {
            name: name.to_string(),
            is_dir: self.is_dir,
            size: if self.is_dir { 0 } else { self.size },
            modified: self.modified,
        }
    }
}

/// 解析PROPFIND响应
fn parse_multistatus(xml: &str) -> Result<Vec<PropEntry>, RemoteError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut entries = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut current: Option<PropEntry> = None;
    let mut in_href = false;
    let mut in_getcontentlength = false;
    let mut in_getlastmodified = false;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => {
                let local_name = e.local_name();
                match local_name.as_ref() {
                    b"response" => {
                        current = Some(PropEntry {
                            href: String::new(),
                            is_dir: false,
                            size: 0,
                            modified: None,
                        })
                    }
                    b"href" => in_href = true,
                    b"collection" => {
                        if let Some(entry) = current.as_mut() {
                            entry.is_dir = true;
                        }
                    }
                    b"getcontentlength" => in_getcontentlength = true,
                    b"getlastmodified" => in_getlastmodified = true,
                    _ => {}
                }
            }
            Event::Empty(ref e) => {
                if e.local_name().as_ref() == b"collection" {
                    if let Some(entry) = current.as_mut() {
                        entry.is_dir = true;
                    }
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"response" => {
                    if let Some(entry) = current.take() {
                        if !entry.href.is_empty() {
                            entries.push(entry);
                        }
                    }
                }
                b"href" => in_href = false,
                b"getcontentlength" => in_getcontentlength = false,
                b"getlastmodified" => in_getlastmodified = false,
                _ => {}
            },
            Event::Text(e) => {
                let text = e.unescape().unwrap_or_default().to_string();
                if let Some(entry) = current.as_mut() {
                    if in_href {
                        entry.href = href_path(&text);
                    } else if in_getcontentlength {
                        entry.size = text.trim().parse().unwrap_or(0);
                    } else if in_getlastmodified {
                        entry.modified = DateTime::parse_from_rfc2822(text.trim())
                            .ok()
                            .map(|t| t.with_timezone(&Utc));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}

/// Hrefs are either absolute URLs or absolute paths
fn href_path(href: &str) -> String {
    match Url::parse(href) {
        Ok(url) => decode_path(url.path()),
        Err(_) => decode_path(href),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn client(address: &str, root: &str) -> WebDavClient {
        let config = WebDavConfig::from_value(json!({ "address": address, "root_path": root })).unwrap();
        WebDavClient::new(&config).unwrap()
    }

    #[test]
    fn test_build_url() {
        let c = client("https://dav.example.com/files/", "/");
        assert_eq!(c.build_url("/"), "https://dav.example.com/files/");
        assert_eq!(c.build_url("/a/b"), "https://dav.example.com/files/a/b");
        assert_eq!(c.build_url("/a/dir/"), "https://dav.example.com/files/a/dir/");
        assert_eq!(c.build_url("/with space"), "https://dav.example.com/files/with%20space");

        let rooted = client("https://dav.example.com", "/registry/");
        assert_eq!(rooted.build_url("/docker"), "https://dav.example.com/registry/docker");
        assert_eq!(rooted.url_path("/docker/"), "/registry/docker/");
    }

    #[test]
    fn test_auth_header_only_with_username() {
        let anonymous = client("http://h", "/");
        assert!(anonymous.auth_header().is_none());

        let config = WebDavConfig::from_value(json!({
            "address": "http://h",
            "username": "user",
            "password": "pass",
        }))
        .unwrap();
        let authed = WebDavClient::new(&config).unwrap();
        assert_eq!(authed.auth_header().as_deref(), Some("Basic dXNlcjpwYXNz"));
    }

    #[test]
    fn test_parse_multistatus() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/files/dir/</d:href>
    <d:propstat><d:prop>
      <d:resourcetype><d:collection/></d:resourcetype>
    </d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>http://dav.example.com/files/dir/my%20blob</d:href>
    <d:propstat><d:prop>
      <d:resourcetype/>
      <d:getcontentlength>42</d:getcontentlength>
      <d:getlastmodified>Mon, 15 Jan 2024 10:00:00 GMT</d:getlastmodified>
    </d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

        let entries = parse_multistatus(xml).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].href, "/files/dir/");
        assert!(entries[0].is_dir);

        assert_eq!(entries[1].href, "/files/dir/my blob");
        assert!(!entries[1].is_dir);
        assert_eq!(entries[1].size, 42);
        let modified = entries[1].modified.unwrap();
        assert_eq!(modified.to_rfc3339(), "2024-01-15T10:00:00+00:00");

        let remote = entries[1].clone().into_remote("my blob");
        assert_eq!(remote.name, "my blob");
        assert_eq!(remote.size, 42);
    }

    #[test]
    fn test_collection_size_is_dropped() {
        let entry = PropEntry {
            href: "/d/".into(),
            is_dir: true,
            size: 4096,
            modified: None,
        };
        assert_eq!(entry.into_remote("d").size, 0);
    }

    #[test]
    fn test_parse_rejects_broken_xml() {
        assert!(parse_multistatus("<d:multistatus><d:response></d:multistatus>").is_err());
    }

    #[test]
    fn test_range_header() {
        assert_eq!(range_header(0, 0), None);
        assert_eq!(range_header(7, 0).as_deref(), Some("bytes=7-"));
        assert_eq!(range_header(0, 10).as_deref(), Some("bytes=0-9"));
        assert_eq!(range_header(u64::MAX - 1, 10).as_deref(), Some(format!("bytes={}-", u64::MAX - 1).as_str()));
    }

    fn head_end(data: &[u8]) -> Option<usize> {
        data.windows(4).position(|w| w == b"\r\n\r\n")
    }

    /// Request line and headers; the body is drained by Content-Length
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                return String::from_utf8_lossy(&data).into_owned();
            }
            data.extend_from_slice(&buf[..n]);
            if let Some(end) = head_end(&data) {
                let head = String::from_utf8_lossy(&data[..end]).into_owned();
                let body_len = head
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while data.len() < end + 4 + body_len {
                    let n = stream.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    data.extend_from_slice(&buf[..n]);
                }
                return head;
            }
        }
    }

    /// Answers one connection per canned response, returns the request heads
    async fn canned_server(responses: Vec<String>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut stream).await);
                stream.write_all(response.as_bytes()).await.unwrap();
                let _ = stream.shutdown().await;
            }
            requests
        });
        (address, handle)
    }

    fn reply(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    fn request_line(head: &str) -> &str {
        head.lines().next().unwrap_or("")
    }

    #[tokio::test]
    async fn test_read_dir_skips_own_collection() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/reg/dir/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/reg/dir/a%20b</d:href>
    <d:propstat><d:prop><d:resourcetype/><d:getcontentlength>3</d:getcontentlength></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/reg/dir/sub/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;
        let (address, server) = canned_server(vec![reply("207 Multi-Status", body)]).await;
        let c = client(&address, "/reg");

        let entries = c.read_dir("/dir").await.unwrap();
        let listed: Vec<(String, bool)> = entries.into_iter().map(|e| (e.name, e.is_dir)).collect();
        assert_eq!(listed, vec![("a b".to_string(), false), ("sub".to_string(), true)]);

        let requests = server.await.unwrap();
        assert_eq!(request_line(&requests[0]), "PROPFIND /reg/dir/ HTTP/1.1");
        assert!(requests[0].to_ascii_lowercase().contains("depth: 1"));
    }

    #[tokio::test]
    async fn test_range_not_satisfiable_reads_empty() {
        let (address, server) = canned_server(vec![reply("416 Range Not Satisfiable", "")]).await;
        let c = client(&address, "/");

        let mut out = Vec::new();
        c.read_stream_range("/f", 100, 0).await.unwrap().read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());

        let requests = server.await.unwrap();
        assert!(requests[0].to_ascii_lowercase().contains("range: bytes=100-"));
    }

    #[tokio::test]
    async fn test_ignored_range_skips_prefix_locally() {
        let (address, server) = canned_server(vec![reply("200 OK", "0123456789")]).await;
        let c = client(&address, "/");

        let mut out = Vec::new();
        c.read_stream_range("/f", 7, 0).await.unwrap().read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"789");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_content_is_passed_through() {
        let (address, server) = canned_server(vec![reply("206 Partial Content", "789")]).await;
        let c = client(&address, "/");

        let mut out = Vec::new();
        c.read_stream_range("/f", 7, 0).await.unwrap().read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"789");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let (address, server) = canned_server(vec![
            reply("404 Not Found", ""),
            reply("403 Forbidden", ""),
        ])
        .await;
        let c = client(&address, "/");

        c.remove("/gone").await.unwrap();
        let err = c.remove("/locked").await.unwrap_err();
        assert!(matches!(err, RemoteError::Status { status: StatusCode::FORBIDDEN, .. }));

        let requests = server.await.unwrap();
        assert_eq!(request_line(&requests[0]), "DELETE /gone HTTP/1.1");
    }

    #[tokio::test]
    async fn test_mkdir_all_creates_missing_ancestors() {
        let (address, server) = canned_server(vec![
            reply("409 Conflict", ""),
            reply("201 Created", ""),
            reply("201 Created", ""),
        ])
        .await;
        let c = client(&address, "/reg");

        c.mkdir_all("/a/b").await.unwrap();

        let requests = server.await.unwrap();
        let lines: Vec<&str> = requests.iter().map(|r| request_line(r)).collect();
        assert_eq!(
            lines,
            vec!["MKCOL /reg/a/b/ HTTP/1.1", "MKCOL /reg/a/ HTTP/1.1", "MKCOL /reg/a/b/ HTTP/1.1"]
        );
    }

    #[tokio::test]
    async fn test_mkdir_all_tolerates_existing_collection() {
        let (address, server) = canned_server(vec![reply("405 Method Not Allowed", "")]).await;
        let c = client(&address, "/");

        c.mkdir_all("/exists").await.unwrap();
        assert_eq!(server.await.unwrap().len(), 1);
    }
}
