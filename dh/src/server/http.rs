//! Minimal HTTP/1.x request reading

use std::net::SocketAddr;

use eyre::{Context, Result, eyre};
use indexmap::IndexMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::debug;

use crate::engine::RequestContext;

/// Longest request or header line accepted
const MAX_LINE: usize = 8 * 1024;

const MAX_HEADERS: usize = 100;

const MAX_BODY: usize = 1024 * 1024;

/// One parsed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: IndexMap<String, String>,
    pub body: String,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Request context for the engine
    pub fn into_context(self, client: Option<SocketAddr>) -> RequestContext {
        let mut context = RequestContext::from_uri(&self.target);
        if context.netloc.is_empty() {
            if let Some(host) = self.header("Host") {
                context.netloc = host.to_string();
            }
        }
        if context.scheme.is_empty() {
            context.scheme = "http".to_string();
        }
        context.headers = self.headers;
        context.method = Some(self.method);
        if !self.body.is_empty() {
            context.body = Some(self.body);
        }
        context.client = client.map(|addr| addr.to_string());
        context
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String> {
    let mut line = String::new();
    let bytes_read = reader
        .read_line(&mut line)
        .await
        .context("Failed to read request line")?;
    if bytes_read > MAX_LINE {
        return Err(eyre!("Line too long: {} bytes", bytes_read));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Read the request line, headers, and a `Content-Length` body
pub async fn read_request<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<HttpRequest> {
    let request_line = read_line(reader).await?;
    if request_line.is_empty() {
        return Err(eyre!("Empty request"));
    }
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), version) = (parts.next(), parts.next(), parts.next()) else {
        return Err(eyre!("Malformed request line: {}", request_line));
    };
    let version = version.unwrap_or("HTTP/1.0").to_string();
    if !version.starts_with("HTTP/1.") {
        return Err(eyre!("Unsupported protocol: {}", version));
    }

    let mut headers = IndexMap::new();
    loop {
        let line = read_line(reader).await?;
        if line.is_empty() {
            break;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(eyre!("Too many headers"));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| eyre!("Malformed header: {}", line))?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }

    let mut request = HttpRequest {
        method: method.to_string(),
        target: target.to_string(),
        version,
        headers,
        body: String::new(),
    };

    if let Some(length) = request.header("Content-Length") {
        let length: usize = length.parse().context("Invalid Content-Length")?;
        if length > MAX_BODY {
            return Err(eyre!("Body too large: {} bytes", length));
        }
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await.context("Failed to read request body")?;
        request.body = String::from_utf8_lossy(&body).into_owned();
    }

    debug!(method = %request.method, target = %request.target, "read_request: parsed request");
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_get_request() {
        let raw = b"GET /page/sub?a=1&a=2 HTTP/1.1\r\nHost: example.org\r\nAccept: text/html\r\n\r\n";
        let mut reader = BufReader::new(&raw[..]);
        let request = read_request(&mut reader).await.unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.target, "/page/sub?a=1&a=2");
        assert_eq!(request.header("host"), Some("example.org"));

        let context = request.into_context(Some("127.0.0.1:5000".parse().unwrap()));
        assert_eq!(context.path, "/page/sub");
        assert_eq!(context.netloc, "example.org");
        assert_eq!(context.scheme, "http");
        assert_eq!(context.arguments["a"], vec!["1", "2"]);
        assert_eq!(context.client.as_deref(), Some("127.0.0.1:5000"));
        assert_eq!(context.method.as_deref(), Some("GET"));
    }

    #[tokio::test]
    async fn test_read_post_body() {
        let raw = b"POST /form HTTP/1.0\r\nContent-Length: 7\r\n\r\nname=hi";
        let mut reader = BufReader::new(&raw[..]);
        let request = read_request(&mut reader).await.unwrap();
        assert_eq!(request.body, "name=hi");
        let context = request.into_context(None);
        assert_eq!(context.body.as_deref(), Some("name=hi"));
    }

    #[tokio::test]
    async fn test_rejects_malformed_requests() {
        let cases: [&[u8]; 4] = [b"", b"GET\r\n\r\n", b"GET / SPDY/3\r\n\r\n", b"GET / HTTP/1.0\r\nbroken\r\n\r\n"];
        for raw in cases {
            let mut reader = BufReader::new(raw);
            assert!(read_request(&mut reader).await.is_err());
        }
    }
}
