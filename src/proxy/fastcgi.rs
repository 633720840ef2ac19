//! Minimal FastCGI responder client: one request per connection, request
//! id 1, no multiplexing.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::{AppError, Result};

const VERSION_1: u8 = 1;
const HEADER_LEN: usize = 8;
const MAX_CONTENT_LEN: usize = 65_535;
const REQUEST_ID: u16 = 1;
const ROLE_RESPONDER: u16 = 1;

pub(crate) const BEGIN_REQUEST: u8 = 1;
pub(crate) const END_REQUEST: u8 = 3;
pub(crate) const PARAMS: u8 = 4;
pub(crate) const STDIN: u8 = 5;
pub(crate) const STDOUT: u8 = 6;
pub(crate) const STDERR: u8 = 7;

#[derive(Debug)]
pub struct FastCgiResponse {
    pub stdout: Bytes,
    pub stderr: Bytes,
    pub app_status: u32,
}

/// CGI output split into its header block and body.
#[derive(Debug)]
pub struct CgiOutput {
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

pub struct FastCgiClient {
    addr: String,
    timeout: Duration,
}

impl FastCgiClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends one request and reads records until END_REQUEST.
    pub async fn request(&self, params: &[(String, String)], stdin: &[u8]) -> Result<FastCgiResponse> {
        let exchange = async {
            let mut stream = TcpStream::connect(&self.addr).await.map_err(|e| {
                AppError::Proxy(format!("Could not connect to {}: {}", self.addr, e))
            })?;

            let request = encode_request(params, stdin);
            stream
                .write_all(&request)
                .await
                .map_err(|e| AppError::Proxy(format!("Failed fastcgi request: {}", e)))?;

            read_response(&mut stream).await
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| AppError::Proxy(format!("fastcgi request to {} timed out", self.addr)))?
    }
}

pub(crate) fn encode_request(params: &[(String, String)], stdin: &[u8]) -> BytesMut {
    let mut buf = BytesMut::new();

    let mut begin = BytesMut::with_capacity(8);
    begin.put_u16(ROLE_RESPONDER);
    begin.put_u8(0); // close the connection when done
    begin.put_bytes(0, 5);
    put_record(&mut buf, BEGIN_REQUEST, &begin);

    let mut encoded = BytesMut::new();
    for (name, value) in params {
        put_length(&mut encoded, name.len());
        put_length(&mut encoded, value.len());
        encoded.put_slice(name.as_bytes());
        encoded.put_slice(value.as_bytes());
    }
    put_stream(&mut buf, PARAMS, &encoded);
    put_stream(&mut buf, STDIN, stdin);

    buf
}

/// Writes `content` as a stream: data records followed by the empty record
/// that terminates it.
fn put_stream(buf: &mut BytesMut, kind: u8, content: &[u8]) {
    for chunk in content.chunks(MAX_CONTENT_LEN) {
        put_record(buf, kind, chunk);
    }
    put_record(buf, kind, &[]);
}

pub(crate) fn put_record(buf: &mut BytesMut, kind: u8, content: &[u8]) {
    let padding = (8 - content.len() % 8) % 8;
    buf.put_u8(VERSION_1);
    buf.put_u8(kind);
    buf.put_u16(REQUEST_ID);
    buf.put_u16(content.len() as u16);
    buf.put_u8(padding as u8);
    buf.put_u8(0);
    buf.put_slice(content);
    buf.put_bytes(0, padding);
}

fn put_length(buf: &mut BytesMut, len: usize) {
    if len < 128 {
        buf.put_u8(len as u8);
    } else {
        buf.put_u32(len as u32 | 0x8000_0000);
    }
}

pub(crate) fn read_length(buf: &mut Bytes) -> Option<usize> {
    let first = *buf.first()?;
    if first & 0x80 == 0 {
        buf.advance(1);
        Some(first as usize)
    } else if buf.len() >= 4 {
        Some((buf.get_u32() & 0x7fff_ffff) as usize)
    } else {
        None
    }
}

/// Reads one record, returning its type and content without padding.
pub(crate) async fn read_record<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<(u8, Bytes)> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let kind = header[1];
    let content_len = u16::from_be_bytes([header[4], header[5]]) as usize;
    let padding = header[6] as usize;

    let mut content = vec![0u8; content_len + padding];
    reader.read_exact(&mut content).await?;
    content.truncate(content_len);
    Ok((kind, Bytes::from(content)))
}

async fn read_response<R: AsyncRead + Unpin>(reader: &mut R) -> Result<FastCgiResponse> {
    let mut stdout = BytesMut::new();
    let mut stderr = BytesMut::new();

    loop {
        let (kind, mut content) = read_record(reader)
            .await
            .map_err(|e| AppError::Proxy(format!("Failed to read fastcgi response: {}", e)))?;

        match kind {
            STDOUT => stdout.extend_from_slice(&content),
            STDERR => stderr.extend_from_slice(&content),
            END_REQUEST => {
                let app_status = if content.len() >= 4 { content.get_u32() } else { 0 };
                return Ok(FastCgiResponse {
                    stdout: stdout.freeze(),
                    stderr: stderr.freeze(),
                    app_status,
                });
            }
            other => {
                tracing::debug!(record_type = other, "Ignoring unexpected fastcgi record");
            }
        }
    }
}

impl FastCgiResponse {
    /// Splits the CGI header block off STDOUT.
    pub fn parse_stdout(self) -> Result<CgiOutput> {
        let raw = self.stdout;
        let (head_len, sep_len) = find_header_end(&raw).ok_or_else(|| {
            AppError::Proxy("Failed to parse fastcgi response: no header terminator".to_string())
        })?;

        let head = std::str::from_utf8(&raw[..head_len]).map_err(|e| {
            AppError::Proxy(format!("Failed to parse fastcgi response headers: {}", e))
        })?;

        let mut status = None;
        let mut content_type = None;
        for line in head.lines() {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if name.eq_ignore_ascii_case("status") {
                status = value.split_whitespace().next().and_then(|c| c.parse().ok());
            } else if name.eq_ignore_ascii_case("content-type") {
                content_type = Some(value.to_string());
            }
        }

        Ok(CgiOutput {
            status,
            content_type,
            body: raw.slice(head_len + sep_len..),
        })
    }
}

fn find_header_end(raw: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, 4));
    }
    raw.windows(2).position(|w| w == b"\n\n").map(|pos| (pos, 2))
}
