//! The response triple and its HTTP/1.1 serialization.

use std::fmt;
use std::io::{self, Read, Write};

use crate::error::{Error, Result};
use crate::status::reason_phrase;

/// Default copy-buffer size for streamed bodies.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// A response body: a finite byte buffer or a read-once stream.
pub enum Body {
    Buffer(Vec<u8>),
    Stream(Box<dyn Read + Send>),
}

impl Body {
    pub fn empty() -> Self {
        Body::Buffer(Vec::new())
    }

    /// The buffered bytes, when this body is a buffer.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Buffer(buf) => Some(buf),
            Body::Stream(_) => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Buffer(buf) => f.debug_tuple("Buffer").field(&buf.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Body::Buffer(v)
    }
}

impl From<String> for Body {
    fn from(v: String) -> Self {
        Body::Buffer(v.into_bytes())
    }
}

impl From<&str> for Body {
    fn from(v: &str) -> Self {
        Body::Buffer(v.as_bytes().to_vec())
    }
}

impl From<Box<dyn Read + Send>> for Body {
    fn from(v: Box<dyn Read + Send>) -> Self {
        Body::Stream(v)
    }
}

/// One response: status code, ordered headers, body.
///
/// Header order is insertion order and names keep their case; both survive
/// into the serialized bytes.
#[derive(Debug)]
pub struct Response {
    pub(crate) status: u16,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Body,
}

impl Response {
    /// An empty-bodied response. Fails with `InvalidArgument` for codes
    /// outside `[100, 599]`.
    pub fn new(status: u16) -> Result<Self> {
        if !(100..=599).contains(&status) {
            return Err(Error::InvalidArgument(format!(
                "status code {status} outside [100, 599]"
            )));
        }
        Ok(Self {
            status,
            headers: Vec::new(),
            body: Body::empty(),
        })
    }

    /// A plain-text response.
    pub fn text(status: u16, body: impl Into<String>) -> Result<Self> {
        let mut response = Self::new(status)?;
        response.set_header("Content-Type", "text/plain");
        response.body = Body::from(body.into());
        Ok(response)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Append a header, preserving insertion order.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Builder-style variant of [`set_header`](Self::set_header).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// First value of a header, name compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    pub fn set_body(&mut self, body: impl Into<Body>) -> &mut Self {
        self.body = body.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// The buffered body bytes, when the body is a buffer.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_bytes()
    }
}

/// Short plain-text response for protocol-level failures: the reason phrase
/// as the body, and the connection closed after the write.
pub fn error_response(status: u16) -> Response {
    Response {
        status,
        headers: vec![("Connection".to_string(), "close".to_string())],
        body: Body::from(reason_phrase(status)),
    }
}

/// Serialize a response to `sink`.
///
/// A non-empty buffered body with neither `Content-Length` nor
/// `Transfer-Encoding` set gets a `Content-Length`; a streamed body under
/// the same condition gets `Transfer-Encoding: chunked`. Chunked bodies are
/// emitted one chunk per `buffer_size` read and terminated with
/// `0\r\n\r\n`; the body stream is consumed and dropped.
pub fn write_response<W: Write>(
    response: Response,
    sink: &mut W,
    buffer_size: usize,
) -> io::Result<()> {
    let Response {
        status,
        mut headers,
        body,
    } = response;
    let unframed = !has_header(&headers, "Content-Length")
        && !has_header(&headers, "Transfer-Encoding");
    match body {
        Body::Buffer(buf) => {
            if unframed && !buf.is_empty() {
                headers.push(("Content-Length".to_string(), buf.len().to_string()));
            }
            sink.write_all(&render_head(status, &headers))?;
            sink.write_all(&buf)?;
        }
        Body::Stream(mut reader) => {
            if unframed {
                headers.push(("Transfer-Encoding".to_string(), "chunked".to_string()));
                sink.write_all(&render_head(status, &headers))?;
                write_chunked(&mut reader, sink, buffer_size)?;
            } else {
                // caller framed the body itself; plain copy
                sink.write_all(&render_head(status, &headers))?;
                copy_stream(&mut reader, sink, buffer_size)?;
            }
        }
    }
    sink.flush()
}

/// Status line plus headers plus the blank separator line.
pub(crate) fn render_head(status: u16, headers: &[(String, String)]) -> Vec<u8> {
    let mut head = Vec::with_capacity(64 + headers.len() * 32);
    head.extend_from_slice(
        format!("HTTP/1.1 {} {}\r\n", status, reason_phrase(status)).as_bytes(),
    );
    for (name, value) in headers {
        head.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    head.extend_from_slice(b"\r\n");
    head
}

/// One `<hex-length>\r\n<bytes>\r\n` frame per read, `0\r\n\r\n` at end of
/// stream.
fn write_chunked<R: Read, W: Write>(
    reader: &mut R,
    sink: &mut W,
    buffer_size: usize,
) -> io::Result<()> {
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        write!(sink, "{n:X}\r\n")?;
        sink.write_all(&buf[..n])?;
        sink.write_all(b"\r\n")?;
    }
    sink.write_all(b"0\r\n\r\n")
}

fn copy_stream<R: Read, W: Write>(
    reader: &mut R,
    sink: &mut W,
    buffer_size: usize,
) -> io::Result<()> {
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        sink.write_all(&buf[..n])?;
    }
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
}
