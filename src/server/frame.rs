//! Wire framing for the queue adapter.
//!
//! Inbound request frames:
//!
//! ```text
//! <uuid> <conn_id> <path> <hlen>:<headers-json>,<blen>:<body>,
//! ```
//!
//! Outbound reply frames:
//!
//! ```text
//! <uuid> <conn_id_len>:<conn_id>, <payload>
//! ```
//!
//! Netstring separators are enforced strictly: a payload not followed by
//! its `,` aborts the frame.

use std::io::{self, BufRead, Read};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::FrameError;

/// One request pulled off the inbound queue.
#[derive(Debug)]
pub struct RequestFrame {
    /// Identity of the upstream proxy that sent the frame.
    pub sender: String,
    /// Proxy-side connection identifier, echoed in every reply.
    pub conn_id: String,
    /// Raw request path as the proxy saw it.
    pub path: String,
    pub headers: FrameHeaders,
    pub body: Vec<u8>,
}

/// The JSON header object carried by a request frame.
///
/// Recognized keys are lifted into fields; everything else lands in
/// `extra` and becomes an `HTTP_*` environment entry.
#[derive(Debug, Default, Deserialize)]
pub struct FrameHeaders {
    #[serde(rename = "METHOD")]
    pub method: Option<String>,
    #[serde(rename = "PATH")]
    pub path: Option<String>,
    #[serde(rename = "URI")]
    pub uri: Option<String>,
    #[serde(rename = "PATTERN")]
    pub pattern: Option<String>,
    #[serde(rename = "QUERY")]
    pub query: Option<String>,
    #[serde(rename = "x-forwarded-for")]
    pub forwarded_for: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Read one frame off the inbound stream.
///
/// Returns `Ok(None)` on a clean end of stream (upstream closed between
/// frames).
pub fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<RequestFrame>, FrameError> {
    let sender = match read_token(reader)? {
        Some(token) => token,
        None => return Ok(None),
    };
    let conn_id = read_token(reader)?.ok_or(FrameError::Truncated)?;
    let path = read_token(reader)?.ok_or(FrameError::Truncated)?;
    let header_bytes = read_netstring(reader)?;
    let body = read_netstring(reader)?;
    let headers: FrameHeaders = serde_json::from_slice(&header_bytes)?;
    Ok(Some(RequestFrame {
        sender,
        conn_id,
        path,
        headers,
        body,
    }))
}

/// Parse a complete frame held in memory.
pub fn parse_frame(buf: &[u8]) -> Result<RequestFrame, FrameError> {
    let mut cursor = io::Cursor::new(buf);
    read_frame(&mut cursor)?.ok_or(FrameError::Truncated)
}

/// Frame a payload for the outbound (publish) stream.
pub fn encode_reply(sender: &str, conn_id: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(sender.len() + conn_id.len() + payload.len() + 16);
    out.extend_from_slice(sender.as_bytes());
    out.push(b' ');
    out.extend_from_slice(conn_id.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(conn_id.as_bytes());
    out.extend_from_slice(b", ");
    out.extend_from_slice(payload);
    out
}

/// Space-terminated token. `Ok(None)` only on end of stream before the
/// first byte.
fn read_token<R: BufRead>(reader: &mut R) -> Result<Option<String>, FrameError> {
    let mut buf = Vec::new();
    let n = reader.read_until(b' ', &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b' ') {
        return Err(FrameError::Truncated);
    }
    buf.pop();
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| FrameError::BadToken)
}

/// `<len>:<payload>,` with the trailing comma enforced.
fn read_netstring<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, FrameError> {
    let mut length_buf = Vec::new();
    let n = reader.read_until(b':', &mut length_buf)?;
    if n == 0 || length_buf.last() != Some(&b':') {
        return Err(FrameError::Truncated);
    }
    length_buf.pop();
    let length: usize = std::str::from_utf8(&length_buf)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(FrameError::BadLength)?;
    let mut payload = vec![0u8; length];
    read_exact(reader, &mut payload)?;
    let mut separator = [0u8; 1];
    read_exact(reader, &mut separator)?;
    if separator[0] != b',' {
        return Err(FrameError::MissingSeparator(','));
    }
    Ok(payload)
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::Truncated
        } else {
            FrameError::Io(err)
        }
    })
}
