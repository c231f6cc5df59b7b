//! Hand-written HTTP/1.1 request-head parser.
//!
//! The head is the request line plus header block, terminated by
//! `\r\n\r\n` and capped at [`MAX_HEAD_BYTES`]. Parsing yields the
//! parse-derived environment keys or a [`ParseError`] carrying the status
//! code the worker answers with.

use std::io::Read;

use crate::config::MethodSet;
use crate::environment::{keys, Environment};
use crate::error::ParseError;

/// Hard cap on the request line + header block, terminator included.
pub const MAX_HEAD_BYTES: usize = 4128;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Outcome of pulling a request head off a connection.
#[derive(Debug)]
pub enum HeadRead {
    /// Terminator seen. `leftover` holds body bytes already pulled off the
    /// stream past the terminator.
    Complete { head: Vec<u8>, leftover: Vec<u8> },
    /// Peer closed without sending anything.
    Closed,
    /// Peer closed mid-head, before the terminator (answered with 400).
    Truncated,
    /// The cap was reached without a terminator (answered with 414).
    Overflow,
}

/// Read from `stream` until the head terminator, end of stream, or the
/// byte cap. Short reads are retried; only a head that actually carried
/// the terminator is `Complete`.
pub fn read_head<R: Read>(stream: &mut R) -> std::io::Result<HeadRead> {
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(pos) = find_terminator(&buf) {
            let leftover = buf.split_off(pos + HEAD_TERMINATOR.len());
            buf.truncate(pos);
            return Ok(HeadRead::Complete { head: buf, leftover });
        }
        if buf.len() >= MAX_HEAD_BYTES {
            return Ok(HeadRead::Overflow);
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(HeadRead::Closed);
            }
            return Ok(HeadRead::Truncated);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
}

/// Parse a request head (terminator excluded) into the parse-derived
/// environment keys: `REQUEST_METHOD`, `REQUEST_URI`, `PATH_INFO`,
/// `QUERY_STRING`, `HTTP_VERSION`, and one `HTTP_*` entry per header.
pub fn parse_head(head: &[u8], allowed_methods: &MethodSet) -> Result<Environment, ParseError> {
    if head.len() >= MAX_HEAD_BYTES {
        return Err(ParseError::HeadTooLarge);
    }
    let text = std::str::from_utf8(head).map_err(|_| ParseError::MalformedHead)?;

    let (request_line, header_block) =
        text.split_once("\r\n").ok_or(ParseError::MalformedHead)?;

    let tokens: Vec<&str> = request_line.split(' ').collect();
    if tokens.len() != 3 {
        return Err(ParseError::MalformedRequestLine);
    }
    let method = tokens[0].to_ascii_uppercase();
    if !allowed_methods.contains(&method) {
        return Err(ParseError::UnknownMethod);
    }
    let uri = tokens[1];
    let protocol = tokens[2].to_ascii_uppercase();
    if protocol != "HTTP/1.1" {
        return Err(ParseError::UnsupportedVersion);
    }

    let headers = parse_header_block(header_block)?;
    if !headers.iter().any(|(name, _)| name == keys::HTTP_HOST) {
        return Err(ParseError::MissingHost);
    }

    let (path, query) = match uri.split_once('?') {
        Some((path, query)) => (path, query),
        None => (uri, ""),
    };

    let mut env = Environment::new();
    env.insert(keys::REQUEST_METHOD, method);
    env.insert(keys::REQUEST_URI, uri);
    env.insert(keys::PATH_INFO, path);
    env.insert(keys::QUERY_STRING, query);
    env.insert(keys::HTTP_VERSION, "HTTP/1.1");
    for (name, value) in headers {
        env.insert(name, value);
    }
    Ok(env)
}

/// Split header lines on the first colon and mangle names into `HTTP_*`
/// form. Continuation lines (leading space or tab) append to the previous
/// value; a continuation with no previous header goes to a placeholder that
/// is dropped.
fn parse_header_block(block: &str) -> Result<Vec<(String, String)>, ParseError> {
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut orphan = String::new();
    for line in block.split("\r\n") {
        if line.starts_with(' ') || line.starts_with('\t') {
            let continued = line.trim_start_matches([' ', '\t']);
            match headers.last_mut() {
                Some((_, value)) => value.push_str(continued),
                None => orphan.push_str(continued),
            }
            continue;
        }
        let (name, value) = line.split_once(':').ok_or(ParseError::MalformedHeader)?;
        headers.push((mangle_header_name(name), trim_value(value).to_string()));
    }
    Ok(headers)
}

fn mangle_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 5);
    out.push_str("HTTP_");
    for c in name.chars() {
        out.push(match c {
            '-' => '_',
            c => c.to_ascii_uppercase(),
        });
    }
    out
}

fn trim_value(value: &str) -> &str {
    value.trim_start_matches([' ', '\t'])
}
