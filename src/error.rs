//! Error taxonomy for the runtime.
//!
//! Configuration errors (`NoEndpoint`, `InvalidArgument`) are raised
//! synchronously at build time and are fatal to the caller. Transport errors
//! are fatal to the worker that hit them; the supervisor respawns it. Parse
//! failures carry the HTTP status answered on the wire and are recovered
//! locally by the worker.

use std::io;

use thiserror::Error;

/// Failures surfaced by the runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// A pipeline was invoked with no endpoint set.
    #[error("pipeline has no endpoint")]
    NoEndpoint,

    /// A constructor argument was outside its allowed range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Binding or connecting the worker transport failed.
    #[error("socket unavailable at {address}: {message} (errno {errno})")]
    SocketUnavailable {
        address: String,
        errno: i32,
        message: String,
    },

    /// Forking a worker child failed; fatal to the supervisor.
    #[error("fork failed: {0}")]
    Fork(String),

    /// A failure escaped the application pipeline. The worker closes the
    /// connection and exits; the supervisor respawns it.
    #[error(transparent)]
    Application(#[from] anyhow::Error),

    /// Transport-level I/O failure outside bind/connect.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn socket_unavailable(address: &str, err: &io::Error) -> Self {
        Error::SocketUnavailable {
            address: address.to_string(),
            errno: err.raw_os_error().unwrap_or(0),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Request-head parse failures, each mapped to the HTTP status the worker
/// answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The head reached the byte cap without a terminator.
    #[error("request head too large")]
    HeadTooLarge,

    /// The head cannot be split into a request line and header block.
    #[error("malformed request head")]
    MalformedHead,

    /// The request line does not have exactly three tokens.
    #[error("malformed request line")]
    MalformedRequestLine,

    /// Method token outside the allowed set.
    #[error("method not implemented")]
    UnknownMethod,

    /// Protocol token other than HTTP/1.1.
    #[error("unsupported protocol version")]
    UnsupportedVersion,

    /// A header line without a colon.
    #[error("malformed header line")]
    MalformedHeader,

    /// No Host header present.
    #[error("missing Host header")]
    MissingHost,
}

impl ParseError {
    /// The status code written back for this failure.
    pub fn status(self) -> u16 {
        match self {
            ParseError::HeadTooLarge => 414,
            ParseError::UnknownMethod => 501,
            ParseError::UnsupportedVersion => 505,
            ParseError::MalformedHead
            | ParseError::MalformedRequestLine
            | ParseError::MalformedHeader
            | ParseError::MissingHost => 400,
        }
    }
}

/// Queue-adapter frame violations.
///
/// Separators are enforced strictly: a payload not followed by its `,`
/// aborts the frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("queue stream ended mid-frame")]
    Truncated,

    #[error("frame token is not valid UTF-8")]
    BadToken,

    #[error("bad netstring length prefix")]
    BadLength,

    #[error("missing '{0}' frame separator")]
    MissingSeparator(char),

    #[error("frame headers are not a JSON object: {0}")]
    BadHeaders(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
