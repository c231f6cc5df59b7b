//! HTTP/1.1 wire level: request-head parsing and response serialization.

pub mod parser;
pub mod response;

pub use parser::{parse_head, read_head, HeadRead, MAX_HEAD_BYTES};
pub use response::{error_response, write_response, Body, Response, DEFAULT_BUFFER_SIZE};
