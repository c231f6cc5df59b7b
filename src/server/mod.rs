//! Transport workers and the prefork supervisor.
//!
//! A worker owns one transport, decodes each request into an
//! [`Environment`](crate::environment::Environment), runs the pipeline, and
//! writes the response back. Request handling inside a worker is strictly
//! sequential; parallelism comes from the supervisor forking N workers over
//! shared pre-fork resources.

pub mod frame;
#[cfg(unix)]
pub mod heartbeat;
pub mod http_worker;
pub mod queue_worker;
#[cfg(unix)]
pub mod signals;
#[cfg(unix)]
pub mod supervisor;

pub use http_worker::HttpWorker;
pub use queue_worker::QueueWorker;
#[cfg(unix)]
pub use supervisor::{Supervisor, Transport};

use std::io::Read;

use crate::config::ServerConfig;
use crate::environment::{keys, Environment, FormMap, Value};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Worker identity and per-request configuration copies.
pub(crate) fn stamp_adapter(env: &mut Environment, config: &ServerConfig) {
    env.insert(keys::SERVER_NAME, config.server_name.clone());
    env.insert(keys::SERVER_PORT, i64::from(config.server_port));
    env.insert(keys::ADAPTER_VERSION, env!("CARGO_PKG_VERSION"));
    env.insert(keys::ADAPTER_NAME, "gantry");
    env.insert(keys::ADAPTER_URL_SCHEME, "http");
}

/// Post-parse normalization, shared by both transports.
///
/// Moves `HTTP_CONTENT_LENGTH` / `HTTP_CONTENT_TYPE` to their unprefixed
/// keys, decodes the query string into `adapter.get`, and decodes a
/// urlencoded body into `adapter.post` (consuming up to `CONTENT_LENGTH`
/// bytes of the input stream, which stays installed for the application).
pub(crate) fn normalize_environment(env: &mut Environment) {
    if let Some(value) = env.remove("HTTP_CONTENT_LENGTH") {
        let length = match value {
            Value::Str(s) => s.trim().parse::<i64>().unwrap_or(0),
            Value::Int(n) => n,
            _ => 0,
        };
        env.insert(keys::CONTENT_LENGTH, length);
    }
    if let Some(Value::Str(content_type)) = env.remove("HTTP_CONTENT_TYPE") {
        env.insert(keys::CONTENT_TYPE, content_type);
    }

    let query = env.get_str(keys::QUERY_STRING).unwrap_or("").to_string();
    if !query.is_empty() {
        env.insert(keys::ADAPTER_GET, FormMap::decode(&query));
    }

    let is_form = env
        .get_str(keys::CONTENT_TYPE)
        .map(|t| {
            let bytes = t.as_bytes();
            bytes.len() >= FORM_CONTENT_TYPE.len()
                && bytes[..FORM_CONTENT_TYPE.len()].eq_ignore_ascii_case(FORM_CONTENT_TYPE.as_bytes())
        })
        .unwrap_or(false);
    if is_form {
        let length = env.get_int(keys::CONTENT_LENGTH).unwrap_or(0);
        if length > 0 {
            if let Some(input) = env.take_input() {
                let mut body = Vec::with_capacity(length.min(1 << 20) as usize);
                let mut limited = input.take(length as u64);
                let read_ok = limited.read_to_end(&mut body).is_ok();
                env.set_input(limited.into_inner());
                if read_ok {
                    let raw = String::from_utf8_lossy(&body);
                    env.insert(keys::ADAPTER_POST, FormMap::decode(&raw));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_content_headers_move_to_unprefixed_keys() {
        let mut env = Environment::new();
        env.insert("HTTP_CONTENT_LENGTH", "11");
        env.insert("HTTP_CONTENT_TYPE", "text/plain");
        normalize_environment(&mut env);
        assert!(!env.contains_key("HTTP_CONTENT_LENGTH"));
        assert!(!env.contains_key("HTTP_CONTENT_TYPE"));
        assert_eq!(env.get_int(keys::CONTENT_LENGTH), Some(11));
        assert_eq!(env.get_str(keys::CONTENT_TYPE), Some("text/plain"));
    }

    #[test]
    fn test_query_string_decodes_into_adapter_get() {
        let mut env = Environment::new();
        env.insert(keys::QUERY_STRING, "a=1&a=2&b=x%20y");
        normalize_environment(&mut env);
        let form = env.get_form(keys::ADAPTER_GET).unwrap();
        assert_eq!(form.get_all("a").unwrap(), &["1".to_string(), "2".to_string()]);
        assert_eq!(form.get("b"), Some("x y"));
    }

    #[test]
    fn test_empty_query_string_sets_no_adapter_get() {
        let mut env = Environment::new();
        env.insert(keys::QUERY_STRING, "");
        normalize_environment(&mut env);
        assert!(env.get_form(keys::ADAPTER_GET).is_none());
    }

    #[test]
    fn test_urlencoded_body_decodes_into_adapter_post() {
        let mut env = Environment::new();
        env.insert("HTTP_CONTENT_TYPE", "application/x-www-form-urlencoded; charset=utf-8");
        env.insert("HTTP_CONTENT_LENGTH", "7");
        env.set_input(Box::new(Cursor::new(b"k=v&x=1trailing".to_vec())));
        normalize_environment(&mut env);
        let form = env.get_form(keys::ADAPTER_POST).unwrap();
        assert_eq!(form.get("k"), Some("v"));
        assert_eq!(form.get("x"), Some("1"));
        // the stream stays installed, positioned past the consumed bytes
        let mut rest = String::new();
        env.take_input().unwrap().read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "trailing");
    }

    #[test]
    fn test_non_form_body_is_left_alone() {
        let mut env = Environment::new();
        env.insert("HTTP_CONTENT_TYPE", "application/json");
        env.insert("HTTP_CONTENT_LENGTH", "2");
        env.set_input(Box::new(Cursor::new(b"{}".to_vec())));
        normalize_environment(&mut env);
        assert!(env.get_form(keys::ADAPTER_POST).is_none());
        let mut body = String::new();
        env.take_input().unwrap().read_to_string(&mut body).unwrap();
        assert_eq!(body, "{}");
    }
}
