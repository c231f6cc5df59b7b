//! The per-request environment.
//!
//! An environment is a string-keyed map describing one request. Values are
//! heterogeneous (string, integer, byte buffer, decoded form data, or the
//! request body stream), so they are modeled as a small tagged union rather
//! than a stringly-typed map.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;

/// Well-known environment keys.
pub mod keys {
    pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
    pub const REQUEST_URI: &str = "REQUEST_URI";
    pub const PATH_INFO: &str = "PATH_INFO";
    pub const QUERY_STRING: &str = "QUERY_STRING";
    pub const SCRIPT_NAME: &str = "SCRIPT_NAME";
    pub const SERVER_NAME: &str = "SERVER_NAME";
    pub const SERVER_PORT: &str = "SERVER_PORT";
    pub const REMOTE_ADDR: &str = "REMOTE_ADDR";
    pub const REMOTE_PORT: &str = "REMOTE_PORT";
    pub const HTTP_VERSION: &str = "HTTP_VERSION";
    pub const HTTP_HOST: &str = "HTTP_HOST";
    pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";
    pub const CONTENT_TYPE: &str = "CONTENT_TYPE";

    /// Adapter self-description and decoded request data.
    pub const ADAPTER_VERSION: &str = "adapter.version";
    pub const ADAPTER_NAME: &str = "adapter.name";
    pub const ADAPTER_URL_SCHEME: &str = "adapter.url_scheme";
    pub const ADAPTER_GET: &str = "adapter.get";
    pub const ADAPTER_POST: &str = "adapter.post";
    pub const ADAPTER_INPUT: &str = "adapter.input";
}

/// The request body: an opaque, read-once stream positioned at the first
/// body byte.
pub type InputStream = Box<dyn Read + Send>;

/// A decoded `k=v&k=v` mapping. Repeated keys keep every value, in the
/// order they appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormMap {
    entries: Vec<(String, Vec<String>)>,
}

impl FormMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Percent-decode a raw `k=v&k=v` string.
    pub fn decode(raw: &str) -> Self {
        let mut map = Self::new();
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            map.push(key.into_owned(), value.into_owned());
        }
        map
    }

    /// Append a value, grouping under an existing key when one matches.
    pub fn push(&mut self, key: String, value: String) {
        if let Some((_, values)) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            values.push(value);
        } else {
            self.entries.push((key, vec![value]));
        }
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, values)| values.first().map(String::as_str))
    }

    /// Every value recorded for `key`, in arrival order.
    pub fn get_all(&self, key: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, values)| values.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One environment value.
pub enum Value {
    Str(String),
    Int(i64),
    Bytes(Vec<u8>),
    Form(FormMap),
    Stream(InputStream),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::Int(n) => f.debug_tuple("Int").field(n).finish(),
            Value::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Value::Form(m) => f.debug_tuple("Form").field(m).finish(),
            Value::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<FormMap> for Value {
    fn from(v: FormMap) -> Self {
        Value::Form(v)
    }
}

impl From<InputStream> for Value {
    fn from(v: InputStream) -> Self {
        Value::Stream(v)
    }
}

/// The canonical key/value description of one request.
///
/// Created per request by a worker, routed through the pipeline, and
/// discarded after the response is written.
#[derive(Debug, Default)]
pub struct Environment {
    map: HashMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.map.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.map.get(key) {
            Some(Value::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.map.get(key) {
            Some(Value::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn get_form(&self, key: &str) -> Option<&FormMap> {
        match self.map.get(key) {
            Some(Value::Form(m)) => Some(m),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.map.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Install the request body stream under `adapter.input`.
    pub fn set_input(&mut self, stream: InputStream) {
        self.map.insert(keys::ADAPTER_INPUT.to_string(), Value::Stream(stream));
    }

    /// Take ownership of the body stream. The stream is read-once; callers
    /// that need to re-read must buffer it themselves.
    pub fn take_input(&mut self) -> Option<InputStream> {
        match self.map.remove(keys::ADAPTER_INPUT) {
            Some(Value::Stream(stream)) => Some(stream),
            Some(other) => {
                self.map.insert(keys::ADAPTER_INPUT.to_string(), other);
                None
            }
            None => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
