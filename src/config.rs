//! Runtime configuration.
//!
//! Every knob loads from a `GANTRY_*` environment variable with a hand
//! default, and has a programmatic field for embedding applications.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `GANTRY_BIND` | `127.0.0.1:8080` | HTTP listener address |
//! | `GANTRY_SERVER_NAME` | `localhost` | `SERVER_NAME` copied per request |
//! | `GANTRY_BUFFER_SIZE` | `8192` | copy-buffer size for streamed bodies |
//! | `GANTRY_WORKERS` | `4` | target worker count |
//! | `GANTRY_SUPERVISE_INTERVAL` | `2` | supervision wake interval (seconds, minimum 1) |
//! | `GANTRY_QUEUE_PULL` | `127.0.0.1:9997` | inbound queue endpoint |
//! | `GANTRY_QUEUE_PUBLISH` | `127.0.0.1:9996` | outbound queue endpoint |

use std::collections::HashSet;
use std::env;

use crate::http::DEFAULT_BUFFER_SIZE;

const DEFAULT_METHODS: [&str; 8] = [
    "OPTIONS", "GET", "POST", "PUT", "DELETE", "HEAD", "TRACE", "CONNECT",
];

/// The allowed request-method tokens, compared after uppercasing.
#[derive(Debug, Clone)]
pub struct MethodSet {
    methods: HashSet<String>,
}

impl MethodSet {
    /// A custom set; tokens are normalized to uppercase.
    pub fn custom<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            methods: methods
                .into_iter()
                .map(|m| m.as_ref().to_ascii_uppercase())
                .collect(),
        }
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains(method)
    }

    pub fn insert(&mut self, method: &str) {
        self.methods.insert(method.to_ascii_uppercase());
    }
}

impl Default for MethodSet {
    fn default() -> Self {
        Self::custom(DEFAULT_METHODS)
    }
}

/// Configuration shared by both worker transports.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP worker binds (or that was bound pre-fork).
    pub bind_addr: String,
    /// `SERVER_NAME`, copied into every environment.
    pub server_name: String,
    /// `SERVER_PORT`, copied into every environment.
    pub server_port: u16,
    /// Allowed request methods.
    pub methods: MethodSet,
    /// Copy-buffer size for streamed response bodies.
    pub buffer_size: usize,
}

impl ServerConfig {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        let bind_addr = bind_addr.into();
        let server_port = port_of(&bind_addr).unwrap_or(80);
        Self {
            bind_addr,
            server_name: "localhost".to_string(),
            server_port,
            methods: MethodSet::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Load from `GANTRY_*` environment variables.
    pub fn from_env() -> Self {
        let bind_addr =
            env::var("GANTRY_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let mut config = Self::new(bind_addr);
        if let Ok(name) = env::var("GANTRY_SERVER_NAME") {
            config.server_name = name;
        }
        config.buffer_size = env::var("GANTRY_BUFFER_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BUFFER_SIZE);
        config
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("127.0.0.1:8080")
    }
}

fn port_of(addr: &str) -> Option<u16> {
    addr.rsplit(':').next().and_then(|p| p.parse().ok())
}

/// Queue transport endpoints on the upstream proxy.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Inbound (pull) endpoint.
    pub pull_addr: String,
    /// Outbound (publish) endpoint.
    pub publish_addr: String,
}

impl QueueConfig {
    pub fn new(pull_addr: impl Into<String>, publish_addr: impl Into<String>) -> Self {
        Self {
            pull_addr: pull_addr.into(),
            publish_addr: publish_addr.into(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            env::var("GANTRY_QUEUE_PULL").unwrap_or_else(|_| "127.0.0.1:9997".to_string()),
            env::var("GANTRY_QUEUE_PUBLISH").unwrap_or_else(|_| "127.0.0.1:9996".to_string()),
        )
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new("127.0.0.1:9997", "127.0.0.1:9996")
    }
}

/// Prefork supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Target worker count.
    pub workers: usize,
    /// Supervision wake interval in seconds. Values below 1 are treated
    /// as 1.
    pub interval: u64,
}

impl SupervisorConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            interval: 2,
        }
    }

    pub fn from_env() -> Self {
        let workers = env::var("GANTRY_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4);
        let interval = env::var("GANTRY_SUPERVISE_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);
        Self { workers, interval }
    }

    /// The wake interval with the minimum applied.
    pub fn effective_interval(&self) -> u64 {
        self.interval.max(1)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_method_set() {
        let methods = MethodSet::default();
        for m in DEFAULT_METHODS {
            assert!(methods.contains(m));
        }
        assert!(!methods.contains("PATCH"));
    }

    #[test]
    fn test_custom_methods_are_uppercased() {
        let methods = MethodSet::custom(["get", "patch"]);
        assert!(methods.contains("GET"));
        assert!(methods.contains("PATCH"));
        assert!(!methods.contains("POST"));
    }

    #[test]
    fn test_server_port_derived_from_bind_addr() {
        let config = ServerConfig::new("0.0.0.0:9001");
        assert_eq!(config.server_port, 9001);
    }

    #[test]
    fn test_interval_minimum() {
        let mut config = SupervisorConfig::new(2);
        config.interval = 0;
        assert_eq!(config.effective_interval(), 1);
        config.interval = 5;
        assert_eq!(config.effective_interval(), 5);
    }
}
