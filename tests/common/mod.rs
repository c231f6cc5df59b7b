#![allow(dead_code)]

use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Poll until the worker accepts connections.
pub fn wait_ready(addr: SocketAddr) {
    for _ in 0..50 {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("server at {addr} not ready");
}
