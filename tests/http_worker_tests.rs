use std::io::{Cursor, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use gantry::environment::keys;
use gantry::{
    handler_fn, Body, Environment, Handler, HttpWorker, PipelineBuilder, Response, Result,
    ServerConfig,
};

mod common;

struct RunningWorker {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<Result<()>>,
}

impl RunningWorker {
    /// Raise the drain flag and poke the accept loop with one connection.
    fn stop(self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Ok(mut poke) = TcpStream::connect(self.addr) {
            let _ = poke.write_all(b"GET / HTTP/1.1\r\nHost: poke\r\n\r\n");
            let mut sink = Vec::new();
            let _ = poke.read_to_end(&mut sink);
        }
        self.handle.join().expect("worker thread panicked")
    }
}

fn spawn_worker(config: ServerConfig, endpoint: Arc<dyn Handler>) -> RunningWorker {
    common::init_tracing();
    let worker = HttpWorker::bind(config).unwrap();
    let addr = worker.local_addr().unwrap();
    let shutdown = worker.shutdown_flag();
    let handle = std::thread::spawn(move || {
        worker.run(move || {
            let mut app = PipelineBuilder::new();
            app.set_endpoint(endpoint);
            app
        })
    });
    common::wait_ready(addr);
    RunningWorker {
        addr,
        shutdown,
        handle,
    }
}

fn roundtrip(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(request).unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

fn echo_endpoint() -> Arc<dyn Handler> {
    Arc::new(handler_fn(|env: &mut Environment| {
        let body = format!(
            "{} {} name={} adapter={}",
            env.get_str(keys::REQUEST_METHOD).unwrap_or(""),
            env.get_str(keys::PATH_INFO).unwrap_or(""),
            env.get_str(keys::SERVER_NAME).unwrap_or(""),
            env.get_str(keys::ADAPTER_NAME).unwrap_or(""),
        );
        Response::text(200, body)
    }))
}

#[test]
fn test_serves_one_request_then_closes() {
    let worker = spawn_worker(ServerConfig::new("127.0.0.1:0"), echo_endpoint());
    let reply = roundtrip(
        worker.addr,
        b"GET /hello?x=1 HTTP/1.1\r\nHost: test\r\n\r\n",
    );
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"), "reply: {reply}");
    assert!(reply.contains("Content-Length:"));
    // read_to_end returning at all proves the connection was closed
    assert!(reply.ends_with("GET /hello name=localhost adapter=gantry"));
    worker.stop().unwrap();
}

#[test]
fn test_unsupported_version_gets_505() {
    let worker = spawn_worker(ServerConfig::new("127.0.0.1:0"), echo_endpoint());
    let reply = roundtrip(worker.addr, b"GET / HTTP/1.0\r\nHost: x\r\n\r\n");
    assert!(
        reply.starts_with("HTTP/1.1 505 HTTP Version Not Supported\r\n"),
        "reply: {reply}"
    );
    assert!(reply.contains("Connection: close\r\n"));
    assert!(reply.ends_with("HTTP Version Not Supported"));
    worker.stop().unwrap();
}

#[test]
fn test_missing_host_gets_400() {
    let worker = spawn_worker(ServerConfig::new("127.0.0.1:0"), echo_endpoint());
    let reply = roundtrip(worker.addr, b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n");
    assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"), "reply: {reply}");
    worker.stop().unwrap();
}

#[test]
fn test_truncated_head_gets_400() {
    let worker = spawn_worker(ServerConfig::new("127.0.0.1:0"), echo_endpoint());
    let mut stream = TcpStream::connect(worker.addr).unwrap();
    stream.write_all(b"GET /admin HTTP/1.1\r\nHost: x").unwrap();
    stream.shutdown(Shutdown::Write).unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    let reply = String::from_utf8_lossy(&out);
    assert!(
        reply.starts_with("HTTP/1.1 400 Bad Request\r\n"),
        "reply: {reply}"
    );
    worker.stop().unwrap();
}

#[test]
fn test_oversize_head_gets_414() {
    let worker = spawn_worker(ServerConfig::new("127.0.0.1:0"), echo_endpoint());
    let reply = roundtrip(worker.addr, &vec![b'a'; 4200]);
    assert!(
        reply.starts_with("HTTP/1.1 414 Request-URI Too Long\r\n"),
        "reply: {reply}"
    );
    worker.stop().unwrap();
}

#[test]
fn test_urlencoded_body_reaches_adapter_post() {
    let endpoint: Arc<dyn Handler> = Arc::new(handler_fn(|env: &mut Environment| {
        let form = env.get_form(keys::ADAPTER_GET);
        let q = form.and_then(|f| f.get("q")).unwrap_or("-");
        let posted = env
            .get_form(keys::ADAPTER_POST)
            .and_then(|f| f.get("greeting"))
            .unwrap_or("-");
        Response::text(200, format!("q={q} greeting={posted}"))
    }));
    let worker = spawn_worker(ServerConfig::new("127.0.0.1:0"), endpoint);
    let body = "greeting=hello%20there";
    let request = format!(
        "POST /submit?q=1 HTTP/1.1\r\nHost: t\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let reply = roundtrip(worker.addr, request.as_bytes());
    assert!(reply.ends_with("q=1 greeting=hello there"), "reply: {reply}");
    worker.stop().unwrap();
}

#[test]
fn test_streamed_body_is_chunked() {
    let endpoint: Arc<dyn Handler> = Arc::new(handler_fn(|_env: &mut Environment| {
        let stream: Box<dyn Read + Send> = Box::new(Cursor::new(b"abcde".to_vec()));
        Ok(Response::new(200)?.with_body(Body::Stream(stream)))
    }));
    let mut config = ServerConfig::new("127.0.0.1:0");
    config.buffer_size = 3;
    let worker = spawn_worker(config, endpoint);
    let reply = roundtrip(worker.addr, b"GET / HTTP/1.1\r\nHost: t\r\n\r\n");
    assert!(reply.contains("Transfer-Encoding: chunked\r\n"));
    assert!(!reply.contains("Content-Length"));
    assert!(
        reply.ends_with("\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n"),
        "reply: {reply}"
    );
    worker.stop().unwrap();
}

#[test]
fn test_shutdown_flag_drains_worker() {
    let worker = spawn_worker(ServerConfig::new("127.0.0.1:0"), echo_endpoint());
    let reply = roundtrip(worker.addr, b"GET /one HTTP/1.1\r\nHost: t\r\n\r\n");
    assert!(reply.starts_with("HTTP/1.1 200"));
    assert!(worker.stop().is_ok());
}
