use std::io::{Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;

use gantry::environment::keys;
use gantry::{
    handler_fn, Body, Environment, Handler, PipelineBuilder, QueueConfig, QueueWorker, Response,
    Result, ServerConfig,
};

mod common;

/// A fake upstream proxy: the worker connects to these two listeners.
struct FakeProxy {
    pull_side: TcpStream,
    publish_side: TcpStream,
    handle: JoinHandle<Result<()>>,
}

fn spawn_worker(endpoint: Arc<dyn Handler>) -> FakeProxy {
    common::init_tracing();
    let pull_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let publish_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let queue = QueueConfig::new(
        pull_listener.local_addr().unwrap().to_string(),
        publish_listener.local_addr().unwrap().to_string(),
    );
    let worker = QueueWorker::connect(ServerConfig::default(), queue).unwrap();
    let handle = std::thread::spawn(move || {
        worker.run(move || {
            let mut app = PipelineBuilder::new();
            app.set_endpoint(endpoint);
            app
        })
    });
    let (pull_side, _) = pull_listener.accept().unwrap();
    let (publish_side, _) = publish_listener.accept().unwrap();
    FakeProxy {
        pull_side,
        publish_side,
        handle,
    }
}

fn request_frame(conn_id: &str, path: &str, headers: &str, body: &str) -> Vec<u8> {
    format!(
        "PROXY1 {} {} {}:{},{}:{},",
        conn_id,
        path,
        headers.len(),
        headers,
        body.len(),
        body
    )
    .into_bytes()
}

/// Send the given frames, close the pull side, and collect everything the
/// worker published.
fn exchange(mut proxy: FakeProxy, frames: &[Vec<u8>]) -> String {
    for frame in frames {
        proxy.pull_side.write_all(frame).unwrap();
    }
    drop(proxy.pull_side);
    let result = proxy.handle.join().expect("worker thread panicked");
    result.unwrap();
    let mut published = Vec::new();
    proxy.publish_side.read_to_end(&mut published).unwrap();
    String::from_utf8_lossy(&published).into_owned()
}

fn describe_endpoint() -> Arc<dyn Handler> {
    Arc::new(handler_fn(|env: &mut Environment| {
        let body = format!(
            "script={} path={} query={} host={}",
            env.get_str(keys::SCRIPT_NAME).unwrap_or(""),
            env.get_str(keys::PATH_INFO).unwrap_or(""),
            env.get_str(keys::QUERY_STRING).unwrap_or(""),
            env.get_str("HTTP_HOST").unwrap_or(""),
        );
        Response::text(200, body)
    }))
}

#[test]
fn test_frame_roundtrip_with_mounted_pattern() {
    let proxy = spawn_worker(describe_endpoint());
    let headers = r#"{"METHOD":"GET","PATH":"/app/users/7","PATTERN":"/app","URI":"/app/users/7?x=1","QUERY":"x=1","host":"example.com"}"#;
    let published = exchange(
        proxy,
        &[request_frame("42", "/app/users/7", headers, "")],
    );
    assert!(published.starts_with("PROXY1 2:42, HTTP/1.1 200 OK\r\n"), "published: {published}");
    assert!(published.ends_with("script=/app path=/users/7 query=x=1 host=example.com"));
}

#[test]
fn test_root_pattern_clears_script_name() {
    let proxy = spawn_worker(describe_endpoint());
    let headers = r#"{"METHOD":"GET","PATH":"/users","PATTERN":"/","QUERY":""}"#;
    let published = exchange(proxy, &[request_frame("9", "/users", headers, "")]);
    assert!(published.contains("script= path=/users"), "published: {published}");
}

#[test]
fn test_identity_and_control_messages_are_discarded() {
    let proxy = spawn_worker(describe_endpoint());
    let json_frame = request_frame("1", "/any", r#"{"METHOD":"JSON"}"#, "{}");
    let control_frame = request_frame("2", "@control", r#"{"METHOD":"GET"}"#, "");
    let real_headers = r#"{"METHOD":"GET","PATH":"/live","PATTERN":"/"}"#;
    let real_frame = request_frame("3", "/live", real_headers, "");
    let published = exchange(proxy, &[json_frame, control_frame, real_frame]);
    assert_eq!(published.matches("HTTP/1.1").count(), 1);
    assert!(published.starts_with("PROXY1 1:3, "), "published: {published}");
}

#[test]
fn test_body_reaches_adapter_input() {
    let endpoint: Arc<dyn Handler> = Arc::new(handler_fn(|env: &mut Environment| {
        let mut body = String::new();
        if let Some(mut input) = env.take_input() {
            input.read_to_string(&mut body).ok();
        }
        Response::text(200, format!("got:{body}"))
    }));
    let proxy = spawn_worker(endpoint);
    let headers = r#"{"METHOD":"POST","PATH":"/in","PATTERN":"/","content-length":"7"}"#;
    let published = exchange(proxy, &[request_frame("5", "/in", headers, "payload")]);
    assert!(published.ends_with("got:payload"), "published: {published}");
}

#[test]
fn test_streamed_reply_publishes_chunk_frames() {
    let endpoint: Arc<dyn Handler> = Arc::new(handler_fn(|_env: &mut Environment| {
        let stream: Box<dyn Read + Send> = Box::new(Cursor::new(b"abcdef".to_vec()));
        Ok(Response::new(200)?.with_body(Body::Stream(stream)))
    }));
    let proxy = spawn_worker(endpoint);
    let headers = r#"{"METHOD":"GET","PATH":"/stream","PATTERN":"/"}"#;
    let published = exchange(proxy, &[request_frame("8", "/stream", headers, "")]);
    assert!(published.contains("Transfer-Encoding: chunked\r\n"));
    // head frame, one data chunk, terminator chunk
    assert_eq!(published.matches("PROXY1 1:8, ").count(), 3, "published: {published}");
    assert!(published.contains("6\r\nabcdef\r\n"));
    assert!(published.ends_with("PROXY1 1:8, 0\r\n\r\n"));
}
