//! Queue-transport worker speaking to an upstream proxy.
//!
//! The worker pulls framed requests from one stream, builds an environment
//! from the frame's JSON header object, runs the pipeline, and publishes
//! framed replies on the other stream. Identity-method (`JSON`) requests
//! and `@*` control paths are accepted and dropped without a reply.

use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{QueueConfig, ServerConfig};
use crate::environment::{keys, Environment};
use crate::error::{Error, FrameError, Result};
use crate::http::response::render_head;
use crate::http::{write_response, Body, Response};
use crate::pipeline::{Handler, PipelineBuilder};

use super::frame::{encode_reply, read_frame, RequestFrame};
use super::{normalize_environment, stamp_adapter};

/// A worker bound to the upstream proxy's pull/publish socket pair.
pub struct QueueWorker {
    config: ServerConfig,
    pull: TcpStream,
    publish: TcpStream,
    shutdown: Arc<AtomicBool>,
}

impl QueueWorker {
    /// Connect both queue streams.
    ///
    /// The sockets cannot be shared across forks, so a supervised
    /// deployment calls this inside each child.
    pub fn connect(config: ServerConfig, queue: QueueConfig) -> Result<Self> {
        let pull = TcpStream::connect(&queue.pull_addr)
            .map_err(|err| Error::socket_unavailable(&queue.pull_addr, &err))?;
        let publish = TcpStream::connect(&queue.publish_addr)
            .map_err(|err| Error::socket_unavailable(&queue.publish_addr, &err))?;
        info!(
            pull = %queue.pull_addr,
            publish = %queue.publish_addr,
            "queue worker connected"
        );
        Ok(Self {
            config,
            pull,
            publish,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag observed between frames; raising it drains the worker.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Serve frames until the upstream closes, the shutdown flag is
    /// raised, or a soft signal arrives.
    pub fn run<F>(mut self, app: F) -> Result<()>
    where
        F: FnOnce() -> PipelineBuilder,
    {
        let pipeline = app();
        let handler = pipeline.build()?;
        let mut reader = BufReader::new(self.pull.try_clone()?);
        while !self.draining() {
            let frame = match read_frame(&mut reader) {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("upstream closed the pull stream");
                    break;
                }
                Err(FrameError::Io(err)) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    // the stream cannot be resynchronized past a bad frame
                    error!(error = %err, "malformed frame, dropping the pull stream");
                    break;
                }
            };
            if let Err(err) = self.handle_frame(frame, handler.as_ref()) {
                error!(error = %err, "frame processing failed, worker exiting");
                return Err(err);
            }
        }
        info!("queue worker draining");
        Ok(())
    }

    fn draining(&self) -> bool {
        if self.shutdown.load(Ordering::SeqCst) {
            return true;
        }
        #[cfg(unix)]
        if super::signals::pending().is_some() {
            return true;
        }
        false
    }

    fn handle_frame(&mut self, frame: RequestFrame, handler: &dyn Handler) -> Result<()> {
        let method = frame
            .headers
            .method
            .as_deref()
            .unwrap_or("")
            .to_ascii_uppercase();
        if method == "JSON" || frame.path.starts_with('@') {
            debug!(path = %frame.path, "discarding control message");
            return Ok(());
        }
        let mut env = self.build_environment(&frame, method);
        normalize_environment(&mut env);
        let response = handler.call(&mut env)?;
        self.publish_response(&frame, response)
    }

    fn build_environment(&self, frame: &RequestFrame, method: String) -> Environment {
        let headers = &frame.headers;
        let mut env = Environment::new();
        env.insert(keys::REQUEST_METHOD, method);

        let pattern = headers.pattern.as_deref().unwrap_or("/");
        // a root mount leaves SCRIPT_NAME empty
        let script_name = if pattern == "/" { "" } else { pattern };
        env.insert(keys::SCRIPT_NAME, script_name);

        let path = headers.path.as_deref().unwrap_or(&frame.path);
        let trailing = path.get(pattern.len()..).unwrap_or("");
        env.insert(keys::PATH_INFO, format!("/{}", trailing.trim_matches('/')));

        env.insert(
            keys::REQUEST_URI,
            headers.uri.clone().unwrap_or_else(|| frame.path.clone()),
        );
        env.insert(
            keys::QUERY_STRING,
            headers.query.clone().unwrap_or_default(),
        );
        if let Some(addr) = &headers.forwarded_for {
            env.insert(keys::REMOTE_ADDR, addr.clone());
        }
        env.insert(keys::HTTP_VERSION, "HTTP/1.1");
        for (name, value) in &headers.extra {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            env.insert(mangle_header_name(name), value);
        }
        stamp_adapter(&mut env, &self.config);
        env.set_input(Box::new(io::Cursor::new(frame.body.clone())));
        env
    }

    /// Publish one reply frame for a buffered body, or a head frame plus
    /// one chunk frame per read for a streamed body.
    fn publish_response(&mut self, frame: &RequestFrame, response: Response) -> Result<()> {
        let Response {
            status,
            mut headers,
            body,
        } = response;
        match body {
            buffered @ Body::Buffer(_) => {
                let rebuilt = Response {
                    status,
                    headers,
                    body: buffered,
                };
                let mut raw = Vec::new();
                write_response(rebuilt, &mut raw, self.config.buffer_size)?;
                self.publish(&encode_reply(&frame.sender, &frame.conn_id, &raw))
            }
            Body::Stream(mut stream) => {
                let framed = headers
                    .iter()
                    .any(|(n, _)| {
                        n.eq_ignore_ascii_case("Content-Length")
                            || n.eq_ignore_ascii_case("Transfer-Encoding")
                    });
                if framed {
                    warn!("streamed reply carries its own framing, copying verbatim");
                    self.publish(&encode_reply(
                        &frame.sender,
                        &frame.conn_id,
                        &render_head(status, &headers),
                    ))?;
                    return self.publish_stream_plain(frame, &mut stream);
                }
                headers.push(("Transfer-Encoding".to_string(), "chunked".to_string()));
                self.publish(&encode_reply(
                    &frame.sender,
                    &frame.conn_id,
                    &render_head(status, &headers),
                ))?;
                self.publish_stream_chunked(frame, &mut stream)
            }
        }
    }

    fn publish_stream_chunked(
        &mut self,
        frame: &RequestFrame,
        stream: &mut (dyn Read + Send),
    ) -> Result<()> {
        let mut buf = vec![0u8; self.config.buffer_size.max(1)];
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                break;
            }
            let mut chunk = format!("{n:X}\r\n").into_bytes();
            chunk.extend_from_slice(&buf[..n]);
            chunk.extend_from_slice(b"\r\n");
            self.publish(&encode_reply(&frame.sender, &frame.conn_id, &chunk))?;
        }
        self.publish(&encode_reply(&frame.sender, &frame.conn_id, b"0\r\n\r\n"))
    }

    fn publish_stream_plain(
        &mut self,
        frame: &RequestFrame,
        stream: &mut (dyn Read + Send),
    ) -> Result<()> {
        let mut buf = vec![0u8; self.config.buffer_size.max(1)];
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            self.publish(&encode_reply(&frame.sender, &frame.conn_id, &buf[..n]))?;
        }
    }

    fn publish(&mut self, bytes: &[u8]) -> Result<()> {
        self.publish.write_all(bytes)?;
        self.publish.flush()?;
        Ok(())
    }
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
