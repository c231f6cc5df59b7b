//! Blocking HTTP/1.1 socket worker.
//!
//! One accept loop, one request per connection: read the head, parse,
//! dispatch through the pipeline, write the response, close. Malformed
//! requests get a short plain-text error response; failures escaping the
//! pipeline bubble to the worker top level, which logs and exits so the
//! supervisor can respawn.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::environment::keys;
use crate::error::{Error, Result};
use crate::http::{error_response, parse_head, read_head, write_response, HeadRead};
use crate::pipeline::{Handler, PipelineBuilder};

#[cfg(unix)]
use super::heartbeat::HeartbeatSlot;
use super::{normalize_environment, stamp_adapter};

/// One accept-loop worker serving a single request per connection.
pub struct HttpWorker {
    config: ServerConfig,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    #[cfg(unix)]
    heartbeat: Option<HeartbeatSlot>,
}

impl HttpWorker {
    /// Bind a fresh listening socket (standalone mode).
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr)
            .map_err(|err| Error::socket_unavailable(&config.bind_addr, &err))?;
        info!(addr = %config.bind_addr, "http worker bound");
        Ok(Self::from_listener(config, listener))
    }

    /// Adopt a listener opened pre-fork and inherited from the supervisor.
    pub fn from_listener(config: ServerConfig, listener: TcpListener) -> Self {
        Self {
            config,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
            #[cfg(unix)]
            heartbeat: None,
        }
    }

    /// Flag observed between requests; raising it drains the worker.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// The bound address (tests bind port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[cfg(unix)]
    pub fn set_heartbeat(&mut self, slot: HeartbeatSlot) {
        self.heartbeat = Some(slot);
    }

    /// Serve until the shutdown flag or a soft signal is raised.
    ///
    /// `app` supplies the pipeline; it is built once, before the first
    /// accept.
    pub fn run<F>(self, app: F) -> Result<()>
    where
        F: FnOnce() -> PipelineBuilder,
    {
        let pipeline = app();
        let handler = pipeline.build()?;
        info!(addr = %self.config.bind_addr, "http worker serving");
        while !self.draining() {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };
            #[cfg(unix)]
            if let Some(heartbeat) = &self.heartbeat {
                heartbeat.beat();
            }
            if let Err(err) = self.serve_connection(stream, peer, handler.as_ref()) {
                error!(error = %err, "request processing failed, worker exiting");
                return Err(err);
            }
        }
        info!("http worker draining");
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

    /// Serve exactly one request; the connection closes on return.
    ///
    /// Connection-level I/O trouble (peer reset, truncated head) is logged
    /// and swallowed; only pipeline failures propagate.
    fn serve_connection(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        handler: &dyn Handler,
    ) -> Result<()> {
        let (head, leftover) = match read_head(&mut stream) {
            Ok(HeadRead::Complete { head, leftover }) => (head, leftover),
            Ok(HeadRead::Closed) => return Ok(()),
            Ok(HeadRead::Truncated) => {
                debug!(peer = %peer, "peer closed before completing the head");
                self.write_error(&mut stream, 400);
                return Ok(());
            }
            Ok(HeadRead::Overflow) => {
                debug!(peer = %peer, "request head over cap");
                self.write_error(&mut stream, 414);
                return Ok(());
            }
            Err(err) => {
                debug!(peer = %peer, error = %err, "head read failed");
                return Ok(());
            }
        };
        let mut env = match parse_head(&head, &self.config.methods) {
            Ok(env) => env,
            Err(err) => {
                debug!(peer = %peer, status = err.status(), "rejected request");
                self.write_error(&mut stream, err.status());
                return Ok(());
            }
        };
        env.insert(keys::REMOTE_ADDR, peer.ip().to_string());
        env.insert(keys::REMOTE_PORT, i64::from(peer.port()));
        stamp_adapter(&mut env, &self.config);
        let input = stream.try_clone()?;
        env.set_input(Box::new(io::Cursor::new(leftover).chain(input)));
        normalize_environment(&mut env);

        debug!(
            peer = %peer,
            method = env.get_str(keys::REQUEST_METHOD).unwrap_or(""),
            path = env.get_str(keys::PATH_INFO).unwrap_or(""),
            "dispatching request"
        );
        let response = handler.call(&mut env)?;
        if let Err(err) = write_response(response, &mut stream, self.config.buffer_size) {
            debug!(peer = %peer, error = %err, "response write failed");
        }
        Ok(())
    }

    fn write_error(&self, stream: &mut TcpStream, status: u16) {
        let _ = write_response(error_response(status), stream, self.config.buffer_size);
    }
}
