//! gantry — a small web-application server runtime.
//!
//! Two pieces make up the crate: an order-sensitive middleware
//! [`pipeline`] that composes an endpoint with wrapping middleware, and a
//! prefork [`server`] that accepts requests over HTTP/1.1 or a
//! message-queue transport, decodes each into a per-request
//! [`Environment`], runs the pipeline, and writes the response back.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gantry::{handler_fn, HttpWorker, PipelineBuilder, Response, ServerConfig};
//!
//! let worker = HttpWorker::bind(ServerConfig::new("127.0.0.1:8080"))?;
//! worker.run(|| {
//!     let mut app = PipelineBuilder::new();
//!     app.set_endpoint(Arc::new(handler_fn(|_env| Response::text(200, "hello"))));
//!     app
//! })?;
//! ```

pub mod config;
pub mod environment;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod server;
pub mod status;

pub use config::{MethodSet, QueueConfig, ServerConfig, SupervisorConfig};
pub use environment::{Environment, FormMap, Value};
pub use error::{Error, FrameError, ParseError, Result};
pub use http::{Body, Response};
pub use pipeline::{handler_fn, middleware_fn, Handler, Middleware, PipelineBuilder};
pub use server::{HttpWorker, QueueWorker};
#[cfg(unix)]
pub use server::{Supervisor, Transport};
