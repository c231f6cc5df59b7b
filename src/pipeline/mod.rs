//! Middleware composition.
//!
//! A pipeline is an ordered middleware stack terminated by an endpoint.
//! [`PipelineBuilder`] owns the ordering and binds each middleware to its
//! successor; the result of a build is a single [`Handler`] that routes an
//! environment through the whole chain.

mod builder;
mod middleware;

pub use builder::PipelineBuilder;
pub use middleware::{handler_fn, middleware_fn, Handler, HandlerFn, Middleware, MiddlewareFn};
