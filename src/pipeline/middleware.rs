//! The handler and middleware contracts.

use crate::environment::Environment;
use crate::error::Result;
use crate::http::Response;

/// A terminal request handler: given an environment, produce a response.
///
/// Endpoints implement this directly; a fully-bound middleware chain
/// presents the same shape, so callers cannot tell one from the other.
pub trait Handler: Send + Sync {
    fn call(&self, env: &mut Environment) -> Result<Response>;
}

/// An intermediate handler that wraps its successor.
///
/// A middleware may inspect or modify the environment before delegating to
/// `next`, decide not to delegate at all, and inspect or modify the
/// response on the way back out. The successor is bound by the pipeline
/// builder, never by the middleware itself.
pub trait Middleware: Send + Sync {
    fn call(&self, env: &mut Environment, next: &dyn Handler) -> Result<Response>;
}

/// Wrap a closure as a [`Handler`].
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&mut Environment) -> Result<Response> + Send + Sync,
{
    HandlerFn { inner: f }
}

pub struct HandlerFn<F> {
    inner: F,
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(&mut Environment) -> Result<Response> + Send + Sync,
{
    fn call(&self, env: &mut Environment) -> Result<Response> {
        (self.inner)(env)
    }
}

/// Wrap a closure as a [`Middleware`].
pub fn middleware_fn<F>(f: F) -> MiddlewareFn<F>
where
    F: Fn(&mut Environment, &dyn Handler) -> Result<Response> + Send + Sync,
{
    MiddlewareFn { inner: f }
}

pub struct MiddlewareFn<F> {
    inner: F,
}

impl<F> Middleware for MiddlewareFn<F>
where
    F: Fn(&mut Environment, &dyn Handler) -> Result<Response> + Send + Sync,
{
    fn call(&self, env: &mut Environment, next: &dyn Handler) -> Result<Response> {
        (self.inner)(env, next)
    }
}
