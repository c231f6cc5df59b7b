//! Ordered middleware composition.

use std::sync::{Arc, Mutex};

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::http::Response;

use super::middleware::{Handler, Middleware};

/// Builds the composed handler for an ordered middleware stack.
///
/// Middleware wraps the endpoint in onion order: the first appended
/// middleware is the outermost layer, and `prepend` inserts a new outermost
/// layer. For middleware A then B around endpoint E, the call order is
/// A → B → E and responses unwind B → A.
///
/// The builder is itself a [`Handler`]: invoking it builds the chain on
/// first use and rebuilds whenever the middleware list or endpoint changed
/// since the last build.
pub struct PipelineBuilder {
    middleware: Vec<Arc<dyn Middleware>>,
    endpoint: Option<Arc<dyn Handler>>,
    generation: u64,
    built: Mutex<Option<Built>>,
}

struct Built {
    generation: u64,
    handler: Arc<dyn Handler>,
}

/// One bound middleware node: the handler and its successor.
struct Link {
    middleware: Arc<dyn Middleware>,
    next: Arc<dyn Handler>,
}

impl Handler for Link {
    fn call(&self, env: &mut Environment) -> Result<Response> {
        self.middleware.call(env, self.next.as_ref())
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
            endpoint: None,
            generation: 0,
            built: Mutex::new(None),
        }
    }

    /// Build from an ordered middleware list and an endpoint in one step.
    ///
    /// Equivalent to an empty builder, appending each middleware in list
    /// order, then setting the endpoint.
    pub fn with(middleware: Vec<Arc<dyn Middleware>>, endpoint: Arc<dyn Handler>) -> Self {
        let mut builder = Self::new();
        for mw in middleware {
            builder.append(mw);
        }
        builder.set_endpoint(endpoint);
        builder
    }

    /// Add a middleware as the new innermost layer.
    pub fn append(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middleware.push(middleware);
        self.generation += 1;
        self
    }

    /// Add a middleware as the new outermost layer.
    pub fn prepend(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middleware.insert(0, middleware);
        self.generation += 1;
        self
    }

    /// Set the terminal handler.
    pub fn set_endpoint(&mut self, endpoint: Arc<dyn Handler>) -> &mut Self {
        self.endpoint = Some(endpoint);
        self.generation += 1;
        self
    }

    /// Bind successors and return the outermost handler.
    ///
    /// Walks the middleware list from last to first: the last middleware is
    /// bound to the endpoint, each earlier one to the middleware that
    /// follows it. With no middleware the endpoint is returned directly.
    /// Fails with [`Error::NoEndpoint`] when no endpoint is set.
    pub fn build(&self) -> Result<Arc<dyn Handler>> {
        let endpoint = self.endpoint.clone().ok_or(Error::NoEndpoint)?;
        let mut next = endpoint;
        for middleware in self.middleware.iter().rev() {
            next = Arc::new(Link {
                middleware: middleware.clone(),
                next,
            });
        }
        Ok(next)
    }

    fn built_handler(&self) -> Result<Arc<dyn Handler>> {
        let mut cache = self
            .built
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(built) = cache.as_ref() {
            if built.generation == self.generation {
                return Ok(built.handler.clone());
            }
        }
        let handler = self.build()?;
        *cache = Some(Built {
            generation: self.generation,
            handler: handler.clone(),
        });
        Ok(handler)
    }
}

impl Handler for PipelineBuilder {
    fn call(&self, env: &mut Environment) -> Result<Response> {
        self.built_handler()?.call(env)
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::handler_fn;

    #[test]
    fn test_build_without_endpoint_fails() {
        let builder = PipelineBuilder::new();
        assert!(matches!(builder.build(), Err(Error::NoEndpoint)));
    }

    #[test]
    fn test_empty_builder_returns_endpoint_itself() {
        let endpoint: Arc<dyn Handler> =
            Arc::new(handler_fn(|_env: &mut Environment| Response::new(204)));
        let mut builder = PipelineBuilder::new();
        builder.set_endpoint(endpoint.clone());
        let built = builder.build().unwrap();
        assert!(Arc::ptr_eq(&built, &endpoint));
    }
}
