use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Error;
use crate::proxy::ProxyResolver;
use crate::request::Request;
use crate::response::Response;
use crate::transport::Transport;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A node of the middleware chain.
///
/// A handler receives the pipeline it runs in together with its own position
/// and the in-flight request. It may mutate the request, yield downstream by
/// calling `pipeline.next(request, index + 1)` zero or more times (retry,
/// redirect and compression-fallback re-yield at their own position), or
/// short-circuit with a synthesized response. Handlers must never dispatch
/// to positions before their own.
pub trait Middleware: Send + Sync {
    fn intercept<'a>(
        &'a self,
        pipeline: &'a dyn Pipeline,
        index: usize,
        request: Request,
    ) -> BoxFuture<'a, Result<Response, Error>>;
}

/// Ordered composition of handlers terminated by a transport.
pub trait Pipeline: Send + Sync {
    /// Dispatches to the handler at `index`, or performs the terminal round
    /// trip when the chain is exhausted.
    fn next<'a>(&'a self, request: Request, index: usize) -> BoxFuture<'a, Result<Response, Error>>;

    /// Capability probe: the proxy resolver of the terminal transport, when
    /// the pipeline can expose one. Absent means no proxy is active, and the
    /// redirect handler degrades accordingly.
    fn proxy_resolver(&self) -> Option<Arc<ProxyResolver>> {
        None
    }
}

/// The concrete pipeline driving request execution: handlers in chain order
/// in front of a terminal transport. Safe to share across tasks; all mutable
/// state lives on the request.
pub struct MiddlewarePipeline {
    handlers: Vec<Arc<dyn Middleware>>,
    transport: Arc<dyn Transport>,
}

impl MiddlewarePipeline {
    pub fn new(handlers: Vec<Arc<dyn Middleware>>, transport: Arc<dyn Transport>) -> Self {
        Self {
            handlers,
            transport,
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Pipeline for MiddlewarePipeline {
    fn next<'a>(&'a self, request: Request, index: usize) -> BoxFuture<'a, Result<Response, Error>> {
        match self.handlers.get(index) {
            Some(handler) => handler.intercept(self, index, request),
            None => self.transport.round_trip(request),
        }
    }

    fn proxy_resolver(&self) -> Option<Arc<ProxyResolver>> {
        self.transport.proxy_resolver()
    }
}
