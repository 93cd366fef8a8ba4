use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout_at;

use crate::error::Error;
use crate::pipeline::BoxFuture;
use crate::proxy::{ProxyConfig, ProxyConnector, ProxyResolver};
use crate::request::Request;
use crate::response::Response;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// The platform round-tripper contract terminating a pipeline: one network
/// round trip, no redirect following, no retries. Implementations must
/// honor the request deadline and return the response with its body fully
/// buffered.
pub trait Transport: Send + Sync {
    fn round_trip<'a>(&'a self, request: Request) -> BoxFuture<'a, Result<Response, Error>>;

    /// Capability probe used by the redirect handler; `None` means no proxy
    /// is active for any destination.
    fn proxy_resolver(&self) -> Option<Arc<ProxyResolver>> {
        None
    }
}

/// Default terminal transport over the hyper legacy client, optionally
/// tunneling through an HTTP proxy.
pub struct HyperTransport {
    client: HyperClient<ProxyConnector, Full<Bytes>>,
    proxy_resolver: Option<Arc<ProxyResolver>>,
}

impl HyperTransport {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub(crate) fn with_proxy(proxy_config: ProxyConfig) -> Self {
        Self::build(Some(proxy_config))
    }

    fn build(proxy_config: Option<ProxyConfig>) -> Self {
        let connector = ProxyConnector::new(proxy_config, DEFAULT_CONNECT_TIMEOUT);
        let proxy_resolver = connector.resolver().map(Arc::new);
        let client = HyperClient::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            proxy_resolver,
        }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HyperTransport {
    fn round_trip<'a>(&'a self, request: Request) -> BoxFuture<'a, Result<Response, Error>> {
        Box::pin(async move {
            let method = request.method.clone();
            let uri_text = request.uri.to_string();
            let deadline = request.deadline;

            let mut builder = http::Request::builder()
                .method(request.method)
                .uri(request.uri);
            if let Some(headers) = builder.headers_mut() {
                *headers = request.headers;
                // hyper derives the length from the buffered body; a stale
                // caller-set value must not survive handler rewrites.
                headers.remove(CONTENT_LENGTH);
            }
            let outgoing = builder
                .body(Full::new(request.body))
                .map_err(|source| Error::RequestBuild { source })?;

            let dispatch = self.client.request(outgoing);
            let response: http::Response<Incoming> = match deadline {
                Some(deadline) => timeout_at(deadline, dispatch)
                    .await
                    .map_err(|_| Error::DeadlineExceeded {
                        method: method.clone(),
                        uri: uri_text.clone(),
                    })?,
                None => dispatch.await,
            }
            .map_err(|source| Error::Transport {
                method: method.clone(),
                uri: uri_text.clone(),
                source: Box::new(source),
            })?;

            let (parts, body) = response.into_parts();
            let collect = body.collect();
            let collected = match deadline {
                Some(deadline) => timeout_at(deadline, collect)
                    .await
                    .map_err(|_| Error::DeadlineExceeded {
                        method: method.clone(),
                        uri: uri_text.clone(),
                    })?,
                None => collect.await,
            }
            .map_err(|source| Error::Transport {
                method,
                uri: uri_text,
                source: Box::new(source),
            })?;

            Ok(Response::new(
                parts.status,
                parts.headers,
                collected.to_bytes(),
            ))
        })
    }

    fn proxy_resolver(&self) -> Option<Arc<ProxyResolver>> {
        self.proxy_resolver.clone()
    }
}
