//! `courier` is an HTTP request-execution crate for generated API clients.
//!
//! It sits between a code-generated client layer and the low-level HTTP
//! transport: it renders a [`RequestInformation`] into a request, runs it
//! through a middleware pipeline (retry, redirect, compression, parameter
//! decoding, user agent, header inspection, and optionally chaos or proxy
//! authentication), authenticates it, and deserializes the response payload
//! through a caller-supplied parse-node factory.
//!
//! # Quick Start
//!
//! ```no_run
//! # async fn demo(
//! #     parse_node_factory: std::sync::Arc<dyn courier::ParseNodeFactory>,
//! #     user_factory: courier::ParsableFactory,
//! # ) -> Result<(), courier::Error> {
//! use std::sync::Arc;
//!
//! use courier::prelude::*;
//!
//! let adapter = RequestAdapter::new(
//!     Arc::new(AnonymousAuthenticationProvider),
//!     parse_node_factory,
//! );
//! adapter.set_base_url("https://api.example.com/v1");
//!
//! let mut request_info =
//!     RequestInformation::new(http::Method::GET, "{+baseurl}/users/{user-id}");
//! request_info
//!     .path_parameters
//!     .insert("user-id".to_owned(), "jane".to_owned());
//!
//! let user = adapter
//!     .send(request_info, user_factory, ErrorMappings::new())
//!     .await?;
//! println!("fetched: {user:?}");
//! # Ok(())
//! # }
//! ```
//!
//! # Per-request configuration
//!
//! Every handler reads its options from the request first and falls back to
//! its constructor defaults, so a single client serves callers with
//! different retry, redirect or compression needs: attach
//! [`RetryOptions`], [`RedirectOptions`], etc. to the
//! [`RequestInformation`] and the adapter carries them to the handlers.

mod adapter;
mod client;
mod core;
mod http;
mod middleware;
mod transport;

pub(crate) use crate::adapter::authentication;
pub(crate) use crate::adapter::request_information;
pub(crate) use crate::adapter::serialization;
pub(crate) use crate::core::error;
pub(crate) use crate::core::options;
pub(crate) use crate::core::otel;
pub(crate) use crate::core::pipeline;
pub(crate) use crate::core::proxy;
pub(crate) use crate::core::util;
pub(crate) use crate::http::request;
pub(crate) use crate::http::response;

pub use crate::adapter::authentication::{
    AnonymousAuthenticationProvider, AuthenticationProvider, CLAIMS_KEY,
};
pub use crate::adapter::request_adapter::RequestAdapter;
pub use crate::adapter::request_information::RequestInformation;
pub use crate::adapter::serialization::{
    EnumFactory, ErrorMappings, Parsable, ParsableFactory, ParseNode, ParseNodeFactory,
    PrimitiveType, PrimitiveValue, ResponseHandlerFn, ResponseHandlerOption,
};
pub use crate::client::{Client, ClientBuilder, default_middleware};
pub use crate::core::error::{ApiError, Error, ErrorCode};
pub use crate::core::options::{ObservabilityOptions, OptionKey, OptionsBag, RequestOption};
pub use crate::core::otel::span_attributes;
pub use crate::core::pipeline::{BoxFuture, Middleware, MiddlewarePipeline, Pipeline};
pub use crate::core::proxy::{NoProxyRule, ProxyResolver};
pub use crate::http::request::Request;
pub use crate::http::response::Response;
pub use crate::middleware::chaos::{ChaosHandler, ChaosOptions, ChaosStrategy};
pub use crate::middleware::compression::{CompressionHandler, CompressionOptions};
pub use crate::middleware::headers_inspection::{
    HeadersInspectionHandler, HeadersInspectionOptions,
};
pub use crate::middleware::parameters_name_decoding::{
    ParametersNameDecodingHandler, ParametersNameDecodingOptions, decode_parameter_names,
};
pub use crate::middleware::proxy_authentication::{
    ProxyAuthenticationHandler, ProxyAuthenticationOptions,
};
pub use crate::middleware::redirect::{
    RedirectHandler, RedirectOptions, ScrubSensitiveHeaders, ShouldRedirect,
    default_scrub_sensitive_headers,
};
pub use crate::middleware::retry::{RetryHandler, RetryOptions, ShouldRetry};
pub use crate::middleware::url_replace::{
    UrlReplaceHandler, UrlReplaceOptions, replace_path_tokens,
};
pub use crate::middleware::user_agent::{UserAgentHandler, UserAgentHandlerOptions};
pub use crate::transport::{HyperTransport, Transport};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        AnonymousAuthenticationProvider, AuthenticationProvider, Client, ErrorMappings,
        ObservabilityOptions, Parsable, ParsableFactory, ParseNodeFactory, PrimitiveType,
        PrimitiveValue, RequestAdapter, RequestInformation, Result,
    };
    pub use crate::{
        ChaosHandler, ChaosOptions, CompressionOptions, HeadersInspectionOptions,
        ParametersNameDecodingOptions, RedirectOptions, RetryOptions, UrlReplaceOptions,
        UserAgentHandlerOptions,
    };
}
