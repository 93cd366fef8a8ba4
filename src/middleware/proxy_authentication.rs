use std::any::Any;

use http::HeaderValue;
use http::header::{CONTENT_TYPE, PROXY_AUTHORIZATION};

use crate::error::Error;
use crate::options::{OptionKey, RequestOption};
use crate::otel;
use crate::pipeline::{BoxFuture, Middleware, Pipeline};
use crate::request::Request;
use crate::response::Response;
use crate::util::basic_credentials;

#[derive(Clone, Debug, Default)]
pub struct ProxyAuthenticationOptions {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyAuthenticationOptions {
    pub const KEY: OptionKey = OptionKey("ProxyAuthenticationHandler");

    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn has_authentication(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

impl RequestOption for ProxyAuthenticationOptions {
    fn key(&self) -> OptionKey {
        Self::KEY
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Injects Basic `Proxy-Authorization` credentials. Also sets the
/// form-urlencoded `Content-Type`, a legacy behavior preserved until the
/// owning services confirm it can go.
pub struct ProxyAuthenticationHandler {
    options: ProxyAuthenticationOptions,
}

impl ProxyAuthenticationHandler {
    pub fn with_options(options: ProxyAuthenticationOptions) -> Self {
        Self { options }
    }
}

impl Middleware for ProxyAuthenticationHandler {
    fn intercept<'a>(
        &'a self,
        pipeline: &'a dyn Pipeline,
        index: usize,
        mut request: Request,
    ) -> BoxFuture<'a, Result<Response, Error>> {
        Box::pin(async move {
            let options = request
                .options
                .get::<ProxyAuthenticationOptions>(ProxyAuthenticationOptions::KEY)
                .cloned()
                .unwrap_or_else(|| self.options.clone());
            let mut span = otel::start_span(
                request.options.observability(),
                "ProxyAuthenticationHandler_intercept",
            );
            span.set_bool("courier.handler.proxy_authentication.enable", true);

            let (Some(username), Some(password)) = (&options.username, &options.password) else {
                return pipeline.next(request, index + 1).await;
            };

            let credentials = basic_credentials(username, password);
            let value = HeaderValue::from_str(&credentials).map_err(|_| {
                Error::invalid_argument("proxy credentials produce an invalid header value")
            })?;
            request.headers.insert(PROXY_AUTHORIZATION, value);
            request.headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );

            pipeline.next(request, index + 1).await
        })
    }
}
