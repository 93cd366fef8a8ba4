use std::any::Any;

use http::HeaderValue;
use http::header::USER_AGENT;

use crate::error::Error;
use crate::options::{OptionKey, RequestOption};
use crate::otel;
use crate::pipeline::{BoxFuture, Middleware, Pipeline};
use crate::request::Request;
use crate::response::Response;

#[derive(Clone, Debug)]
pub struct UserAgentHandlerOptions {
    pub enabled: bool,
    pub product_name: String,
    pub product_version: String,
}

impl UserAgentHandlerOptions {
    pub const KEY: OptionKey = OptionKey("UserAgentHandler");
}

impl Default for UserAgentHandlerOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            product_name: "courier-rs".to_owned(),
            product_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

impl RequestOption for UserAgentHandlerOptions {
    fn key(&self) -> OptionKey {
        Self::KEY
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Appends the `<product>/<version>` token to `User-Agent` at most once per
/// request, regardless of how many times the request passes through.
pub struct UserAgentHandler {
    options: UserAgentHandlerOptions,
}

impl UserAgentHandler {
    pub fn new() -> Self {
        Self::with_options(UserAgentHandlerOptions::default())
    }

    pub fn with_options(options: UserAgentHandlerOptions) -> Self {
        Self { options }
    }
}

impl Default for UserAgentHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for UserAgentHandler {
    fn intercept<'a>(
        &'a self,
        pipeline: &'a dyn Pipeline,
        index: usize,
        mut request: Request,
    ) -> BoxFuture<'a, Result<Response, Error>> {
        Box::pin(async move {
            let options = request
                .options
                .get::<UserAgentHandlerOptions>(UserAgentHandlerOptions::KEY)
                .cloned()
                .unwrap_or_else(|| self.options.clone());
            let mut span = otel::start_span(
                request.options.observability(),
                "UserAgentHandler_intercept",
            );
            span.set_bool("courier.handler.user_agent.enable", true);

            if options.enabled {
                let product = format!("{}/{}", options.product_name, options.product_version);
                let current = request
                    .headers
                    .get(USER_AGENT)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default();
                if !current.contains(&options.product_name) {
                    let appended = if current.is_empty() {
                        product
                    } else {
                        format!("{current} {product}")
                    };
                    if let Ok(value) = HeaderValue::from_str(&appended) {
                        request.headers.insert(USER_AGENT, value);
                    }
                }
            }

            pipeline.next(request, index + 1).await
        })
    }
}
