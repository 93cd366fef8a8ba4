use std::any::Any;
use std::sync::{Arc, Mutex};

use http::HeaderMap;

use crate::error::Error;
use crate::options::{OptionKey, RequestOption};
use crate::otel;
use crate::pipeline::{BoxFuture, Middleware, Pipeline};
use crate::request::Request;
use crate::response::Response;
use crate::util::lock_unpoisoned;

/// Observation taps for the headers flowing through a request. The captured
/// maps live behind shared locks so the caller keeps visibility into what
/// the handler recorded; each interception replaces the previous capture.
#[derive(Clone, Debug, Default)]
pub struct HeadersInspectionOptions {
    pub inspect_request_headers: bool,
    pub inspect_response_headers: bool,
    pub(crate) request_headers: Arc<Mutex<HeaderMap>>,
    pub(crate) response_headers: Arc<Mutex<HeaderMap>>,
}

impl HeadersInspectionOptions {
    pub const KEY: OptionKey = OptionKey("HeadersInspectionHandler");

    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_headers(&self) -> HeaderMap {
        lock_unpoisoned(&self.request_headers).clone()
    }

    pub fn response_headers(&self) -> HeaderMap {
        lock_unpoisoned(&self.response_headers).clone()
    }
}

impl RequestOption for HeadersInspectionOptions {
    fn key(&self) -> OptionKey {
        Self::KEY
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct HeadersInspectionHandler {
    options: HeadersInspectionOptions,
}

impl HeadersInspectionHandler {
    pub fn new() -> Self {
        Self::with_options(HeadersInspectionOptions::new())
    }

    pub fn with_options(options: HeadersInspectionOptions) -> Self {
        Self { options }
    }
}

impl Default for HeadersInspectionHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for HeadersInspectionHandler {
    fn intercept<'a>(
        &'a self,
        pipeline: &'a dyn Pipeline,
        index: usize,
        request: Request,
    ) -> BoxFuture<'a, Result<Response, Error>> {
        Box::pin(async move {
            let options = request
                .options
                .get::<HeadersInspectionOptions>(HeadersInspectionOptions::KEY)
                .cloned()
                .unwrap_or_else(|| self.options.clone());
            let mut span = otel::start_span(
                request.options.observability(),
                "HeadersInspectionHandler_intercept",
            );
            span.set_bool("courier.handler.headers_inspection.enable", true);

            if options.inspect_request_headers {
                *lock_unpoisoned(&options.request_headers) = request.headers.clone();
            }
            let response = pipeline.next(request, index + 1).await?;
            if options.inspect_response_headers {
                *lock_unpoisoned(&options.response_headers) = response.headers().clone();
            }
            Ok(response)
        })
    }
}
