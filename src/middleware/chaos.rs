use std::any::Any;
use std::collections::HashMap;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use rand::Rng;
use regex::Regex;
use tracing::warn;

use crate::error::Error;
use crate::options::{OptionKey, RequestOption};
use crate::otel;
use crate::pipeline::{BoxFuture, Middleware, Pipeline};
use crate::request::Request;
use crate::response::Response;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChaosStrategy {
    /// Always synthesize a response with the configured status.
    Manual,
    /// Synthesize with probability `chaos_percentage / 100`, else yield.
    #[default]
    Random,
}

/// Configuration for [`ChaosHandler`].
///
/// `status_map` maps a URL (relative to `base_url`) to per-method status
/// codes; unmatched URLs fall through to an end-anchored pattern match and
/// finally to a uniform pick from the per-method status pools.
#[derive(Clone, Debug)]
pub struct ChaosOptions {
    pub base_url: String,
    pub strategy: ChaosStrategy,
    pub status_code: Option<StatusCode>,
    pub status_message: String,
    pub chaos_percentage: u32,
    pub response_body: Option<Bytes>,
    pub headers: HeaderMap,
    pub status_map: HashMap<String, HashMap<Method, StatusCode>>,
}

impl ChaosOptions {
    pub const KEY: OptionKey = OptionKey("ChaosHandler");
}

impl Default for ChaosOptions {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            strategy: ChaosStrategy::Random,
            status_code: None,
            status_message: "A random error message".to_owned(),
            chaos_percentage: 10,
            response_body: None,
            headers: HeaderMap::new(),
            status_map: HashMap::new(),
        }
    }
}

impl RequestOption for ChaosOptions {
    fn key(&self) -> OptionKey {
        Self::KEY
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Fault-injection handler for resilience testing: short-circuits the chain
/// with synthesized error responses, deterministically or probabilistically.
pub struct ChaosHandler {
    options: ChaosOptions,
}

impl ChaosHandler {
    /// Random faults at the default 10%.
    pub fn new() -> Self {
        Self {
            options: ChaosOptions::default(),
        }
    }

    pub fn with_options(options: ChaosOptions) -> Result<Self, Error> {
        if options.chaos_percentage > 100 {
            return Err(Error::invalid_argument(
                "chaos percentage must be between 0 and 100",
            ));
        }
        if options.strategy == ChaosStrategy::Manual && options.status_code.is_none() {
            return Err(Error::invalid_argument(
                "manual chaos strategy requires a status code",
            ));
        }
        Ok(Self { options })
    }
}

impl Default for ChaosHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for ChaosHandler {
    fn intercept<'a>(
        &'a self,
        pipeline: &'a dyn Pipeline,
        index: usize,
        request: Request,
    ) -> BoxFuture<'a, Result<Response, Error>> {
        Box::pin(async move {
            let options = request
                .options
                .get::<ChaosOptions>(ChaosOptions::KEY)
                .cloned()
                .unwrap_or_else(|| self.options.clone());
            let mut span =
                otel::start_span(request.options.observability(), "ChaosHandler_intercept");
            span.set_bool("courier.handler.chaos.enable", true);

            let inject = match options.strategy {
                ChaosStrategy::Manual => true,
                ChaosStrategy::Random => {
                    rand::rng().random_range(0..100) < options.chaos_percentage
                }
            };
            if inject {
                let response = synthesize_response(&options, &request);
                warn!(
                    status = response.status().as_u16(),
                    uri = %request.uri,
                    "chaos handler injected a response"
                );
                return Ok(response);
            }

            pipeline.next(request, index + 1).await
        })
    }
}

fn synthesize_response(options: &ChaosOptions, request: &Request) -> Response {
    let status = select_status(options, request);
    let body = match &options.response_body {
        Some(body) => body.clone(),
        None if status.as_u16() >= 400 => {
            let code = status.canonical_reason().unwrap_or("Unknown");
            Bytes::from(
                serde_json::json!({
                    "error": { "code": code, "message": options.status_message }
                })
                .to_string(),
            )
        }
        None => Bytes::from_static(b"{}"),
    };
    Response::new(status, options.headers.clone(), body)
}

fn select_status(options: &ChaosOptions, request: &Request) -> StatusCode {
    if options.strategy == ChaosStrategy::Manual {
        return options.status_code.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    }
    if let Some(status) = options.status_code {
        return status;
    }

    let relative = relative_url(options, request);
    if let Some(by_method) = options.status_map.get(&relative) {
        if let Some(status) = by_method.get(&request.method) {
            return *status;
        }
    } else {
        for (pattern, by_method) in &options.status_map {
            let Ok(matcher) = Regex::new(&format!("{pattern}$")) else {
                continue;
            };
            if matcher.is_match(&relative)
                && let Some(status) = by_method.get(&request.method)
            {
                return *status;
            }
        }
    }

    random_status_for_method(&request.method)
}

fn relative_url(options: &ChaosOptions, request: &Request) -> String {
    if options.base_url.is_empty() {
        return request
            .uri
            .path_and_query()
            .map(|path_and_query| path_and_query.to_string())
            .unwrap_or_else(|| request.uri.to_string());
    }
    request.uri.to_string().replacen(&options.base_url, "", 1)
}

fn random_status_for_method(method: &Method) -> StatusCode {
    let pool: &[u16] = if matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    ) {
        &[429, 500, 502, 503, 504, 507]
    } else {
        &[429, 500, 502, 503, 504]
    };
    let picked = pool[rand::rng().random_range(0..pool.len())];
    StatusCode::from_u16(picked).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
