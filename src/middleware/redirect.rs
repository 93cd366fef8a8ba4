use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST, PROXY_AUTHORIZATION};
use http::{Method, StatusCode, Uri};

use crate::error::Error;
use crate::options::{OptionKey, RequestOption};
use crate::otel;
use crate::otel::span_attributes::HTTP_RESPONSE_STATUS_CODE;
use crate::pipeline::{BoxFuture, Middleware, Pipeline};
use crate::proxy::ProxyResolver;
use crate::request::Request;
use crate::response::Response;
use crate::util::{is_redirect_status, redirect_location};

const DEFAULT_MAX_REDIRECTS: u32 = 5;
const ABSOLUTE_MAX_REDIRECTS: u32 = 20;

pub type ShouldRedirect = Arc<dyn Fn(&Request, &Response) -> bool + Send + Sync>;

/// Decides which headers survive a redirect. Receives the rewritten request,
/// the original and target URIs, and the active proxy resolver (if any).
pub type ScrubSensitiveHeaders =
    Arc<dyn Fn(&mut Request, &Uri, &Uri, Option<&ProxyResolver>) + Send + Sync>;

/// Configuration for [`RedirectHandler`]. `max_redirects` of 0 selects the
/// default of 5; values above 20 are clamped to 20.
#[derive(Clone, Default)]
pub struct RedirectOptions {
    pub max_redirects: u32,
    pub should_redirect: Option<ShouldRedirect>,
    pub scrub_sensitive_headers: Option<ScrubSensitiveHeaders>,
}

impl RedirectOptions {
    pub const KEY: OptionKey = OptionKey("RedirectHandler");

    fn clamped_max_redirects(&self) -> u32 {
        if self.max_redirects < 1 {
            DEFAULT_MAX_REDIRECTS
        } else {
            self.max_redirects.min(ABSOLUTE_MAX_REDIRECTS)
        }
    }
}

impl std::fmt::Debug for RedirectOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RedirectOptions")
            .field("max_redirects", &self.max_redirects)
            .field("should_redirect", &self.should_redirect.is_some())
            .field(
                "scrub_sensitive_headers",
                &self.scrub_sensitive_headers.is_some(),
            )
            .finish()
    }
}

impl RequestOption for RedirectOptions {
    fn key(&self) -> OptionKey {
        Self::KEY
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Follows 301, 302, 303, 307 and 308 responses carrying a `Location`
/// header. Each hop deep-clones the request with the target URI, downgrades
/// 303 to a bodiless GET, and runs the scrub callback so credentials never
/// cross a security boundary.
pub struct RedirectHandler {
    options: RedirectOptions,
}

impl RedirectHandler {
    pub fn new() -> Self {
        Self::with_options(RedirectOptions::default())
    }

    pub fn with_options(options: RedirectOptions) -> Self {
        Self { options }
    }
}

impl Default for RedirectHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for RedirectHandler {
    fn intercept<'a>(
        &'a self,
        pipeline: &'a dyn Pipeline,
        index: usize,
        mut request: Request,
    ) -> BoxFuture<'a, Result<Response, Error>> {
        Box::pin(async move {
            let options = request
                .options
                .get::<RedirectOptions>(RedirectOptions::KEY)
                .cloned()
                .unwrap_or_else(|| self.options.clone());
            let mut span =
                otel::start_span(request.options.observability(), "RedirectHandler_intercept");
            span.set_bool("courier.handler.redirect.enable", true);

            let proxy_resolver = pipeline.proxy_resolver();
            let max_redirects = options.clamped_max_redirects();
            let mut redirect_count: u32 = 0;

            let mut response = pipeline.next(request.clone(), index + 1).await?;
            while redirect_count < max_redirects
                && is_redirect_response(&response)
                && options
                    .should_redirect
                    .as_ref()
                    .is_none_or(|should_redirect| should_redirect(&request, &response))
            {
                redirect_count += 1;
                span.set_i64("courier.handler.redirect.count", i64::from(redirect_count));
                span.set_i64(
                    HTTP_RESPONSE_STATUS_CODE,
                    i64::from(response.status().as_u16()),
                );

                request = build_redirect_request(
                    &request,
                    &response,
                    proxy_resolver.as_deref(),
                    options.scrub_sensitive_headers.as_ref(),
                )?;
                response = pipeline.next(request.clone(), index + 1).await?;
            }
            Ok(response)
        })
    }
}

fn is_redirect_response(response: &Response) -> bool {
    is_redirect_status(response.status()) && redirect_location(response.headers()).is_some()
}

fn build_redirect_request(
    original: &Request,
    response: &Response,
    proxy_resolver: Option<&ProxyResolver>,
    scrub: Option<&ScrubSensitiveHeaders>,
) -> Result<Request, Error> {
    let location = redirect_location(response.headers()).unwrap_or_default();
    let target_text = if location.starts_with('/') {
        let scheme = original.uri.scheme_str().unwrap_or("http");
        let authority = original
            .uri
            .authority()
            .map(|authority| authority.as_str())
            .unwrap_or_default();
        format!("{scheme}://{authority}{location}")
    } else {
        location
    };
    let target: Uri = target_text
        .parse()
        .map_err(|_| Error::InvalidRedirectLocation {
            location: target_text,
        })?;

    let mut next = original.clone();
    if next.uri.authority() != target.authority() {
        next.headers.remove(HOST);
    }
    next.uri = target.clone();

    if response.status() == StatusCode::SEE_OTHER {
        next.method = Method::GET;
        next.headers.remove(CONTENT_TYPE);
        next.headers.remove(CONTENT_LENGTH);
        next.body = Bytes::new();
    }

    match scrub {
        Some(scrub) => scrub(&mut next, &original.uri, &target, proxy_resolver),
        None => default_scrub_sensitive_headers(&mut next, &original.uri, &target, proxy_resolver),
    }

    Ok(next)
}

/// Default redirect scrub policy.
///
/// `Authorization` and `Cookie` are removed when the target differs from the
/// original in host, scheme or port (host and scheme compared
/// case-insensitively, ports compared as written). `Proxy-Authorization` is
/// removed unless a proxy is actively resolving the new destination.
pub fn default_scrub_sensitive_headers(
    request: &mut Request,
    original_uri: &Uri,
    new_uri: &Uri,
    proxy_resolver: Option<&ProxyResolver>,
) {
    let host_differs = !eq_ignore_ascii_case_opt(new_uri.host(), original_uri.host());
    let scheme_differs =
        !eq_ignore_ascii_case_opt(new_uri.scheme_str(), original_uri.scheme_str());
    let port_differs = new_uri.port_u16() != original_uri.port_u16();
    if host_differs || scheme_differs || port_differs {
        request.headers.remove(AUTHORIZATION);
        request.headers.remove(COOKIE);
    }

    let proxy_inactive = match proxy_resolver {
        None => true,
        Some(resolver) => resolver.resolve(new_uri).is_none(),
    };
    if proxy_inactive {
        request.headers.remove(PROXY_AUTHORIZATION);
    }
}

fn eq_ignore_ascii_case_opt(left: Option<&str>, right: Option<&str>) -> bool {
    match (left, right) {
        (Some(left), Some(right)) => left.eq_ignore_ascii_case(right),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use http::Uri;
    use http::header::{AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION};

    use super::default_scrub_sensitive_headers;
    use crate::proxy::{NoProxyRule, ProxyResolver};
    use crate::request::Request;

    fn request_with_sensitive_headers(uri: &str) -> Request {
        let mut request = Request::new(http::Method::GET, uri.parse().expect("uri"));
        request
            .headers
            .insert(AUTHORIZATION, "Bearer token".parse().expect("header"));
        request
            .headers
            .insert(COOKIE, "session=1".parse().expect("header"));
        request
            .headers
            .insert(PROXY_AUTHORIZATION, "Basic abc".parse().expect("header"));
        request
    }

    #[test]
    fn same_origin_keeps_credentials() {
        let original: Uri = "https://a.example/v1".parse().expect("uri");
        let target: Uri = "https://a.example/v2".parse().expect("uri");
        let mut request = request_with_sensitive_headers("https://a.example/v2");
        default_scrub_sensitive_headers(&mut request, &original, &target, None);
        assert!(request.headers.contains_key(AUTHORIZATION));
        assert!(request.headers.contains_key(COOKIE));
    }

    #[test]
    fn host_change_strips_credentials() {
        let original: Uri = "https://a.example/x".parse().expect("uri");
        let target: Uri = "https://b.example/y".parse().expect("uri");
        let mut request = request_with_sensitive_headers("https://b.example/y");
        default_scrub_sensitive_headers(&mut request, &original, &target, None);
        assert!(!request.headers.contains_key(AUTHORIZATION));
        assert!(!request.headers.contains_key(COOKIE));
    }

    #[test]
    fn scheme_change_strips_credentials() {
        let original: Uri = "https://a.example/x".parse().expect("uri");
        let target: Uri = "http://a.example/x".parse().expect("uri");
        let mut request = request_with_sensitive_headers("http://a.example/x");
        default_scrub_sensitive_headers(&mut request, &original, &target, None);
        assert!(!request.headers.contains_key(AUTHORIZATION));
    }

    #[test]
    fn port_change_strips_credentials() {
        let original: Uri = "https://a.example/x".parse().expect("uri");
        let target: Uri = "https://a.example:8443/x".parse().expect("uri");
        let mut request = request_with_sensitive_headers("https://a.example:8443/x");
        default_scrub_sensitive_headers(&mut request, &original, &target, None);
        assert!(!request.headers.contains_key(AUTHORIZATION));
    }

    #[test]
    fn host_comparison_is_case_insensitive() {
        let original: Uri = "https://A.Example/x".parse().expect("uri");
        let target: Uri = "https://a.example/y".parse().expect("uri");
        let mut request = request_with_sensitive_headers("https://a.example/y");
        default_scrub_sensitive_headers(&mut request, &original, &target, None);
        assert!(request.headers.contains_key(AUTHORIZATION));
    }

    #[test]
    fn proxy_authorization_is_stripped_without_a_resolver() {
        let original: Uri = "https://a.example/x".parse().expect("uri");
        let target: Uri = "https://a.example/y".parse().expect("uri");
        let mut request = request_with_sensitive_headers("https://a.example/y");
        default_scrub_sensitive_headers(&mut request, &original, &target, None);
        assert!(!request.headers.contains_key(PROXY_AUTHORIZATION));
    }

    #[test]
    fn proxy_authorization_survives_when_the_destination_is_proxied() {
        let resolver = ProxyResolver::new("http://proxy.test:8080".parse().expect("uri"), vec![]);
        let original: Uri = "https://a.example/x".parse().expect("uri");
        let target: Uri = "https://a.example/y".parse().expect("uri");
        let mut request = request_with_sensitive_headers("https://a.example/y");
        default_scrub_sensitive_headers(&mut request, &original, &target, Some(&resolver));
        assert!(request.headers.contains_key(PROXY_AUTHORIZATION));
    }

    #[test]
    fn proxy_authorization_is_stripped_when_the_destination_bypasses_the_proxy() {
        let resolver = ProxyResolver::new(
            "http://proxy.test:8080".parse().expect("uri"),
            vec![NoProxyRule::parse("a.example").expect("rule")],
        );
        let original: Uri = "https://a.example/x".parse().expect("uri");
        let target: Uri = "https://a.example/y".parse().expect("uri");
        let mut request = request_with_sensitive_headers("https://a.example/y");
        default_scrub_sensitive_headers(&mut request, &original, &target, Some(&resolver));
        assert!(!request.headers.contains_key(PROXY_AUTHORIZATION));
    }
}
