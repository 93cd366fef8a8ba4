use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use http::header::{LOCATION, RETRY_AFTER, WWW_AUTHENTICATE};
use http::{HeaderMap, StatusCode};

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Parses `Retry-After` as integer seconds or as an HTTP-date (delta from
/// `now`, clamped at zero). Missing or unparseable values yield `None`.
pub(crate) fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?;
    let raw_value = value.to_str().ok()?.trim();
    if let Ok(seconds) = raw_value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = httpdate::parse_http_date(raw_value).ok()?;
    match date.duration_since(now) {
        Ok(duration) => Some(duration),
        Err(_) => Some(Duration::ZERO),
    }
}

pub(crate) fn is_redirect_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

pub(crate) fn redirect_location(headers: &HeaderMap) -> Option<String> {
    headers
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .filter(|location| !location.is_empty())
        .map(ToOwned::to_owned)
}

/// Base64 `user:pass` credentials for a `Basic` authorization header value.
pub(crate) fn basic_credentials(username: &str, password: &str) -> String {
    let mut value = String::from("Basic ");
    value.push_str(&BASE64_STANDARD.encode(format!("{username}:{password}")));
    value
}

/// Lowercased media type of the response, with parameters stripped
/// (`application/json; charset=utf-8` → `application/json`).
pub(crate) fn primary_content_type(headers: &HeaderMap) -> Option<String> {
    let raw_type = headers.get(http::header::CONTENT_TYPE)?.to_str().ok()?;
    let primary = raw_type.split(';').next().unwrap_or_default().trim();
    if primary.is_empty() {
        return None;
    }
    Some(primary.to_ascii_lowercase())
}

/// Extracts the `claims` parameter from a bearer challenge, e.g.
/// `WWW-Authenticate: Bearer realm="", claims="eyJhY2Nlc3..."`.
pub(crate) fn extract_bearer_claims(headers: &HeaderMap) -> Option<String> {
    let challenge = headers.get(WWW_AUTHENTICATE)?.to_str().ok()?;
    let scheme_len = "Bearer".len();
    if challenge.len() <= scheme_len || !challenge[..scheme_len].eq_ignore_ascii_case("Bearer") {
        return None;
    }
    let parameters = challenge[scheme_len..].trim_start();
    for parameter in parameters.split(',') {
        let Some(value) = parameter.trim().strip_prefix("claims=") else {
            continue;
        };
        let claims = value.trim().trim_matches('"');
        if !claims.is_empty() {
            return Some(claims.to_owned());
        }
    }
    None
}

/// Removes the `{?...}` query-expansion segment from a URL template, leaving
/// the path portion for span naming.
pub(crate) fn strip_query_template(template: &str) -> &str {
    match template.find("{?") {
        Some(index) => &template[..index],
        None => template,
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use http::{HeaderMap, HeaderValue};

    use super::{
        basic_credentials, extract_bearer_claims, parse_retry_after, primary_content_type,
        strip_query_template,
    };

    #[test]
    fn parse_retry_after_reads_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(
            parse_retry_after(&headers, SystemTime::UNIX_EPOCH),
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn parse_retry_after_reads_http_date() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let retry_at_text = httpdate::fmt_http_date(now + Duration::from_secs(42));
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::RETRY_AFTER,
            HeaderValue::from_str(&retry_at_text).expect("valid http date"),
        );
        assert_eq!(
            parse_retry_after(&headers, now),
            Some(Duration::from_secs(42))
        );
    }

    #[test]
    fn parse_retry_after_clamps_past_dates_to_zero() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let retry_at_text = httpdate::fmt_http_date(now - Duration::from_secs(60));
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::RETRY_AFTER,
            HeaderValue::from_str(&retry_at_text).expect("valid http date"),
        );
        assert_eq!(parse_retry_after(&headers, now), Some(Duration::ZERO));
    }

    #[test]
    fn parse_retry_after_ignores_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::RETRY_AFTER,
            HeaderValue::from_static("next tuesday"),
        );
        assert_eq!(parse_retry_after(&headers, SystemTime::UNIX_EPOCH), None);
    }

    #[test]
    fn basic_credentials_encode_user_and_password() {
        assert_eq!(basic_credentials("user", "pass"), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn primary_content_type_strips_parameters_and_lowercases() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("Application/JSON; charset=utf-8"),
        );
        assert_eq!(
            primary_content_type(&headers).as_deref(),
            Some("application/json")
        );
    }

    #[test]
    fn extract_bearer_claims_reads_quoted_parameter() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::WWW_AUTHENTICATE,
            HeaderValue::from_static(
                "Bearer realm=\"\", authorization_uri=\"https://login.test\", claims=\"eyJhYyJ9\"",
            ),
        );
        assert_eq!(extract_bearer_claims(&headers).as_deref(), Some("eyJhYyJ9"));
    }

    #[test]
    fn extract_bearer_claims_requires_bearer_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"x\", claims=\"abc\""),
        );
        assert_eq!(extract_bearer_claims(&headers), None);
    }

    #[test]
    fn strip_query_template_removes_expansion_segment() {
        assert_eq!(
            strip_query_template("{+baseurl}/users{?%24select,%24count}"),
            "{+baseurl}/users"
        );
        assert_eq!(strip_query_template("{+baseurl}/users"), "{+baseurl}/users");
    }
}
