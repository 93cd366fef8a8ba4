use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use http::header::HeaderName;
use http::{HeaderValue, StatusCode};
use tokio::time::Instant;
use tracing::debug;

use crate::error::Error;
use crate::options::{OptionKey, RequestOption};
use crate::otel;
use crate::otel::span_attributes::HTTP_REQUEST_RESEND_COUNT;
use crate::pipeline::{BoxFuture, Middleware, Pipeline};
use crate::request::Request;
use crate::response::Response;
use crate::util::parse_retry_after;

const DEFAULT_MAX_RETRIES: u32 = 3;
const ABSOLUTE_MAX_RETRIES: u32 = 10;
const DEFAULT_DELAY: Duration = Duration::from_secs(3);
const ABSOLUTE_MAX_DELAY: Duration = Duration::from_secs(180);

const RETRY_ATTEMPT_HEADER: HeaderName = HeaderName::from_static("retry-attempt");

/// Veto callback consulted before each retry with the computed delay, the
/// zero-based attempt about to be superseded, and the request/response pair.
pub type ShouldRetry = Arc<dyn Fn(Duration, u32, &Request, &Response) -> bool + Send + Sync>;

/// Configuration for [`RetryHandler`]. Values outside the supported ranges
/// are clamped: `max_retries` to 1..=10 (0 selects the default of 3) and
/// `delay` to at most 180 s (zero selects the default of 3 s).
#[derive(Clone)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub delay: Duration,
    pub should_retry: Option<ShouldRetry>,
}

impl RetryOptions {
    pub const KEY: OptionKey = OptionKey("RetryHandler");

    fn clamped_max_retries(&self) -> u32 {
        if self.max_retries < 1 {
            DEFAULT_MAX_RETRIES
        } else {
            self.max_retries.min(ABSOLUTE_MAX_RETRIES)
        }
    }

    fn clamped_delay(&self) -> Duration {
        if self.delay.is_zero() {
            DEFAULT_DELAY
        } else {
            self.delay.min(ABSOLUTE_MAX_DELAY)
        }
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_DELAY,
            should_retry: None,
        }
    }
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("delay", &self.delay)
            .field("should_retry", &self.should_retry.is_some())
            .finish()
    }
}

impl RequestOption for RetryOptions {
    fn key(&self) -> OptionKey {
        Self::KEY
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Re-yields 429 and 503 responses with exponential backoff, honoring
/// `Retry-After` and the request deadline. Superseded responses are dropped
/// before the next attempt; transport errors propagate without retry.
pub struct RetryHandler {
    options: RetryOptions,
}

impl RetryHandler {
    pub fn new() -> Self {
        Self::with_options(RetryOptions::default())
    }

    pub fn with_options(options: RetryOptions) -> Self {
        Self { options }
    }
}

impl Default for RetryHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for RetryHandler {
    fn intercept<'a>(
        &'a self,
        pipeline: &'a dyn Pipeline,
        index: usize,
        mut request: Request,
    ) -> BoxFuture<'a, Result<Response, Error>> {
        Box::pin(async move {
            let options = request
                .options
                .get::<RetryOptions>(RetryOptions::KEY)
                .cloned()
                .unwrap_or_else(|| self.options.clone());
            let mut span =
                otel::start_span(request.options.observability(), "RetryHandler_intercept");
            span.set_bool("courier.handler.retry.enable", true);

            let max_retries = options.clamped_max_retries();
            let base_delay = options.clamped_delay();
            let mut cumulative_delay = Duration::ZERO;
            let mut attempt: u32 = 0;

            let mut response = pipeline.next(request.clone(), index + 1).await?;
            loop {
                if !is_retriable_status(response.status()) || attempt >= max_retries {
                    return Ok(response);
                }

                let exponential = exponential_delay(base_delay, attempt);
                let delay = match parse_retry_after(response.headers(), SystemTime::now()) {
                    Some(header_delay) => header_delay.max(exponential),
                    None => exponential,
                }
                .min(ABSOLUTE_MAX_DELAY);
                if cumulative_delay + delay > ABSOLUTE_MAX_DELAY {
                    return Ok(response);
                }
                if let Some(should_retry) = &options.should_retry
                    && !should_retry(delay, attempt, &request, &response)
                {
                    return Ok(response);
                }

                if let Some(deadline) = request.deadline
                    && Instant::now() + delay >= deadline
                {
                    drop(response);
                    return Err(Error::DeadlineExceeded {
                        method: request.method.clone(),
                        uri: request.uri.to_string(),
                    });
                }
                tokio::time::sleep(delay).await;

                cumulative_delay += delay;
                attempt += 1;
                request
                    .headers
                    .insert(RETRY_ATTEMPT_HEADER, HeaderValue::from(attempt));
                span.set_i64(HTTP_REQUEST_RESEND_COUNT, i64::from(attempt));
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    status = response.status().as_u16(),
                    "retrying request"
                );

                response = pipeline.next(request.clone(), index + 1).await?;
            }
        })
    }
}

fn is_retriable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    )
}

fn exponential_delay(base_delay: Duration, attempt: u32) -> Duration {
    base_delay.saturating_mul(1_u32 << attempt.min(31))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{RetryOptions, exponential_delay, is_retriable_status};

    #[test]
    fn exponential_delay_doubles_per_attempt() {
        let base = Duration::from_secs(1);
        assert_eq!(exponential_delay(base, 0), Duration::from_secs(1));
        assert_eq!(exponential_delay(base, 1), Duration::from_secs(2));
        assert_eq!(exponential_delay(base, 2), Duration::from_secs(4));
    }

    #[test]
    fn only_throttle_and_unavailable_are_retriable() {
        assert!(is_retriable_status(http::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retriable_status(http::StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retriable_status(http::StatusCode::BAD_GATEWAY));
        assert!(!is_retriable_status(http::StatusCode::OK));
    }

    #[test]
    fn out_of_range_options_are_clamped() {
        let zeroed = RetryOptions {
            max_retries: 0,
            delay: Duration::ZERO,
            should_retry: None,
        };
        assert_eq!(zeroed.clamped_max_retries(), 3);
        assert_eq!(zeroed.clamped_delay(), Duration::from_secs(3));

        let oversized = RetryOptions {
            max_retries: 99,
            delay: Duration::from_secs(600),
            should_retry: None,
        };
        assert_eq!(oversized.clamped_max_retries(), 10);
        assert_eq!(oversized.clamped_delay(), Duration::from_secs(180));
    }
}
