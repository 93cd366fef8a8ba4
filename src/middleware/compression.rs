use std::any::Any;
use std::io::Write;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::header::{CONTENT_ENCODING, CONTENT_RANGE};
use http::{HeaderMap, HeaderValue, StatusCode};

use crate::error::Error;
use crate::options::{OptionKey, RequestOption};
use crate::otel;
use crate::otel::span_attributes::{HTTP_REQUEST_BODY_SIZE, HTTP_RESPONSE_STATUS_CODE};
use crate::pipeline::{BoxFuture, Middleware, Pipeline};
use crate::request::Request;
use crate::response::Response;

#[derive(Clone, Copy, Debug)]
pub struct CompressionOptions {
    pub enabled: bool,
}

impl CompressionOptions {
    pub const KEY: OptionKey = OptionKey("CompressionHandler");
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl RequestOption for CompressionOptions {
    fn key(&self) -> OptionKey {
        Self::KEY
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Gzips request bodies. Skipped when disabled, when there is no body, when
/// `Content-Range` mentions bytes, or when a `Content-Encoding` is already
/// set. A 415 answer triggers a single re-yield with the original
/// uncompressed body.
pub struct CompressionHandler {
    options: CompressionOptions,
}

impl CompressionHandler {
    pub fn new() -> Self {
        Self::with_options(CompressionOptions::default())
    }

    pub fn with_options(options: CompressionOptions) -> Self {
        Self { options }
    }
}

impl Default for CompressionHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for CompressionHandler {
    fn intercept<'a>(
        &'a self,
        pipeline: &'a dyn Pipeline,
        index: usize,
        mut request: Request,
    ) -> BoxFuture<'a, Result<Response, Error>> {
        Box::pin(async move {
            let options = request
                .options
                .get::<CompressionOptions>(CompressionOptions::KEY)
                .copied()
                .unwrap_or(self.options);
            let mut span = otel::start_span(
                request.options.observability(),
                "CompressionHandler_intercept",
            );
            span.set_bool("courier.handler.compression.enable", true);

            if !options.enabled
                || !request.has_body()
                || content_range_bytes_present(&request.headers)
                || request.headers.contains_key(CONTENT_ENCODING)
            {
                return pipeline.next(request, index + 1).await;
            }

            let original_body = request.body.clone();
            let compressed = gzip_body(&original_body)?;
            request
                .headers
                .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            span.set_bool("http.request_body_compressed", true);
            span.set_i64(HTTP_REQUEST_BODY_SIZE, compressed.len() as i64);
            request.body = Bytes::from(compressed);

            let response = pipeline.next(request.clone(), index + 1).await?;
            if response.status() == StatusCode::UNSUPPORTED_MEDIA_TYPE {
                request.headers.remove(CONTENT_ENCODING);
                request.body = original_body;
                span.set_i64(HTTP_REQUEST_BODY_SIZE, request.body.len() as i64);
                span.set_i64(
                    HTTP_RESPONSE_STATUS_CODE,
                    i64::from(StatusCode::UNSUPPORTED_MEDIA_TYPE.as_u16()),
                );
                return pipeline.next(request, index + 1).await;
            }

            Ok(response)
        })
    }
}

fn content_range_bytes_present(headers: &HeaderMap) -> bool {
    headers.get_all(CONTENT_RANGE).iter().any(|value| {
        value
            .to_str()
            .is_ok_and(|range| range.to_ascii_lowercase().contains("bytes"))
    })
}

fn gzip_body(body: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(body)
        .map_err(|source| Error::Compression { source })?;
    encoder
        .finish()
        .map_err(|source| Error::Compression { source })
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use http::{HeaderMap, HeaderValue};

    use super::{content_range_bytes_present, gzip_body};

    #[test]
    fn gzip_round_trips_through_a_decoder() {
        let source = b"some request payload".repeat(20);
        let compressed = gzip_body(&source).expect("gzip should succeed");
        assert!(compressed.len() < source.len());

        let mut decoder = flate2::read::GzDecoder::new(compressed.as_slice());
        let mut decoded = Vec::new();
        decoder
            .read_to_end(&mut decoded)
            .expect("gzip payload should decode");
        assert_eq!(decoded, source);
    }

    #[test]
    fn content_range_detection_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_RANGE,
            HeaderValue::from_static("Bytes 0-999/8000"),
        );
        assert!(content_range_bytes_present(&headers));

        let mut other = HeaderMap::new();
        other.insert(
            http::header::CONTENT_RANGE,
            HeaderValue::from_static("items 0-10/50"),
        );
        assert!(!content_range_bytes_present(&other));
    }
}
