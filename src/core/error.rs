use http::{HeaderMap, Method};
use thiserror::Error;

use crate::serialization::Parsable;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidArgument,
    InvalidUri,
    InvalidRedirectLocation,
    RequestBuild,
    Transport,
    DeadlineExceeded,
    Compression,
    Api,
    Deserialization,
    ResponseHandler,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::InvalidUri => "invalid_uri",
            Self::InvalidRedirectLocation => "invalid_redirect_location",
            Self::RequestBuild => "request_build",
            Self::Transport => "transport",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Compression => "compression",
            Self::Api => "api",
            Self::Deserialization => "deserialization",
            Self::ResponseHandler => "response_handler",
        }
    }
}

/// Error payload for failed HTTP responses.
///
/// When an error mapping matched the response status, `model` carries the
/// deserialized error object; otherwise the value is the generic fallback
/// carrying only the status and response headers.
#[derive(Debug)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
    pub response_headers: HeaderMap,
    pub model: Option<Box<dyn Parsable>>,
}

impl ApiError {
    pub(crate) fn generic(message: impl Into<String>, status: u16, headers: &HeaderMap) -> Self {
        Self {
            message: message.into(),
            status,
            response_headers: headers.clone(),
            model: None,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "api error {}: {}", self.status, self.message)
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid redirect location {location}")]
    InvalidRedirectLocation { location: String },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("http transport error for {method} {uri}: {source}")]
    Transport {
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("request deadline exceeded for {method} {uri}")]
    DeadlineExceeded { method: Method, uri: String },
    #[error("failed to gzip request body: {source}")]
    Compression {
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Api(ApiError),
    #[error("failed to deserialize response payload: {message}")]
    Deserialization { message: String },
    #[error("response handler returned an unexpected value: {message}")]
    ResponseHandler { message: String },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidRedirectLocation { .. } => ErrorCode::InvalidRedirectLocation,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            Self::Compression { .. } => ErrorCode::Compression,
            Self::Api(_) => ErrorCode::Api,
            Self::Deserialization { .. } => ErrorCode::Deserialization,
            Self::ResponseHandler { .. } => ErrorCode::ResponseHandler,
        }
    }

    /// True for cancellation-typed errors, as opposed to HTTP-level failures.
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}
