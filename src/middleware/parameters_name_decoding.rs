use std::any::Any;

use http::Uri;
use http::uri::PathAndQuery;

use crate::error::Error;
use crate::options::{OptionKey, RequestOption};
use crate::otel;
use crate::pipeline::{BoxFuture, Middleware, Pipeline};
use crate::request::Request;
use crate::response::Response;

/// Configuration for [`ParametersNameDecodingHandler`]:
/// `parameters_to_decode` is the set of bytes whose percent-encodings are
/// rewritten back to literals in the raw query.
#[derive(Clone, Debug)]
pub struct ParametersNameDecodingOptions {
    pub enabled: bool,
    pub parameters_to_decode: Vec<u8>,
}

impl ParametersNameDecodingOptions {
    pub const KEY: OptionKey = OptionKey("ParametersNameDecodingHandler");
}

impl Default for ParametersNameDecodingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            parameters_to_decode: vec![b'-', b'.', b'~', b'$'],
        }
    }
}

impl RequestOption for ParametersNameDecodingOptions {
    fn key(&self) -> OptionKey {
        Self::KEY
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Decodes query-parameter name characters that URI-template expansion had
/// to percent-encode. Only the raw query is rewritten; the replacement
/// applies to the whole query string, not just the name positions.
pub struct ParametersNameDecodingHandler {
    options: ParametersNameDecodingOptions,
}

impl ParametersNameDecodingHandler {
    pub fn new() -> Self {
        Self::with_options(ParametersNameDecodingOptions::default())
    }

    pub fn with_options(options: ParametersNameDecodingOptions) -> Self {
        Self { options }
    }
}

impl Default for ParametersNameDecodingHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for ParametersNameDecodingHandler {
    fn intercept<'a>(
        &'a self,
        pipeline: &'a dyn Pipeline,
        index: usize,
        mut request: Request,
    ) -> BoxFuture<'a, Result<Response, Error>> {
        Box::pin(async move {
            let options = request
                .options
                .get::<ParametersNameDecodingOptions>(ParametersNameDecodingOptions::KEY)
                .cloned()
                .unwrap_or_else(|| self.options.clone());
            let mut span = otel::start_span(
                request.options.observability(),
                "ParametersNameDecodingHandler_intercept",
            );
            span.set_bool("courier.handler.parameters_name_decoding.enable", true);

            if options.enabled
                && !options.parameters_to_decode.is_empty()
                && let Some(query) = request.uri.query()
                && query.contains('%')
            {
                let decoded = decode_parameter_names(query, &options.parameters_to_decode);
                request.uri = replace_query(&request.uri, &decoded)?;
            }

            pipeline.next(request, index + 1).await
        })
    }
}

/// Replaces `%XX` (either hex case) with the literal byte for every byte in
/// `parameters_to_decode`.
pub fn decode_parameter_names(query: &str, parameters_to_decode: &[u8]) -> String {
    let mut decoded = query.to_owned();
    for parameter in parameters_to_decode {
        let replacement = (*parameter as char).to_string();
        decoded = decoded
            .replace(&format!("%{parameter:02X}"), &replacement)
            .replace(&format!("%{parameter:02x}"), &replacement);
    }
    decoded
}

fn replace_query(uri: &Uri, query: &str) -> Result<Uri, Error> {
    let path = uri.path();
    let path_and_query = if query.is_empty() {
        path.to_owned()
    } else {
        format!("{path}?{query}")
    };
    let invalid_uri = |text: &str| Error::InvalidUri {
        uri: text.to_owned(),
    };
    let path_and_query: PathAndQuery = path_and_query
        .parse()
        .map_err(|_| invalid_uri(&path_and_query))?;
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    Uri::from_parts(parts).map_err(|_| invalid_uri(&uri.to_string()))
}

#[cfg(test)]
mod tests {
    use super::decode_parameter_names;

    #[test]
    fn decodes_the_default_byte_set_in_both_hex_cases() {
        let set = [b'-', b'.', b'~', b'$'];
        let cases = [
            ("%24select=displayName&api%2Dversion=2", "$select=displayName&api-version=2"),
            ("%24select=displayName&api%7Eversion=2", "$select=displayName&api~version=2"),
            ("%24select=displayName&api%2eversion=2", "$select=displayName&api.version=2"),
            ("q=1%2B2", "q=1%2B2"),
        ];
        for (input, expected) in cases {
            assert_eq!(decode_parameter_names(input, &set), expected);
        }
    }

    #[test]
    fn leaves_bytes_outside_the_set_alone() {
        assert_eq!(decode_parameter_names("a%2Db=1", &[b'.']), "a%2Db=1");
    }
}
