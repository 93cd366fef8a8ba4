use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tokio::time::Instant;

use crate::error::Error;
use crate::options::RequestOption;

/// RFC 3986 unreserved characters stay literal; everything else is encoded.
const COMPONENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Language-neutral request description handed over by generated client
/// code: a URL template with parameters, headers, body bytes, and the
/// request options to apply while executing it.
///
/// Template expressions understood: `{name}` (percent-encoded path value),
/// `{+name}` (reserved expansion, used for `{+baseurl}`), `{?a,b}` (query
/// expansion of the supplied query parameters; absent parameters are
/// omitted). Query parameter names appear in the template in their encoded
/// form and are matched verbatim.
#[derive(Clone)]
pub struct RequestInformation {
    pub method: Method,
    pub url_template: String,
    pub path_parameters: HashMap<String, String>,
    pub query_parameters: HashMap<String, String>,
    pub headers: HeaderMap,
    pub content: Bytes,
    /// Caller deadline, inherited by the rendered request; the adapter
    /// applies its default when unset.
    pub deadline: Option<Instant>,
    options: Vec<Arc<dyn RequestOption>>,
}

impl RequestInformation {
    pub fn new(method: Method, url_template: impl Into<String>) -> Self {
        Self {
            method,
            url_template: url_template.into(),
            path_parameters: HashMap::new(),
            query_parameters: HashMap::new(),
            headers: HeaderMap::new(),
            content: Bytes::new(),
            deadline: None,
            options: Vec::new(),
        }
    }

    pub fn add_request_options(
        &mut self,
        options: impl IntoIterator<Item = Arc<dyn RequestOption>>,
    ) {
        self.options.extend(options);
    }

    pub fn request_options(&self) -> &[Arc<dyn RequestOption>] {
        &self.options
    }

    /// Renders the absolute URI from the template and parameters.
    pub fn uri(&self) -> Result<Uri, Error> {
        let rendered = render_uri_template(
            &self.url_template,
            &self.path_parameters,
            &self.query_parameters,
        );
        rendered.parse().map_err(|_| Error::InvalidUri {
            uri: rendered,
        })
    }
}

impl std::fmt::Debug for RequestInformation {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestInformation")
            .field("method", &self.method)
            .field("url_template", &self.url_template)
            .field("path_parameters", &self.path_parameters)
            .field("query_parameters", &self.query_parameters)
            .field("content_len", &self.content.len())
            .field("options", &self.options.len())
            .finish()
    }
}

pub(crate) fn render_uri_template(
    template: &str,
    path_parameters: &HashMap<String, String>,
    query_parameters: &HashMap<String, String>,
) -> String {
    let mut rendered = String::with_capacity(template.len() + 16);
    let mut rest = template;
    loop {
        let Some(start) = rest.find('{') else {
            rendered.push_str(rest);
            return rendered;
        };
        rendered.push_str(&rest[..start]);
        let Some(end) = rest[start..].find('}') else {
            rendered.push_str(&rest[start..]);
            return rendered;
        };
        let expression = &rest[start + 1..start + end];
        expand_expression(expression, path_parameters, query_parameters, &mut rendered);
        rest = &rest[start + end + 1..];
    }
}

fn expand_expression(
    expression: &str,
    path_parameters: &HashMap<String, String>,
    query_parameters: &HashMap<String, String>,
    rendered: &mut String,
) {
    if let Some(names) = expression.strip_prefix('?') {
        let mut first = true;
        for name in names.split(',') {
            let name = name.trim().trim_end_matches('*');
            let Some(value) = query_parameters.get(name) else {
                continue;
            };
            rendered.push(if first { '?' } else { '&' });
            first = false;
            rendered.push_str(name);
            rendered.push('=');
            rendered.push_str(&utf8_percent_encode(value, COMPONENT_ENCODE_SET).to_string());
        }
        return;
    }
    if let Some(name) = expression.strip_prefix('+') {
        if let Some(value) = path_parameters.get(name) {
            rendered.push_str(value);
        }
        return;
    }
    if let Some(value) = path_parameters.get(expression) {
        rendered.push_str(&utf8_percent_encode(value, COMPONENT_ENCODE_SET).to_string());
    }
}
