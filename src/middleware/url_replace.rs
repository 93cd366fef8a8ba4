use std::any::Any;
use std::collections::HashMap;
use std::sync::LazyLock;

use http::Uri;
use http::uri::PathAndQuery;

use crate::error::Error;
use crate::options::{OptionKey, RequestOption};
use crate::otel;
use crate::pipeline::{BoxFuture, Middleware, Pipeline};
use crate::request::Request;
use crate::response::Response;

/// Process-wide default token replacements, frozen after initialization.
static DEFAULT_REPLACEMENT_PAIRS: LazyLock<HashMap<String, String>> = LazyLock::new(|| {
    HashMap::from([("/users/me-token-to-replace".to_owned(), "/me".to_owned())])
});

#[derive(Clone, Debug)]
pub struct UrlReplaceOptions {
    pub enabled: bool,
    pub replacement_pairs: HashMap<String, String>,
}

impl UrlReplaceOptions {
    pub const KEY: OptionKey = OptionKey("UrlReplaceHandler");
}

impl Default for UrlReplaceOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            replacement_pairs: DEFAULT_REPLACEMENT_PAIRS.clone(),
        }
    }
}

impl RequestOption for UrlReplaceOptions {
    fn key(&self) -> OptionKey {
        Self::KEY
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Replaces known tokens in the request path, each pair applied at most
/// once. No ordering guarantee across pairs.
pub struct UrlReplaceHandler {
    options: UrlReplaceOptions,
}

impl UrlReplaceHandler {
    pub fn new() -> Self {
        Self::with_options(UrlReplaceOptions::default())
    }

    pub fn with_options(options: UrlReplaceOptions) -> Self {
        Self { options }
    }
}

impl Default for UrlReplaceHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for UrlReplaceHandler {
    fn intercept<'a>(
        &'a self,
        pipeline: &'a dyn Pipeline,
        index: usize,
        mut request: Request,
    ) -> BoxFuture<'a, Result<Response, Error>> {
        Box::pin(async move {
            let options = request
                .options
                .get::<UrlReplaceOptions>(UrlReplaceOptions::KEY)
                .cloned()
                .unwrap_or_else(|| self.options.clone());
            let mut span = otel::start_span(
                request.options.observability(),
                "UrlReplaceHandler_intercept",
            );
            span.set_bool("courier.handler.url_replace.enable", true);

            if !options.enabled || options.replacement_pairs.is_empty() {
                return pipeline.next(request, index + 1).await;
            }

            let replaced = replace_path_tokens(request.uri.path(), &options.replacement_pairs);
            if replaced != request.uri.path() {
                request.uri = replace_path(&request.uri, &replaced)?;
            }

            pipeline.next(request, index + 1).await
        })
    }
}

/// Applies each replacement pair to the path once, first match per key.
pub fn replace_path_tokens(path: &str, replacement_pairs: &HashMap<String, String>) -> String {
    let mut replaced = path.to_owned();
    for (token, replacement) in replacement_pairs {
        replaced = replaced.replacen(token.as_str(), replacement, 1);
    }
    replaced
}

fn replace_path(uri: &Uri, path: &str) -> Result<Uri, Error> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_owned(),
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
    use std::collections::HashMap;

    use super::replace_path_tokens;

    #[test]
    fn replaces_the_default_me_token() {
        let pairs =
            HashMap::from([("/users/me-token-to-replace".to_owned(), "/me".to_owned())]);
        assert_eq!(
            replace_path_tokens("/users/me-token-to-replace/contactFolders", &pairs),
            "/me/contactFolders"
        );
    }

    #[test]
    fn applies_each_pair_only_once() {
        let pairs = HashMap::from([("/a".to_owned(), "/b".to_owned())]);
        assert_eq!(replace_path_tokens("/a/x/a", &pairs), "/b/x/a");
    }
}
