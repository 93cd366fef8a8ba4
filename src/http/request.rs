use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use tokio::time::Instant;

use crate::options::OptionsBag;

/// Mutable request flowing through the middleware pipeline.
///
/// The URI is absolute by the time the request reaches the terminal
/// transport. The body is a fully buffered byte payload (empty = no body),
/// which keeps redirects and retries replayable without stream rewinding.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub options: OptionsBag,
    /// Absolute point after which sleeps and transport I/O abort with a
    /// cancellation-typed error. `None` means the caller set no bound.
    pub deadline: Option<Instant>,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            options: OptionsBag::default(),
            deadline: None,
        }
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// Tightens the deadline to `candidate` if it is sooner than the current
    /// one (or if none was set).
    pub fn tighten_deadline(&mut self, candidate: Instant) {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(candidate),
            None => candidate,
        });
    }
}
