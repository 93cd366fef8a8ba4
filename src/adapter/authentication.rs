use std::collections::HashMap;

use crate::adapter::request_information::RequestInformation;
use crate::error::Error;
use crate::pipeline::BoxFuture;

/// Key under which a claims challenge is passed back to the provider during
/// a continuous-access-evaluation retry.
pub const CLAIMS_KEY: &str = "claims";

/// Decorates an outgoing request with credentials. The provider is external
/// to this crate; `additional_context` carries the CAE claims blob under
/// [`CLAIMS_KEY`] when a 401 challenge is being retried.
pub trait AuthenticationProvider: Send + Sync {
    fn authenticate_request<'a>(
        &'a self,
        request: &'a mut RequestInformation,
        additional_context: &'a HashMap<String, String>,
    ) -> BoxFuture<'a, Result<(), Error>>;
}

/// Provider for unauthenticated APIs: leaves the request untouched.
#[derive(Debug, Default)]
pub struct AnonymousAuthenticationProvider;

impl AuthenticationProvider for AnonymousAuthenticationProvider {
    fn authenticate_request<'a>(
        &'a self,
        _request: &'a mut RequestInformation,
        _additional_context: &'a HashMap<String, String>,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async { Ok(()) })
    }
}
