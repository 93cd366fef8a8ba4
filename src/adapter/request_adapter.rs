use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use http::StatusCode;
use tokio::time::Instant;

use crate::adapter::authentication::{AuthenticationProvider, CLAIMS_KEY};
use crate::adapter::request_information::RequestInformation;
use crate::adapter::serialization::{
    ErrorMappings, EnumFactory, ParsableFactory, Parsable, ParseNode, ParseNodeFactory,
    PrimitiveType, PrimitiveValue, ResponseHandlerFn, ResponseHandlerOption,
};
use crate::client::Client;
use crate::error::{ApiError, Error};
use crate::otel;
use crate::otel::span_attributes::{
    HTTP_REQUEST_BODY_SIZE, HTTP_REQUEST_METHOD, HTTP_REQUEST_RESEND_COUNT,
    HTTP_RESPONSE_BODY_SIZE, HTTP_RESPONSE_HEADER_CONTENT_TYPE, HTTP_RESPONSE_STATUS_CODE,
    NETWORK_PROTOCOL_NAME, SERVER_ADDRESS, URL_FULL, URL_SCHEME,
};
use crate::options::ObservabilityOptions;
use crate::request::Request;
use crate::response::Response;
use crate::util::{extract_bearer_claims, primary_content_type, strip_query_template};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(100);
const BASE_URL_PARAMETER: &str = "baseurl";

/// Executes request-information objects produced by generated client code:
/// authenticates, dispatches through the middleware pipeline, retries a 401
/// claims challenge once, and deserializes the payload into the requested
/// shape. Safe for concurrent use.
pub struct RequestAdapter {
    authentication_provider: Arc<dyn AuthenticationProvider>,
    parse_node_factory: Arc<dyn ParseNodeFactory>,
    client: Client,
    base_url: RwLock<String>,
    observability: ObservabilityOptions,
}

impl RequestAdapter {
    pub fn new(
        authentication_provider: Arc<dyn AuthenticationProvider>,
        parse_node_factory: Arc<dyn ParseNodeFactory>,
    ) -> Self {
        Self {
            authentication_provider,
            parse_node_factory,
            client: Client::new(),
            base_url: RwLock::new(String::new()),
            observability: ObservabilityOptions::default(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_observability(mut self, observability: ObservabilityOptions) -> Self {
        self.observability = observability;
        self
    }

    pub fn set_base_url(&self, base_url: impl Into<String>) {
        *lock_write_unpoisoned(&self.base_url) = base_url.into();
    }

    pub fn base_url(&self) -> String {
        lock_read_unpoisoned(&self.base_url).clone()
    }

    /// Executes the request and deserializes the response into a model
    /// object. `Ok(None)` for 204 or empty/untyped bodies.
    pub async fn send(
        &self,
        mut request_info: RequestInformation,
        factory: ParsableFactory,
        error_mappings: ErrorMappings,
    ) -> Result<Option<Box<dyn Parsable>>, Error> {
        let response_handler = response_handler_of(&request_info);
        let response = self.dispatch(&mut request_info, "send").await?;
        if let Some(handler) = response_handler {
            let value = handler(response, error_mappings).await?;
            return downcast_handler_result(value);
        }
        self.throw_failed_responses(&response, &error_mappings)?;
        if should_return_no_content(&response) {
            return Ok(None);
        }
        let Some(parse_node) = self.root_parse_node(&response)? else {
            return Ok(None);
        };
        parse_node.get_object_value(&factory).map(Some)
    }

    /// Executes the request and deserializes the response into a collection
    /// of model objects. Empty for 204 or empty/untyped bodies.
    pub async fn send_collection(
        &self,
        mut request_info: RequestInformation,
        factory: ParsableFactory,
        error_mappings: ErrorMappings,
    ) -> Result<Vec<Box<dyn Parsable>>, Error> {
        let response_handler = response_handler_of(&request_info);
        let response = self.dispatch(&mut request_info, "send_collection").await?;
        if let Some(handler) = response_handler {
            let value = handler(response, error_mappings).await?;
            return downcast_handler_result(value);
        }
        self.throw_failed_responses(&response, &error_mappings)?;
        if should_return_no_content(&response) {
            return Ok(Vec::new());
        }
        let Some(parse_node) = self.root_parse_node(&response)? else {
            return Ok(Vec::new());
        };
        parse_node.get_collection_of_object_values(&factory)
    }

    /// Executes the request and deserializes the response into an enum
    /// ordinal.
    pub async fn send_enum(
        &self,
        mut request_info: RequestInformation,
        factory: EnumFactory,
        error_mappings: ErrorMappings,
    ) -> Result<Option<i64>, Error> {
        let response_handler = response_handler_of(&request_info);
        let response = self.dispatch(&mut request_info, "send_enum").await?;
        if let Some(handler) = response_handler {
            let value = handler(response, error_mappings).await?;
            return downcast_handler_result(value);
        }
        self.throw_failed_responses(&response, &error_mappings)?;
        if should_return_no_content(&response) {
            return Ok(None);
        }
        let Some(parse_node) = self.root_parse_node(&response)? else {
            return Ok(None);
        };
        parse_node.get_enum_value(&factory)
    }

    /// Executes the request and deserializes the response into a collection
    /// of enum ordinals.
    pub async fn send_enum_collection(
        &self,
        mut request_info: RequestInformation,
        factory: EnumFactory,
        error_mappings: ErrorMappings,
    ) -> Result<Vec<i64>, Error> {
        let response_handler = response_handler_of(&request_info);
        let response = self
            .dispatch(&mut request_info, "send_enum_collection")
            .await?;
        if let Some(handler) = response_handler {
            let value = handler(response, error_mappings).await?;
            return downcast_handler_result(value);
        }
        self.throw_failed_responses(&response, &error_mappings)?;
        if should_return_no_content(&response) {
            return Ok(Vec::new());
        }
        let Some(parse_node) = self.root_parse_node(&response)? else {
            return Ok(Vec::new());
        };
        parse_node.get_collection_of_enum_values(&factory)
    }

    /// Executes the request and deserializes the response into a primitive
    /// value. [`PrimitiveType::Bytes`] yields the raw body without a parse
    /// node.
    pub async fn send_primitive(
        &self,
        mut request_info: RequestInformation,
        primitive: PrimitiveType,
        error_mappings: ErrorMappings,
    ) -> Result<Option<PrimitiveValue>, Error> {
        let response_handler = response_handler_of(&request_info);
        let response = self.dispatch(&mut request_info, "send_primitive").await?;
        if let Some(handler) = response_handler {
            let value = handler(response, error_mappings).await?;
            return downcast_handler_result(value);
        }
        self.throw_failed_responses(&response, &error_mappings)?;
        if should_return_no_content(&response) {
            return Ok(None);
        }
        if primitive == PrimitiveType::Bytes {
            return Ok(Some(PrimitiveValue::Bytes(response.body().to_vec())));
        }
        let Some(parse_node) = self.root_parse_node(&response)? else {
            return Ok(None);
        };
        parse_node.get_primitive_value(primitive)
    }

    /// Executes the request and deserializes the response into a collection
    /// of primitive values.
    pub async fn send_primitive_collection(
        &self,
        mut request_info: RequestInformation,
        primitive: PrimitiveType,
        error_mappings: ErrorMappings,
    ) -> Result<Vec<PrimitiveValue>, Error> {
        let response_handler = response_handler_of(&request_info);
        let response = self
            .dispatch(&mut request_info, "send_primitive_collection")
            .await?;
        if let Some(handler) = response_handler {
            let value = handler(response, error_mappings).await?;
            return downcast_handler_result(value);
        }
        self.throw_failed_responses(&response, &error_mappings)?;
        if should_return_no_content(&response) {
            return Ok(Vec::new());
        }
        let Some(parse_node) = self.root_parse_node(&response)? else {
            return Ok(Vec::new());
        };
        parse_node.get_collection_of_primitive_values(primitive)
    }

    /// Executes the request, expecting no content back.
    pub async fn send_no_content(
        &self,
        mut request_info: RequestInformation,
        error_mappings: ErrorMappings,
    ) -> Result<(), Error> {
        let response_handler = response_handler_of(&request_info);
        let response = self.dispatch(&mut request_info, "send_no_content").await?;
        if let Some(handler) = response_handler {
            handler(response, error_mappings).await?;
            return Ok(());
        }
        self.throw_failed_responses(&response, &error_mappings)
    }

    /// Authenticates, renders and dispatches the request, retrying a 401
    /// bearer claims challenge exactly once.
    async fn dispatch(
        &self,
        request_info: &mut RequestInformation,
        operation: &str,
    ) -> Result<Response, Error> {
        let span_name = format!(
            "{operation} - {}",
            strip_query_template(&request_info.url_template)
        );
        let mut span = otel::start_span(Some(&self.observability), &span_name);

        request_info
            .path_parameters
            .insert(BASE_URL_PARAMETER.to_owned(), self.base_url());

        let mut claims: Option<String> = None;
        loop {
            let mut additional_context = HashMap::new();
            if let Some(claims_value) = &claims {
                additional_context.insert(CLAIMS_KEY.to_owned(), claims_value.clone());
            }
            self.authentication_provider
                .authenticate_request(request_info, &additional_context)
                .await?;

            let request = self.build_request(request_info)?;
            span.set_str(HTTP_REQUEST_METHOD, request.method.to_string());
            span.set_i64(HTTP_REQUEST_BODY_SIZE, request.body.len() as i64);
            span.set_str(NETWORK_PROTOCOL_NAME, "http".to_owned());
            if let Some(scheme) = request.uri.scheme_str() {
                span.set_str(URL_SCHEME, scheme.to_owned());
            }
            if let Some(host) = request.uri.host() {
                span.set_str(SERVER_ADDRESS, host.to_owned());
            }
            if self.observability.include_euii_attributes {
                span.set_str(URL_FULL, request.uri.to_string());
            }

            let response = self.client.execute(request).await?;
            span.set_i64(
                HTTP_RESPONSE_STATUS_CODE,
                i64::from(response.status().as_u16()),
            );
            span.set_i64(HTTP_RESPONSE_BODY_SIZE, response.body().len() as i64);
            if let Some(content_type) = primary_content_type(response.headers()) {
                span.set_str(HTTP_RESPONSE_HEADER_CONTENT_TYPE, content_type);
            }

            if response.status() == StatusCode::UNAUTHORIZED
                && claims.is_none()
                && let Some(challenge_claims) = extract_bearer_claims(response.headers())
            {
                claims = Some(challenge_claims);
                span.set_i64(HTTP_REQUEST_RESEND_COUNT, 1);
                continue;
            }
            return Ok(response);
        }
    }

    fn build_request(&self, request_info: &RequestInformation) -> Result<Request, Error> {
        let uri = request_info.uri()?;
        let mut request = Request::new(request_info.method.clone(), uri);
        request.headers = request_info.headers.clone();
        request.body = request_info.content.clone();
        for option in request_info.request_options() {
            request.options.insert(Arc::clone(option));
        }
        request.options.insert(Arc::new(self.observability.clone()));
        request.deadline = Some(
            request_info
                .deadline
                .unwrap_or_else(|| Instant::now() + DEFAULT_REQUEST_TIMEOUT),
        );
        Ok(request)
    }

    fn root_parse_node(&self, response: &Response) -> Result<Option<Box<dyn ParseNode>>, Error> {
        let Some(content_type) = primary_content_type(response.headers()) else {
            return Ok(None);
        };
        self.parse_node_factory
            .get_root_parse_node(&content_type, response.body().clone())
            .map(Some)
    }

    fn throw_failed_responses(
        &self,
        response: &Response,
        error_mappings: &ErrorMappings,
    ) -> Result<(), Error> {
        let status = response.status();
        if status.as_u16() < 400 {
            return Ok(());
        }

        let Some(factory) = error_mappings.factory_for(status) else {
            return Err(Error::Api(ApiError::generic(
                format!(
                    "the server returned an unexpected status code and no error factory is registered for it: {}",
                    status.as_u16()
                ),
                status.as_u16(),
                response.headers(),
            )));
        };
        if response.body().is_empty() {
            return Err(Error::Api(ApiError::generic(
                format!(
                    "the server returned an unexpected status code with no response body: {}",
                    status.as_u16()
                ),
                status.as_u16(),
                response.headers(),
            )));
        }
        let Some(parse_node) = self.root_parse_node(response)? else {
            return Err(Error::Api(ApiError::generic(
                format!(
                    "the server returned an unexpected status code with no response body: {}",
                    status.as_u16()
                ),
                status.as_u16(),
                response.headers(),
            )));
        };

        let model = parse_node.get_object_value(factory)?;
        Err(Error::Api(ApiError {
            message: format!(
                "the server returned an unexpected status code: {}",
                status.as_u16()
            ),
            status: status.as_u16(),
            response_headers: response.headers().clone(),
            model: Some(model),
        }))
    }
}

impl std::fmt::Debug for RequestAdapter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestAdapter")
            .field("base_url", &self.base_url())
            .finish_non_exhaustive()
    }
}

fn should_return_no_content(response: &Response) -> bool {
    response.status() == StatusCode::NO_CONTENT || response.body().is_empty()
}

fn response_handler_of(request_info: &RequestInformation) -> Option<ResponseHandlerFn> {
    request_info.request_options().iter().find_map(|option| {
        option
            .as_any()
            .downcast_ref::<ResponseHandlerOption>()
            .map(|handler_option| Arc::clone(&handler_option.handler))
    })
}

fn downcast_handler_result<T: 'static>(value: Box<dyn Any + Send>) -> Result<T, Error> {
    value.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
        Error::ResponseHandler {
            message: "value type does not match the operation's result shape".to_owned(),
        }
    })
}

fn lock_read_unpoisoned<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock_write_unpoisoned<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
