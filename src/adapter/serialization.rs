use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::StatusCode;
use uuid::Uuid;

use crate::error::Error;
use crate::options::{OptionKey, RequestOption};
use crate::pipeline::BoxFuture;
use crate::response::Response;

/// Marker for generated model values produced by a [`ParseNode`].
pub trait Parsable: Any + Send + Sync + std::fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Builds a typed model from a parse node. Error mappings register one of
/// these per status-code key.
pub type ParsableFactory =
    Arc<dyn Fn(&dyn ParseNode) -> Result<Box<dyn Parsable>, Error> + Send + Sync>;

/// Resolves an enum member name to its ordinal value.
pub type EnumFactory = Arc<dyn Fn(&str) -> Option<i64> + Send + Sync>;

/// The closed set of primitive shapes the adapter can deserialize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveType {
    String,
    Bool,
    Float32,
    Float64,
    Int32,
    Int64,
    DateTime,
    Uuid,
    /// The raw response body, returned without consulting a parse node.
    Bytes,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PrimitiveValue {
    String(String),
    Bool(bool),
    Float32(f32),
    Float64(f64),
    Int32(i32),
    Int64(i64),
    DateTime(DateTime<Utc>),
    Uuid(Uuid),
    Bytes(Vec<u8>),
}

/// Content-type-agnostic deserializer over a byte payload, produced by a
/// [`ParseNodeFactory`]. The serialization ecosystem supplying concrete
/// implementations is external to this crate; factories downcast via
/// `as_any` to reach their own node type.
pub trait ParseNode: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn get_object_value(&self, factory: &ParsableFactory) -> Result<Box<dyn Parsable>, Error>;

    fn get_collection_of_object_values(
        &self,
        factory: &ParsableFactory,
    ) -> Result<Vec<Box<dyn Parsable>>, Error>;

    fn get_enum_value(&self, factory: &EnumFactory) -> Result<Option<i64>, Error>;

    fn get_collection_of_enum_values(&self, factory: &EnumFactory) -> Result<Vec<i64>, Error>;

    fn get_primitive_value(
        &self,
        primitive: PrimitiveType,
    ) -> Result<Option<PrimitiveValue>, Error>;

    fn get_collection_of_primitive_values(
        &self,
        primitive: PrimitiveType,
    ) -> Result<Vec<PrimitiveValue>, Error>;
}

/// Creates the root parse node for a payload keyed by its media type
/// (lowercased, parameters stripped).
pub trait ParseNodeFactory: Send + Sync {
    fn get_root_parse_node(
        &self,
        content_type: &str,
        content: Bytes,
    ) -> Result<Box<dyn ParseNode>, Error>;
}

/// Status-code-keyed registry of error-model factories. Lookup order: the
/// exact three-digit status, then the `4XX`/`5XX` class key.
#[derive(Clone, Default)]
pub struct ErrorMappings {
    mappings: HashMap<String, ParsableFactory>,
}

impl ErrorMappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, status_key: impl Into<String>, factory: ParsableFactory) {
        self.mappings.insert(status_key.into(), factory);
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn factory_for(&self, status: StatusCode) -> Option<&ParsableFactory> {
        if let Some(factory) = self.mappings.get(status.as_str()) {
            return Some(factory);
        }
        if status.is_client_error() {
            return self.mappings.get("4XX");
        }
        if status.is_server_error() {
            return self.mappings.get("5XX");
        }
        None
    }
}

impl std::fmt::Debug for ErrorMappings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_set()
            .entries(self.mappings.keys())
            .finish()
    }
}

/// Caller-supplied terminal callback taking ownership of the raw response.
///
/// The returned value must match the result shape of the operation the
/// option is attached to: `Option<Box<dyn Parsable>>` for `send`,
/// `Vec<Box<dyn Parsable>>` for `send_collection`, `Option<i64>` /
/// `Vec<i64>` for the enum forms, `Option<PrimitiveValue>` /
/// `Vec<PrimitiveValue>` for the primitive forms. `send_no_content` ignores
/// the value.
pub type ResponseHandlerFn = Arc<
    dyn Fn(Response, ErrorMappings) -> BoxFuture<'static, Result<Box<dyn Any + Send>, Error>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct ResponseHandlerOption {
    pub handler: ResponseHandlerFn,
}

impl ResponseHandlerOption {
    pub const KEY: OptionKey = OptionKey("ResponseHandler");

    pub fn new(handler: ResponseHandlerFn) -> Self {
        Self { handler }
    }
}

impl RequestOption for ResponseHandlerOption {
    fn key(&self) -> OptionKey {
        Self::KEY
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
