use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Globally-unique identifier for a request-option kind. Two options with the
/// same key shadow each other in an [`OptionsBag`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OptionKey(pub &'static str);

impl std::fmt::Display for OptionKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0)
    }
}

/// A per-request configuration value carried on the request, overriding the
/// defaults a handler was constructed with.
pub trait RequestOption: Any + Send + Sync {
    fn key(&self) -> OptionKey;

    fn as_any(&self) -> &dyn Any;
}

/// Kind-keyed registry of request options attached to an in-flight request.
///
/// The bag is read-only after the adapter seeds it; handlers perform typed
/// lookups and fall back to their constructor-time defaults on a miss.
#[derive(Clone, Default)]
pub struct OptionsBag {
    entries: HashMap<OptionKey, Arc<dyn RequestOption>>,
}

impl OptionsBag {
    pub fn insert(&mut self, option: Arc<dyn RequestOption>) {
        self.entries.insert(option.key(), option);
    }

    /// Typed lookup: resolves the entry under `key` and downcasts it. A
    /// kind-matched but type-incompatible entry behaves as a miss.
    pub fn get<T: RequestOption>(&self, key: OptionKey) -> Option<&T> {
        self.entries.get(&key)?.as_any().downcast_ref::<T>()
    }

    pub fn observability(&self) -> Option<&ObservabilityOptions> {
        self.get::<ObservabilityOptions>(ObservabilityOptions::KEY)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl std::fmt::Debug for OptionsBag {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_set()
            .entries(self.entries.keys().map(|key| key.0))
            .finish()
    }
}

/// Carrier for the tracing configuration of a single request: the tracer
/// instrumentation name and whether attributes may include end-user
/// identifiable information such as the full request URL.
#[derive(Clone, Debug)]
pub struct ObservabilityOptions {
    pub tracer_instrumentation_name: String,
    pub include_euii_attributes: bool,
}

impl ObservabilityOptions {
    pub const KEY: OptionKey = OptionKey("ObservabilityOptions");

    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for ObservabilityOptions {
    fn default() -> Self {
        Self {
            tracer_instrumentation_name: concat!("courier-rs/", env!("CARGO_PKG_VERSION")).to_owned(),
            include_euii_attributes: false,
        }
    }
}

impl RequestOption for ObservabilityOptions {
    fn key(&self) -> OptionKey {
        Self::KEY
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
